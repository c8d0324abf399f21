//! Chain topology seam.
//!
//! The chain manager owns layers and engines; the reconcilers take a
//! snapshot at the start of each pass and treat it as the desired state.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineKind {
    MidiSynth,
    /// Consumes and re-emits MIDI; no audio.
    MidiTool,
    AudioEffect,
    Special,
}

impl EngineKind {
    /// Engines whose MIDI ports take part in router wiring.
    pub fn has_midi_ports(&self) -> bool {
        matches!(self, EngineKind::MidiSynth | EngineKind::MidiTool | EngineKind::Special)
    }

    /// Engines interposed on a MIDI chain that re-emit MIDI.
    pub fn emits_midi(&self) -> bool {
        matches!(self, EngineKind::MidiTool | EngineKind::Special)
    }
}

/// A running engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub kind: EngineKind,
    pub nickname: String,
    /// Client name of the engine in the media graph.
    pub jackname: String,
}

/// One instrument or effect slot of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub engine: EngineInfo,
    /// `None` for layers listening on all channels.
    pub midi_chan: Option<u8>,
    /// Client name carrying the layer's audio, if it has any.
    pub audio_jackname: Option<String>,
    /// Client name carrying the layer's MIDI, if it has any.
    pub midi_jackname: Option<String>,
    /// Audio destination tags: `system`, `mixer`, `mod-ui` or a port/client name.
    pub audio_out: Vec<String>,
    /// MIDI destination tags: routed destination names.
    pub midi_out: Vec<String>,
    /// Audio sources (port names) captured by an audio-input layer.
    pub audio_in: Vec<String>,
}

impl Layer {
    /// Layer whose audio and MIDI both live on the engine's client.
    pub fn new(kind: EngineKind, nickname: &str, jackname: &str) -> Self {
        Self {
            engine: EngineInfo {
                kind,
                nickname: nickname.to_string(),
                jackname: jackname.to_string(),
            },
            midi_chan: None,
            audio_jackname: Some(jackname.to_string()),
            midi_jackname: Some(jackname.to_string()),
            audio_out: Vec::new(),
            midi_out: Vec::new(),
            audio_in: Vec::new(),
        }
    }

    pub fn on_channel(mut self, chan: u8) -> Self {
        self.midi_chan = Some(chan);
        self
    }

    pub fn with_audio_jackname(mut self, jackname: &str) -> Self {
        self.audio_jackname = Some(jackname.to_string());
        self
    }

    pub fn with_audio_out<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.audio_out = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_midi_out<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.midi_out = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_audio_in<S: Into<String>>(mut self, ports: impl IntoIterator<Item = S>) -> Self {
        self.audio_in = ports.into_iter().map(Into::into).collect();
        self
    }

    pub fn kind(&self) -> EngineKind {
        self.engine.kind
    }
}

/// Chain state at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub engines: Vec<EngineInfo>,
    /// All layers in chain order.
    pub layers: Vec<Layer>,
    /// Indices into `layers` of the MIDI-chain entry layers, parallel
    /// layers included.
    pub midichain_roots: Vec<usize>,
    /// Indices into `layers` of the FX-chain entry layers.
    pub fxchain_roots: Vec<usize>,
}

impl TopologySnapshot {
    /// Snapshot over `layers`, one engine per distinct jackname, no roots.
    pub fn from_layers(layers: Vec<Layer>) -> Self {
        let mut engines: Vec<EngineInfo> = Vec::new();
        for layer in &layers {
            if !engines.iter().any(|e| e.jackname == layer.engine.jackname) {
                engines.push(layer.engine.clone());
            }
        }
        Self {
            engines,
            layers,
            midichain_roots: Vec::new(),
            fxchain_roots: Vec::new(),
        }
    }

    pub fn with_midichain_roots(mut self, roots: Vec<usize>) -> Self {
        self.midichain_roots = roots;
        self
    }

    pub fn with_fxchain_roots(mut self, roots: Vec<usize>) -> Self {
        self.fxchain_roots = roots;
        self
    }

    pub fn midichain_root_layers(&self) -> impl Iterator<Item = &Layer> {
        self.midichain_roots.iter().filter_map(|&i| self.layers.get(i))
    }

    pub fn fxchain_root_layers(&self) -> impl Iterator<Item = &Layer> {
        self.fxchain_roots.iter().filter_map(|&i| self.layers.get(i))
    }
}

pub trait ChainTopology: Send + Sync {
    fn snapshot(&self) -> TopologySnapshot;
}

impl<T: ChainTopology + ?Sized> ChainTopology for Arc<T> {
    fn snapshot(&self) -> TopologySnapshot {
        (**self).snapshot()
    }
}

/// Topology set from outside, e.g. by the chain manager or a test.
#[derive(Debug, Default)]
pub struct StaticTopology {
    current: RwLock<TopologySnapshot>,
}

impl StaticTopology {
    pub fn new(snapshot: TopologySnapshot) -> Self {
        Self {
            current: RwLock::new(snapshot),
        }
    }

    /// Empty topology: hardware routing only.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set(&self, snapshot: TopologySnapshot) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

impl ChainTopology for StaticTopology {
    fn snapshot(&self) -> TopologySnapshot {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
