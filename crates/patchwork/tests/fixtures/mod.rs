#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use patchconf::RoutingConfig;
use patchwork::{
    names, Autoconnect, AutoconnectConfig, MediaKind, MemoryDevices, MemoryGraph, PortDirection,
    PortInfo, StaticTopology, TopologySnapshot,
};

/// A workstation graph: router, mixer, sequencer, system audio, and
/// whatever devices and engines a test plugs in.
pub struct Rig {
    pub graph: Arc<MemoryGraph>,
    pub topology: Arc<StaticTopology>,
    pub devices: Arc<MemoryDevices>,
}

impl Rig {
    pub fn new() -> Self {
        let graph = Arc::new(MemoryGraph::new());
        Self::setup_router(&graph);
        Self::setup_mixer(&graph);
        Self::setup_system_audio(&graph);
        Self::setup_sequencer(&graph);

        Self {
            graph,
            topology: Arc::new(StaticTopology::empty()),
            devices: Arc::new(MemoryDevices::new()),
        }
    }

    fn midi(graph: &MemoryGraph, name: &str, direction: PortDirection) {
        graph.add_port(PortInfo::new(name, direction, MediaKind::Midi));
    }

    fn audio(graph: &MemoryGraph, name: &str, direction: PortDirection) {
        graph.add_port(PortInfo::new(name, direction, MediaKind::Audio));
    }

    fn setup_router(graph: &MemoryGraph) {
        for i in 0..names::ROUTER_DEVICE_PORTS {
            Self::midi(graph, &names::router_device_in(i), PortDirection::Input);
            Self::midi(graph, &names::router_device_out(i), PortDirection::Output);
        }
        for ch in 0..names::MIDI_CHANNELS {
            Self::midi(graph, &names::router_channel_out(ch), PortDirection::Output);
        }
        for name in [
            names::ROUTER_MAIN_OUT,
            names::ROUTER_MIDI_OUT,
            names::ROUTER_NET_OUT,
            names::ROUTER_STEP_OUT,
            names::ROUTER_CTRL_OUT,
        ] {
            Self::midi(graph, name, PortDirection::Output);
        }
        for name in [
            names::ROUTER_NET_IN,
            names::ROUTER_STEP_IN,
            names::ROUTER_SEQ_IN,
            names::ROUTER_CTRL_IN,
        ] {
            Self::midi(graph, name, PortDirection::Input);
        }
    }

    fn setup_mixer(graph: &MemoryGraph) {
        for strip in 1..=17 {
            for side in ["a", "b"] {
                Self::audio(graph, &format!("zynmixer:input_{:02}{}", strip, side), PortDirection::Input);
            }
        }
        for name in names::MIXER_RETURN_PAIR {
            Self::audio(graph, name, PortDirection::Input);
        }
        for name in names::MIXER_OUT {
            Self::audio(graph, name, PortDirection::Output);
        }
    }

    fn setup_system_audio(graph: &MemoryGraph) {
        for i in 1..=2 {
            graph.add_port(
                PortInfo::new(format!("system:capture_{}", i), PortDirection::Output, MediaKind::Audio)
                    .physical(),
            );
            graph.add_port(
                PortInfo::new(format!("system:playback_{}", i), PortDirection::Input, MediaKind::Audio)
                    .physical(),
            );
        }
    }

    fn setup_sequencer(graph: &MemoryGraph) {
        Self::midi(graph, names::STEPSEQ_OUT, PortDirection::Output);
        Self::midi(graph, names::STEPSEQ_IN, PortDirection::Input);
        Self::audio(graph, names::METRONOME, PortDirection::Output);
    }

    pub fn add_headphones(&self) {
        for i in 1..=2 {
            Self::audio(&self.graph, &format!("Headphones:playback_{}", i), PortDirection::Input);
        }
    }

    /// Mixer send bus outputs, the sources of an effects return chain.
    pub fn add_mixer_send(&self) {
        for side in ["a", "b"] {
            Self::audio(&self.graph, &format!("zynmixer:send_{}", side), PortDirection::Output);
        }
    }

    /// USB keyboard: a device input, i.e. a physical graph output.
    pub fn add_keyboard(&self, card: usize, model: &str) -> String {
        let name = format!("system:midi_capture_{}", card);
        self.graph.add_port(
            PortInfo::new(name.clone(), PortDirection::Output, MediaKind::Midi)
                .physical()
                .with_alias(format!("alsa_pcm:in-hw-{}-0-0-{}", card, model)),
        );
        name
    }

    /// Sound module: a device output, i.e. a physical graph input.
    pub fn add_sound_module(&self, card: usize, model: &str) -> String {
        let name = format!("system:midi_playback_{}", card);
        self.graph.add_port(
            PortInfo::new(name.clone(), PortDirection::Input, MediaKind::Midi)
                .physical()
                .with_alias(format!("alsa_pcm:out-hw-{}-0-0-{}", card, model)),
        );
        name
    }

    /// Synth engine with a MIDI input and `outputs` audio outputs.
    pub fn add_synth(&self, jackname: &str, outputs: usize) {
        Self::midi(&self.graph, &format!("{}:midi_in", jackname), PortDirection::Input);
        for i in 1..=outputs {
            Self::audio(&self.graph, &format!("{}:out_{}", jackname, i), PortDirection::Output);
        }
    }

    /// MIDI tool with one MIDI input and one MIDI output.
    pub fn add_midi_tool(&self, jackname: &str) {
        Self::midi(&self.graph, &format!("{}:midi_in", jackname), PortDirection::Input);
        Self::midi(&self.graph, &format!("{}:midi_out", jackname), PortDirection::Output);
    }

    /// Stereo audio effect.
    pub fn add_effect(&self, jackname: &str) {
        for i in 1..=2 {
            Self::audio(&self.graph, &format!("{}:in_{}", jackname, i), PortDirection::Input);
            Self::audio(&self.graph, &format!("{}:out_{}", jackname, i), PortDirection::Output);
        }
    }

    pub fn set_topology(&self, snapshot: TopologySnapshot) {
        self.topology.set(snapshot);
    }

    pub fn config(routing: RoutingConfig) -> AutoconnectConfig {
        AutoconnectConfig {
            client_name: "patchwork-test".to_string(),
            refresh: Duration::from_millis(5),
            // Keep the device poll out of the way unless a test waits for it.
            device_poll: Duration::from_secs(3600),
            routing,
        }
    }

    pub fn service(&self, routing: RoutingConfig) -> Autoconnect {
        Autoconnect::new(
            Self::config(routing),
            self.topology.clone(),
            self.devices.clone(),
        )
    }

    /// Service connected to this rig's graph, loop running.
    pub fn started(&self, routing: RoutingConfig) -> Autoconnect {
        let service = self.service(routing);
        service
            .start(&self.graph, Duration::from_millis(5))
            .expect("memory graph should accept the client");
        service
    }

    pub fn connected(&self, source: &str, destination: &str) -> bool {
        self.graph.is_connected(source, destination)
    }

    /// Sources feeding `destination`, sorted.
    pub fn feeding(&self, destination: &str) -> Vec<String> {
        self.graph
            .edges()
            .into_iter()
            .filter(|(_, d)| d == destination)
            .map(|(s, _)| s)
            .collect()
    }
}
