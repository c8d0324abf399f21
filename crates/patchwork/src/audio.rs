//! Audio reconciler.
//!
//! Runs only when forced. Routes each layer's audio outputs to its declared
//! destinations with modulo pairing, feeds audio-input chains from the
//! capture ports, and keeps the fixed mixer/system/headphone edges in place.

use std::thread;
use std::time::{Duration, Instant};

use patchconf::RoutingConfig;
use tracing::{debug, warn};

use crate::error::GraphError;
use crate::graph::{EdgeOutcome, MediaGraph, PassReport, PatchSession};
use crate::names;
use crate::topology::{EngineKind, Layer, TopologySnapshot};
use crate::types::{PortInfo, PortQuery};

/// Audio inputs grouped by owning client, in enumeration order.
pub type InputGroups = Vec<(String, Vec<String>)>;

pub struct AudioContext<'a> {
    pub routing: &'a RoutingConfig,
    pub topology: &'a TopologySnapshot,
}

/// Software audio inputs grouped by client.
///
/// Recording and monitoring sinks are never targets. System and mixer
/// inputs are skipped when `exclude_system_playback` is set, otherwise each
/// of them forms its own group keyed by the full port name.
pub fn audio_input_ports(graph: &dyn MediaGraph, exclude_system_playback: bool) -> InputGroups {
    let mut groups: InputGroups = Vec::new();

    for port in graph.ports(&PortQuery::audio().inputs().software()) {
        let client = port.client_name();
        if names::RECORDING_SINKS.contains(&client) || client.starts_with(names::PLUGIN_PREFIX) {
            continue;
        }
        let key = if client == names::SYSTEM || client == names::MIXER {
            if exclude_system_playback {
                continue;
            }
            port.name.clone()
        } else {
            client.to_string()
        };

        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, ports)) => ports.push(port.name),
            None => groups.push((key, vec![port.name])),
        }
    }
    groups
}

/// Physical capture ports.
pub fn audio_capture_ports(graph: &dyn MediaGraph) -> Vec<PortInfo> {
    graph.ports(&PortQuery::audio().outputs().physical().named(names::SYSTEM))
}

/// Mixer inputs followed by physical playback ports.
pub fn audio_playback_ports(graph: &dyn MediaGraph) -> Vec<PortInfo> {
    let mut ports = graph.ports(&PortQuery::audio().inputs().software().named(names::MIXER));
    ports.extend(graph.ports(&PortQuery::audio().inputs().physical().named(names::SYSTEM)));
    ports
}

/// Concrete port names a layer's audio-out tags stand for, first-seen order.
pub fn layer_audio_destinations(layer: &Layer) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |name: String| {
        if !out.contains(&name) {
            out.push(name);
        }
    };

    for tag in &layer.audio_out {
        match tag.as_str() {
            "system" => names::SYSTEM_PLAYBACK_PAIR.iter().for_each(|p| push(p.to_string())),
            "mixer" => match layer.midi_chan {
                Some(chan) if chan >= names::AUX_CHANNEL => {
                    names::MIXER_RETURN_PAIR.iter().for_each(|p| push(p.to_string()))
                }
                Some(chan) => names::mixer_input_pair(chan).into_iter().for_each(&mut push),
                None => {}
            },
            "mod-ui" => names::MIXER_MODUI_PAIR.iter().for_each(|p| push(p.to_string())),
            other => push(other.to_string()),
        }
    }
    out
}

fn is_playback(name: &str) -> bool {
    name.starts_with(names::MIXER) || name.starts_with(names::SYSTEM_PLAYBACK)
}

#[derive(Debug, Default)]
pub struct AudioReconciler;

impl AudioReconciler {
    pub fn new() -> Self {
        Self
    }

    pub fn run(
        &self,
        graph: &dyn MediaGraph,
        ctx: &AudioContext<'_>,
        force: bool,
    ) -> Result<PassReport, GraphError> {
        if !force {
            return Ok(PassReport::skipped());
        }

        let input_groups = audio_input_ports(graph, true);
        let system_playback: Vec<String> = graph
            .ports(&PortQuery::audio().inputs().physical().named(names::SYSTEM_PLAYBACK))
            .into_iter()
            .map(|p| p.name)
            .collect();
        let mut playback: Vec<String> = graph
            .ports(&PortQuery::audio().inputs().software().named(names::MIXER))
            .into_iter()
            .map(|p| p.name)
            .collect();
        playback.extend(system_playback.iter().cloned());

        let mut session = PatchSession::new(graph);

        let monitor = session.ports(&PortQuery::audio().outputs().named(names::MONITOR));
        for (port, playback_port) in monitor.iter().zip(names::SYSTEM_PLAYBACK_PAIR) {
            session.disconnect(&port.name, playback_port)?;
        }

        for layer in &ctx.topology.layers {
            wire_layer(&mut session, layer, &playback, &input_groups)?;
        }

        for aux in names::MIXER_AUX {
            session.connect(names::METRONOME, aux)?;
        }
        for (mixer_out, system_out) in names::MIXER_OUT.iter().zip(&system_playback) {
            session.connect(mixer_out, system_out)?;
        }

        let headphones = session.ports(&PortQuery::audio().inputs().named(names::HEADPHONES));
        if headphones.len() >= 2 {
            for (system_out, phones) in system_playback.iter().zip(&headphones) {
                session.replicate_connections(system_out, &phones.name)?;
            }
        }

        let mut capture: Vec<String> = audio_capture_ports(graph).into_iter().map(|p| p.name).collect();
        capture.extend(
            session
                .ports(&PortQuery::audio().outputs().named(names::MIXER_SEND))
                .into_iter()
                .map(|p| p.name),
        );
        wire_audio_inputs(&mut session, ctx.topology, &capture)?;

        if ctx.routing.midi_aubionotes {
            let detector: Vec<String> = session
                .ports(&PortQuery::audio().inputs().named(names::PITCH_DETECTOR))
                .into_iter()
                .map(|p| p.name)
                .collect();
            if !detector.is_empty() {
                for (j, source) in capture.iter().enumerate() {
                    session.connect(source, &detector[j % detector.len()])?;
                }
            }
        }

        let report = session.finish();
        debug!(
            "audio pass: +{} -{} ={} missing {}",
            report.connected, report.disconnected, report.unchanged, report.missing
        );
        Ok(report)
    }
}

/// Route one layer's audio outputs.
///
/// Playback destinations pair output `k` with destination `j` when
/// `k % n == j % n`, `n = min(destinations, outputs)`, `j` being the
/// destination's position in the layer's resolved list. Input groups range
/// over `max(outputs, group size)` and wrap each side independently.
fn wire_layer(
    session: &mut PatchSession<'_>,
    layer: &Layer,
    playback: &[String],
    input_groups: &InputGroups,
) -> Result<(), GraphError> {
    let Some(jackname) = layer.audio_jackname.as_deref() else {
        return Ok(());
    };
    if layer.kind() == EngineKind::MidiTool {
        return Ok(());
    }

    let destinations = layer_audio_destinations(layer);
    let layer_playback: Vec<&String> = destinations.iter().filter(|d| is_playback(d)).collect();

    let outputs: Vec<String> = session
        .ports(&PortQuery::audio().outputs().software().named(jackname))
        .into_iter()
        .map(|p| p.name)
        .collect();

    if !outputs.is_empty() {
        let np = outputs.len();
        let npb = layer_playback.len().min(np);

        for destination in playback {
            match layer_playback.iter().position(|d| *d == destination) {
                Some(j) => {
                    for (k, output) in outputs.iter().enumerate() {
                        session.set_edge(output, destination, k % npb == j % npb)?;
                    }
                }
                None => {
                    for output in &outputs {
                        session.disconnect(output, destination)?;
                    }
                }
            }
        }

        for (key, group) in input_groups {
            let wanted = destinations.contains(key);
            let nip = group.len();
            for j in 0..np.max(nip) {
                session.set_edge(&outputs[j % np], &group[j % nip], wanted)?;
            }
        }
    }

    if layer.kind() == EngineKind::AudioEffect {
        if let (Some(midi_jackname), Some(chan)) = (layer.midi_jackname.as_deref(), layer.midi_chan) {
            let midi_in = session.first_port(&PortQuery::midi().inputs().software().named(midi_jackname));
            if let Some(port) = midi_in {
                session.connect(&names::router_channel_out(chan), &port.name)?;
            }
        }
    }
    Ok(())
}

/// Capture and mixer-send ports → audio-input chain entries.
fn wire_audio_inputs(
    session: &mut PatchSession<'_>,
    topology: &TopologySnapshot,
    capture: &[String],
) -> Result<(), GraphError> {
    let mut capture_to_mixer: Vec<u8> = Vec::new();

    for root in topology.fxchain_root_layers() {
        if root.engine.nickname != names::AUDIO_INPUT_NICKNAME {
            continue;
        }

        let mut inputs: Vec<String> = Vec::new();
        for destination in layer_audio_destinations(root) {
            inputs.extend(
                session
                    .ports(&PortQuery::audio().inputs().software().named(destination))
                    .into_iter()
                    .map(|p| p.name),
            );
        }

        if !inputs.is_empty() {
            let nsc = root.audio_in.len().min(inputs.len());
            for (j, source) in capture.iter().enumerate() {
                if !root.audio_in.contains(source) {
                    for input in &inputs {
                        session.disconnect(source, input)?;
                    }
                    continue;
                }
                for (k, input) in inputs.iter().enumerate() {
                    // The mixer normalises a disconnected return itself.
                    if input.starts_with(names::MIXER_RETURN) && source.starts_with(names::MIXER_SEND) {
                        continue;
                    }
                    session.set_edge(source, input, k % nsc == j % nsc)?;
                }
            }
        }

        if root.audio_out.iter().any(|tag| tag == "mixer") {
            if let Some(chan) = root.midi_chan {
                capture_to_mixer.push(chan);
            }
        }
    }

    for chan in (0..names::MIDI_CHANNELS).filter(|c| !capture_to_mixer.contains(c)) {
        for input in names::mixer_input_pair(chan) {
            for source in capture {
                session.disconnect(source, &input)?;
            }
        }
    }
    Ok(())
}

/// Connect a source client's audio outputs to the aux mixer pair. A mono
/// source feeds both sides.
pub fn audio_connect_aux(graph: &dyn MediaGraph, source: &str) -> Result<PassReport, GraphError> {
    let ports = graph.ports(&PortQuery::audio().outputs().named(source));
    let mut session = PatchSession::new(graph);

    match ports.as_slice() {
        [] => {}
        [mono] => {
            for aux in names::MIXER_AUX {
                session.connect(&mono.name, aux)?;
            }
        }
        [left, right, ..] => {
            session.connect(&left.name, names::MIXER_AUX[0])?;
            session.connect(&right.name, names::MIXER_AUX[1])?;
        }
    }
    Ok(session.finish())
}

/// Connect the mixer master outputs to the recorder, retrying while the
/// recorder's ports are not registered yet. Returns whether both edges are
/// in place.
pub fn audio_connect_recorder(graph: &dyn MediaGraph, timeout: Duration) -> Result<bool, GraphError> {
    let deadline = Instant::now() + timeout;
    loop {
        let mut session = PatchSession::new(graph);
        let mut linked = 0;
        for (mixer_out, recorder_in) in names::MIXER_OUT.iter().zip(names::RECORDER_IN) {
            if let EdgeOutcome::Applied | EdgeOutcome::AlreadyInDesiredState =
                session.connect(mixer_out, recorder_in)?
            {
                linked += 1;
            }
        }
        if linked == names::RECORDER_IN.len() {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            warn!("recorder inputs did not appear within {:?}", timeout);
            return Ok(false);
        }
        thread::sleep(Duration::from_millis(100));
    }
}

/// Disconnect every source feeding a system output.
pub fn audio_disconnect_sysout(graph: &dyn MediaGraph) -> Result<PassReport, GraphError> {
    let outputs = graph.ports(&PortQuery::audio().inputs().named(names::SYSTEM));
    let mut session = PatchSession::new(graph);
    for output in outputs.iter().filter(|p| p.client_name() == names::SYSTEM) {
        for source in session.connections(&output.name)? {
            session.disconnect(&source, &output.name)?;
        }
    }
    Ok(session.finish())
}
