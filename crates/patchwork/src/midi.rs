//! MIDI reconciler.
//!
//! Wires hardware and virtual MIDI devices to the router's per-device
//! ports, the router's channel outputs to chain entry engines, and the
//! fixed infrastructure edges around the router. Every candidate edge is
//! either connected or explicitly disconnected.
//!
//! A non-forced pass is gated on the device set: when neither the server's
//! port generation nor the port-name fingerprint changed, it returns before
//! touching anything.

use patchconf::RoutingConfig;
use tracing::debug;

use crate::device::DeviceLibrary;
use crate::error::GraphError;
use crate::graph::{MediaGraph, PassReport, PatchSession};
use crate::identity::{device_identity, fixed_engine_port_name};
use crate::names;
use crate::slots::{DeviceDirection, DeviceSlotTable};
use crate::topology::{EngineKind, TopologySnapshot};
use crate::types::{PortInfo, PortQuery};

/// Everything a MIDI pass reads besides the graph.
pub struct MidiContext<'a> {
    pub slots: &'a DeviceSlotTable,
    pub devices: &'a dyn DeviceLibrary,
    pub routing: &'a RoutingConfig,
    pub topology: &'a TopologySnapshot,
}

/// Physical MIDI ports that produce data (device inputs).
pub fn hw_source_ports(graph: &dyn MediaGraph) -> Vec<PortInfo> {
    graph.ports(&PortQuery::midi().outputs().physical())
}

/// Physical MIDI ports that consume data (device outputs).
pub fn hw_destination_ports(graph: &dyn MediaGraph) -> Vec<PortInfo> {
    graph.ports(&PortQuery::midi().inputs().physical())
}

/// Newline-joined port names; changes whenever the device set does.
pub fn fingerprint(sources: &[PortInfo], destinations: &[PortInfo]) -> String {
    let mut out = String::new();
    for port in sources.iter().chain(destinations) {
        out.push_str(&port.name);
        out.push('\n');
    }
    out
}

/// Routed MIDI destination: a tag layers can name in their MIDI-out list
/// and the ports it stands for.
struct RoutedDestination {
    tag: String,
    ports: Vec<String>,
}

/// MIDI ports of the device set observed at the start of a pass.
struct DeviceScan {
    sources: Vec<PortInfo>,
    destinations: Vec<PortInfo>,
}

#[derive(Debug, Default)]
pub struct MidiReconciler {
    last_fingerprint: Option<String>,
    last_generation: Option<u64>,
}

impl MidiReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the device-set fingerprint so the next pass runs in full.
    pub fn invalidate(&mut self) {
        self.last_fingerprint = None;
        self.last_generation = None;
    }

    pub fn run(
        &mut self,
        graph: &dyn MediaGraph,
        ctx: &MidiContext<'_>,
        force: bool,
    ) -> Result<PassReport, GraphError> {
        let generation = graph.port_generation();
        if !force && generation.is_some() && generation == self.last_generation {
            return Ok(PassReport::skipped());
        }

        let scan = scan_devices(graph, ctx.routing);
        let print = fingerprint(&scan.sources, &scan.destinations);
        let changed = self.last_fingerprint.as_deref() != Some(print.as_str());
        self.last_generation = generation;
        if changed {
            self.last_fingerprint = Some(print);
        } else if !force {
            return Ok(PassReport::skipped());
        }

        let result = reconcile(graph, ctx, &scan, changed);
        match &result {
            Ok(report) if report.failed == 0 => {}
            // Let the next poll redo the pass instead of short-circuiting.
            _ => self.invalidate(),
        }
        result
    }
}

fn reconcile(
    graph: &dyn MediaGraph,
    ctx: &MidiContext<'_>,
    scan: &DeviceScan,
    changed: bool,
) -> Result<PassReport, GraphError> {
    let mut session = PatchSession::new(graph);
    let routed = routed_destinations(&mut session, ctx);

    wire_input_devices(&mut session, ctx, &scan.sources)?;
    wire_output_devices(&mut session, ctx, &scan.destinations)?;
    if changed {
        ctx.slots.mark_changed();
    }

    let feedback_sources = engine_feedback_ports(&session, ctx.topology);
    wire_router_inputs(&mut session, ctx.routing, &feedback_sources)?;
    wire_midi_tools(&mut session, ctx.topology, &routed)?;
    wire_chain_roots(&mut session, ctx.topology)?;

    ctx.devices.set_midi_thru(ctx.routing.midi_thru);
    wire_router_outputs(&mut session, ctx.routing, &scan.destinations)?;

    for source in &scan.sources {
        session.disconnect(&source.name, names::LEGACY_MIDI_SINK)?;
    }

    let report = session.finish();
    debug!(
        "midi pass: +{} -{} ={} missing {} failed {}",
        report.connected, report.disconnected, report.unchanged, report.missing, report.failed
    );
    Ok(report)
}

fn scan_devices(graph: &dyn MediaGraph, routing: &RoutingConfig) -> DeviceScan {
    let mut sources = hw_source_ports(graph);
    let destinations = hw_destination_ports(graph);

    if routing.midi_aubionotes {
        let query = PortQuery::midi().outputs().software().named(names::PITCH_DETECTOR);
        if let Some(port) = graph.ports(&query).into_iter().next() {
            sources.push(port);
        }
    }

    DeviceScan {
        sources,
        destinations,
    }
}

fn first_midi_port(session: &PatchSession<'_>, name: &str, query: PortQuery) -> Option<String> {
    session
        .first_port(&query.software().named(name))
        .map(|p| p.name)
}

/// Destinations a MIDI tool may route to, in a stable order.
fn routed_destinations(session: &mut PatchSession<'_>, ctx: &MidiContext<'_>) -> Vec<RoutedDestination> {
    let mut routed = Vec::new();

    for engine in ctx.topology.engines.iter().filter(|e| e.kind.has_midi_ports()) {
        let client = fixed_engine_port_name(&engine.jackname);
        if let Some(port) = first_midi_port(session, client, PortQuery::midi().inputs()) {
            routed.push(RoutedDestination {
                tag: engine.jackname.clone(),
                ports: vec![port],
            });
        }
    }

    if let Some(port) = first_midi_port(session, names::CV_GATE_IN, PortQuery::midi().inputs()) {
        routed.push(RoutedDestination {
            tag: names::CV_GATE_TAG.to_string(),
            ports: vec![port],
        });
    }

    for port in session.ports(&PortQuery::midi().inputs().physical()) {
        routed.push(RoutedDestination {
            tag: port.name.clone(),
            ports: vec![port.name],
        });
    }

    let network = network_destinations(session)
        .into_iter()
        .filter(|(identity, _)| ctx.routing.is_output_enabled(identity))
        .map(|(_, port)| port)
        .collect();
    routed.push(RoutedDestination {
        tag: names::NET_OUT_TAG.to_string(),
        ports: network,
    });

    routed
}

/// Network MIDI bridge inputs present in the graph, with their identities.
fn network_destinations(session: &PatchSession<'_>) -> Vec<(String, String)> {
    names::NETWORK_MIDI_IN
        .iter()
        .filter_map(|name| {
            session
                .first_port(&PortQuery::midi().inputs().software().named(*name))
                .map(|port| (device_identity(&port), port.name))
        })
        .collect()
}

/// Controller-feedback outputs of running synth engines.
fn engine_feedback_ports(session: &PatchSession<'_>, topology: &TopologySnapshot) -> Vec<String> {
    topology
        .engines
        .iter()
        .filter(|e| e.kind == EngineKind::MidiSynth)
        .filter_map(|e| {
            first_midi_port(
                session,
                fixed_engine_port_name(&e.jackname),
                PortQuery::midi().outputs(),
            )
        })
        .collect()
}

/// Device inputs (graph outputs) → router `dev{n}_in`.
fn wire_input_devices(
    session: &mut PatchSession<'_>,
    ctx: &MidiContext<'_>,
    sources: &[PortInfo],
) -> Result<(), GraphError> {
    let mut seen: Vec<String> = Vec::new();

    for source in sources {
        let identity = device_identity(source);
        if identity.is_empty() {
            continue;
        }

        let slot = if ctx.routing.is_input_disabled(&identity) {
            None
        } else {
            ctx.slots
                .assign_or_lookup(DeviceDirection::Input, &identity, &source.name)
                .map(|assigned| {
                    if assigned.new {
                        ctx.slots.refresh_mode(assigned.slot, ctx.devices);
                    }
                    assigned.slot
                })
        };

        if slot.is_some() {
            seen.push(identity);
        }
        for i in 0..names::ROUTER_DEVICE_PORTS {
            session.set_edge(&source.name, &names::router_device_in(i), slot == Some(i))?;
        }
    }

    ctx.slots.free_unseen(DeviceDirection::Input, &seen);
    Ok(())
}

/// Router `dev{n}_out` → device outputs (graph inputs). Hardware outputs
/// have no enable gate.
fn wire_output_devices(
    session: &mut PatchSession<'_>,
    ctx: &MidiContext<'_>,
    destinations: &[PortInfo],
) -> Result<(), GraphError> {
    let mut seen: Vec<String> = Vec::new();

    for destination in destinations {
        let identity = device_identity(destination);
        if identity.is_empty() {
            continue;
        }

        let slot = ctx
            .slots
            .assign_or_lookup(DeviceDirection::Output, &identity, &destination.name)
            .map(|assigned| assigned.slot);

        if slot.is_some() {
            seen.push(identity);
        }
        for i in 0..names::ROUTER_DEVICE_PORTS {
            session.set_edge(&names::router_device_out(i), &destination.name, slot == Some(i))?;
        }
    }

    ctx.slots.free_unseen(DeviceDirection::Output, &seen);
    Ok(())
}

/// Bridges, sequencers and engine feedback → router inputs.
fn wire_router_inputs(
    session: &mut PatchSession<'_>,
    routing: &RoutingConfig,
    feedback_sources: &[String],
) -> Result<(), GraphError> {
    session.set_edge(names::RTPMIDI_OUT, names::ROUTER_NET_IN, routing.midi_rtpmidi)?;
    session.set_edge(names::QMIDINET_OUT, names::ROUTER_NET_IN, routing.midi_network)?;
    session.set_edge(names::TOUCHOSC_OUT, names::ROUTER_NET_IN, routing.midi_touchosc)?;

    session.connect(names::STEPSEQ_OUT, names::ROUTER_STEP_IN)?;
    session.connect(names::SMF_OUT, names::ROUTER_SEQ_IN)?;
    session.connect(names::ROUTER_MAIN_OUT, names::SMF_IN)?;

    for port in feedback_sources {
        session.connect(port, names::ROUTER_CTRL_IN)?;
    }
    Ok(())
}

/// MIDI tools feed exactly the destinations they declare, replacing the
/// raw channel feed on those destinations.
fn wire_midi_tools(
    session: &mut PatchSession<'_>,
    topology: &TopologySnapshot,
    routed: &[RoutedDestination],
) -> Result<(), GraphError> {
    for layer in topology.layers.iter().filter(|l| l.kind().emits_midi()) {
        let Some(jackname) = layer.midi_jackname.as_deref() else {
            continue;
        };
        let Some(source) =
            first_midi_port(session, fixed_engine_port_name(jackname), PortQuery::midi().outputs())
        else {
            continue;
        };

        for destination in routed {
            let wanted = layer.midi_out.iter().any(|tag| *tag == destination.tag);
            for port in &destination.ports {
                session.set_edge(&source, port, wanted)?;
                if wanted {
                    if let Some(chan) = layer.midi_chan {
                        session.disconnect(&names::router_channel_out(chan), port)?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Router channel outputs → MIDI-chain entry engines.
///
/// Root layers sharing an engine aggregate their channels on its single
/// input port; a root listening on all channels gets the summed output.
fn wire_chain_roots(session: &mut PatchSession<'_>, topology: &TopologySnapshot) -> Result<(), GraphError> {
    let mut roots: Vec<(String, String, Vec<Option<u8>>)> = Vec::new();

    for layer in topology.midichain_root_layers() {
        let Some(jackname) = layer.midi_jackname.as_deref() else {
            continue;
        };
        if let Some((_, _, chans)) = roots.iter_mut().find(|(jn, _, _)| jn == jackname) {
            chans.push(layer.midi_chan);
            continue;
        }
        if let Some(port) =
            first_midi_port(session, fixed_engine_port_name(jackname), PortQuery::midi().inputs())
        {
            roots.push((jackname.to_string(), port, vec![layer.midi_chan]));
        }
    }

    for (_, port, chans) in &roots {
        let omni = chans.contains(&None);
        session.set_edge(names::ROUTER_MAIN_OUT, port, omni)?;
        for ch in 0..names::MIDI_CHANNELS {
            let wanted = !omni && chans.contains(&Some(ch));
            session.set_edge(&names::router_channel_out(ch), port, wanted)?;
        }
    }
    Ok(())
}

/// THRU, network and controller-feedback outputs of the router.
fn wire_router_outputs(
    session: &mut PatchSession<'_>,
    routing: &RoutingConfig,
    destinations: &[PortInfo],
) -> Result<(), GraphError> {
    if let Some(cv_gate) = first_midi_port(session, names::CV_GATE_IN, PortQuery::midi().inputs()) {
        session.connect(names::ROUTER_MIDI_OUT, &cv_gate)?;
    }
    for port in destinations {
        let enabled = routing.is_output_enabled(&device_identity(port));
        session.set_edge(names::ROUTER_MIDI_OUT, &port.name, enabled)?;
    }

    for (identity, port) in network_destinations(session) {
        session.set_edge(names::ROUTER_NET_OUT, &port, routing.is_output_enabled(&identity))?;
    }

    session.connect(names::ROUTER_STEP_OUT, names::STEPSEQ_IN)?;

    for port in destinations {
        let enabled = routing.is_feedback_enabled(&device_identity(port));
        session.set_edge(names::ROUTER_CTRL_OUT, &port.name, enabled)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevices;
    use crate::memory::MemoryGraph;
    use crate::topology::Layer;
    use crate::types::{MediaKind, PortDirection};

    fn router(graph: &MemoryGraph) {
        for i in 0..names::ROUTER_DEVICE_PORTS {
            graph.add_port(PortInfo::new(names::router_device_in(i), PortDirection::Input, MediaKind::Midi));
            graph.add_port(PortInfo::new(names::router_device_out(i), PortDirection::Output, MediaKind::Midi));
        }
        for ch in 0..names::MIDI_CHANNELS {
            graph.add_port(PortInfo::new(names::router_channel_out(ch), PortDirection::Output, MediaKind::Midi));
        }
        for name in [names::ROUTER_MAIN_OUT, names::ROUTER_MIDI_OUT, names::ROUTER_CTRL_OUT] {
            graph.add_port(PortInfo::new(name, PortDirection::Output, MediaKind::Midi));
        }
    }

    fn keyboard(graph: &MemoryGraph, n: usize) -> String {
        let name = format!("system:midi_capture_{}", n);
        graph.add_port(
            PortInfo::new(name.clone(), PortDirection::Output, MediaKind::Midi)
                .physical()
                .with_alias(format!("alsa_pcm:in-hw-{}-0-0-Keys-{}", n, n)),
        );
        name
    }

    struct Harness {
        slots: DeviceSlotTable,
        devices: MemoryDevices,
        routing: RoutingConfig,
        topology: TopologySnapshot,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                slots: DeviceSlotTable::new(),
                devices: MemoryDevices::new(),
                routing: RoutingConfig::default(),
                topology: TopologySnapshot::default(),
            }
        }

        fn ctx(&self) -> MidiContext<'_> {
            MidiContext {
                slots: &self.slots,
                devices: &self.devices,
                routing: &self.routing,
                topology: &self.topology,
            }
        }
    }

    #[test]
    fn test_fingerprint_joins_names() {
        let a = PortInfo::new("a:1", PortDirection::Output, MediaKind::Midi);
        let b = PortInfo::new("b:1", PortDirection::Input, MediaKind::Midi);
        assert_eq!(fingerprint(&[a], &[b]), "a:1\nb:1\n");
    }

    #[test]
    fn test_keyboard_gets_first_slot() {
        let graph = MemoryGraph::new();
        router(&graph);
        let port = keyboard(&graph, 1);
        let harness = Harness::new();

        MidiReconciler::new().run(&graph, &harness.ctx(), true).unwrap();

        assert!(graph.is_connected(&port, "ZynMidiRouter:dev0_in"));
        assert_eq!(harness.slots.lookup(DeviceDirection::Input, 0).as_deref(), Some("Keys_1"));
        assert!(harness.slots.take_changed());
        assert_eq!(harness.slots.channel_mode(0), Some(crate::device::ChannelMode::Multi));
    }

    #[test]
    fn test_disabled_input_is_unwired_and_loses_slot() {
        let graph = MemoryGraph::new();
        router(&graph);
        let port = keyboard(&graph, 1);
        let mut harness = Harness::new();
        let mut midi = MidiReconciler::new();
        midi.run(&graph, &harness.ctx(), true).unwrap();

        harness.routing.set_input_enabled("Keys_1", false);
        midi.run(&graph, &harness.ctx(), true).unwrap();

        assert!(!graph.is_connected(&port, "ZynMidiRouter:dev0_in"));
        assert_eq!(harness.slots.lookup(DeviceDirection::Input, 0), None);
    }

    #[test]
    fn test_unforced_pass_without_changes_is_skipped() {
        let graph = MemoryGraph::new();
        router(&graph);
        keyboard(&graph, 1);
        let harness = Harness::new();
        let mut midi = MidiReconciler::new();

        assert!(!midi.run(&graph, &harness.ctx(), false).unwrap().skipped);
        graph.reset_stats();
        assert!(midi.run(&graph, &harness.ctx(), false).unwrap().skipped);
        assert_eq!(graph.stats().queries, 0);

        keyboard(&graph, 2);
        assert!(!midi.run(&graph, &harness.ctx(), false).unwrap().skipped);
    }

    #[test]
    fn test_root_aggregates_channels() {
        let graph = MemoryGraph::new();
        router(&graph);
        graph.add_port(PortInfo::new("setBfree:midi_in", PortDirection::Input, MediaKind::Midi));
        let mut harness = Harness::new();
        harness.topology = TopologySnapshot::from_layers(vec![
            Layer::new(EngineKind::MidiSynth, "BF", "setBfree").on_channel(0),
            Layer::new(EngineKind::MidiSynth, "BF", "setBfree").on_channel(2),
        ])
        .with_midichain_roots(vec![0, 1]);
        graph.connect("ZynMidiRouter:ch5_out", "setBfree:midi_in").unwrap();

        MidiReconciler::new().run(&graph, &harness.ctx(), true).unwrap();

        assert!(graph.is_connected("ZynMidiRouter:ch0_out", "setBfree:midi_in"));
        assert!(graph.is_connected("ZynMidiRouter:ch2_out", "setBfree:midi_in"));
        assert!(!graph.is_connected("ZynMidiRouter:ch5_out", "setBfree:midi_in"));
        assert!(!graph.is_connected("ZynMidiRouter:main_out", "setBfree:midi_in"));
    }

    #[test]
    fn test_failed_pass_is_redone_by_next_poll() {
        let graph = MemoryGraph::new();
        router(&graph);
        let port = keyboard(&graph, 1);
        let harness = Harness::new();
        let mut midi = MidiReconciler::new();

        graph.fail_edge(&port, "ZynMidiRouter:dev0_in");
        let report = midi.run(&graph, &harness.ctx(), false).unwrap();
        assert_eq!(report.failed, 1);
        assert!(!graph.is_connected(&port, "ZynMidiRouter:dev0_in"));

        graph.clear_failures();
        assert!(!midi.run(&graph, &harness.ctx(), false).unwrap().skipped);
        assert!(graph.is_connected(&port, "ZynMidiRouter:dev0_in"));
    }

    #[test]
    fn test_unavailable_server_fails_pass_and_forgets_device_set() {
        let graph = MemoryGraph::new();
        router(&graph);
        keyboard(&graph, 1);
        let harness = Harness::new();
        let mut midi = MidiReconciler::new();

        graph.set_unavailable(true);
        assert!(matches!(
            midi.run(&graph, &harness.ctx(), true),
            Err(GraphError::Unavailable(_))
        ));

        graph.set_unavailable(false);
        assert!(!midi.run(&graph, &harness.ctx(), false).unwrap().skipped);
    }

    #[test]
    fn test_thru_flag_is_pushed() {
        let graph = MemoryGraph::new();
        router(&graph);
        let mut harness = Harness::new();
        harness.routing.midi_thru = true;

        MidiReconciler::new().run(&graph, &harness.ctx(), true).unwrap();
        assert_eq!(harness.devices.midi_thru(), Some(true));
    }
}
