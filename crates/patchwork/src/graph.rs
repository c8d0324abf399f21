//! Graph query layer.
//!
//! [`MediaGraph`] is the seam to the media server: every call is a potential
//! round-trip, nothing is cached at this level. [`PatchSession`] wraps one
//! reconciliation pass: it remembers each touched port's connection set for
//! the duration of the pass so that edges already in the desired state cost
//! no mutation call, and it tallies what actually changed.
//!
//! A request the server rejects is logged and counted, and the pass moves
//! on to the next edge. Only an unavailable server aborts a pass.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::GraphError;
use crate::types::{PortInfo, PortQuery};

/// Read/write access to the live media graph.
pub trait MediaGraph: Send + Sync {
    /// Ports matching `query`, in the server's enumeration order.
    fn ports(&self, query: &PortQuery) -> Vec<PortInfo>;

    /// Names of all ports connected to `port`.
    fn connections(&self, port: &str) -> Result<Vec<String>, GraphError>;

    fn connect(&self, source: &str, destination: &str) -> Result<(), GraphError>;

    fn disconnect(&self, source: &str, destination: &str) -> Result<(), GraphError>;

    /// Counter bumped whenever a port is registered or unregistered.
    /// Backends that cannot observe registrations return `None`.
    fn port_generation(&self) -> Option<u64> {
        None
    }

    fn cpu_load(&self) -> f32 {
        0.0
    }

    fn sample_rate(&self) -> u32 {
        0
    }

    fn buffer_size(&self) -> u32 {
        0
    }
}

impl<G: MediaGraph + ?Sized> MediaGraph for Arc<G> {
    fn ports(&self, query: &PortQuery) -> Vec<PortInfo> {
        (**self).ports(query)
    }

    fn connections(&self, port: &str) -> Result<Vec<String>, GraphError> {
        (**self).connections(port)
    }

    fn connect(&self, source: &str, destination: &str) -> Result<(), GraphError> {
        (**self).connect(source, destination)
    }

    fn disconnect(&self, source: &str, destination: &str) -> Result<(), GraphError> {
        (**self).disconnect(source, destination)
    }

    fn port_generation(&self) -> Option<u64> {
        (**self).port_generation()
    }

    fn cpu_load(&self) -> f32 {
        (**self).cpu_load()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn buffer_size(&self) -> u32 {
        (**self).buffer_size()
    }
}

/// Opens a client connection to a media server.
pub trait MediaServer: Send + Sync {
    /// Register a client named `client_name`, hook `xruns` to the server's
    /// x-run notification and activate the client.
    fn open(
        &self,
        client_name: &str,
        xruns: Arc<XrunMonitor>,
    ) -> Result<Box<dyn MediaGraph>, GraphError>;
}

/// X-run observer state. Written from the server's notification thread, so
/// recording is a pair of atomic stores and nothing else.
#[derive(Debug, Default)]
pub struct XrunMonitor {
    pending: AtomicBool,
    count: AtomicU64,
}

impl XrunMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.pending.store(true, Ordering::Release);
    }

    /// Read-and-clear the "x-run happened" flag.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Result of a single connect/disconnect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    /// The graph was changed.
    Applied,
    /// The edge was already (dis)connected.
    AlreadyInDesiredState,
    /// One of the ports does not exist (yet). Not an error.
    PortNotFound,
    /// The server rejected the request. Logged and counted; the next pass
    /// retries it.
    Failed,
}

/// What a reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// The pass short-circuited without touching the graph.
    pub skipped: bool,
    pub connected: usize,
    pub disconnected: usize,
    pub unchanged: usize,
    pub missing: usize,
    /// Requests the server rejected.
    pub failed: usize,
}

impl PassReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    /// Number of edges the pass changed.
    pub fn churn(&self) -> usize {
        self.connected + self.disconnected
    }

    pub fn merge(&mut self, other: &PassReport) {
        self.skipped &= other.skipped;
        self.connected += other.connected;
        self.disconnected += other.disconnected;
        self.unchanged += other.unchanged;
        self.missing += other.missing;
        self.failed += other.failed;
    }
}

/// One reconciliation pass over a [`MediaGraph`].
pub struct PatchSession<'g> {
    graph: &'g dyn MediaGraph,
    /// Connection sets of ports touched this pass; `None` marks a port the
    /// server does not know.
    edges: HashMap<String, Option<HashSet<String>>>,
    report: PassReport,
}

impl<'g> PatchSession<'g> {
    pub fn new(graph: &'g dyn MediaGraph) -> Self {
        Self {
            graph,
            edges: HashMap::new(),
            report: PassReport::default(),
        }
    }

    pub fn ports(&self, query: &PortQuery) -> Vec<PortInfo> {
        self.graph.ports(query)
    }

    pub fn first_port(&self, query: &PortQuery) -> Option<PortInfo> {
        self.graph.ports(query).into_iter().next()
    }

    /// Ports connected to `port`; empty for an unknown port.
    pub fn connections(&mut self, port: &str) -> Result<Vec<String>, GraphError> {
        let mut names: Vec<String> = self
            .lookup(port)?
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    /// Cached connection set of `port`, `None` if the server does not know
    /// it. Fails only when the server is gone.
    fn lookup(&mut self, port: &str) -> Result<Option<&HashSet<String>>, GraphError> {
        if !self.edges.contains_key(port) {
            let set = match self.graph.connections(port) {
                Ok(names) => Some(names.into_iter().collect()),
                Err(e @ GraphError::Unavailable(_)) => return Err(e),
                Err(_) => None,
            };
            self.edges.insert(port.to_string(), set);
        }
        Ok(self.edges.get(port).and_then(|set| set.as_ref()))
    }

    fn record(&mut self, source: &str, destination: &str, linked: bool) {
        for (port, peer) in [(source, destination), (destination, source)] {
            if let Some(Some(set)) = self.edges.get_mut(port) {
                if linked {
                    set.insert(peer.to_string());
                } else {
                    set.remove(peer);
                }
            }
        }
    }

    fn mark_missing(&mut self, port: &str) {
        self.edges.insert(port.to_string(), None);
    }

    fn missing(&mut self) -> Result<EdgeOutcome, GraphError> {
        self.report.missing += 1;
        Ok(EdgeOutcome::PortNotFound)
    }

    fn unchanged(&mut self) -> Result<EdgeOutcome, GraphError> {
        self.report.unchanged += 1;
        Ok(EdgeOutcome::AlreadyInDesiredState)
    }

    fn rejected(
        &mut self,
        action: &str,
        source: &str,
        destination: &str,
        err: GraphError,
    ) -> Result<EdgeOutcome, GraphError> {
        if let GraphError::Unavailable(_) = err {
            return Err(err);
        }
        warn!("failed to {} {} -> {}: {}", action, source, destination, err);
        self.report.failed += 1;
        Ok(EdgeOutcome::Failed)
    }

    /// Connect `source` → `destination` unless already connected.
    ///
    /// Both ports are resolved through the pass cache first, so a missing
    /// port costs one query per pass and never a mutation call. Missing
    /// ports, existing edges and rejected requests are outcomes, not
    /// errors; only an unavailable server is returned as `Err`.
    pub fn connect(&mut self, source: &str, destination: &str) -> Result<EdgeOutcome, GraphError> {
        if self.lookup(destination)?.is_none() {
            return self.missing();
        }
        match self.lookup(source)?.map(|set| set.contains(destination)) {
            None => return self.missing(),
            Some(true) => return self.unchanged(),
            Some(false) => {}
        }

        match self.graph.connect(source, destination) {
            Ok(()) => {
                debug!("connected {} -> {}", source, destination);
                self.record(source, destination, true);
                self.report.connected += 1;
                Ok(EdgeOutcome::Applied)
            }
            Err(GraphError::AlreadyConnected { .. }) => {
                self.record(source, destination, true);
                self.unchanged()
            }
            Err(GraphError::PortNotFound(port)) => {
                self.mark_missing(&port);
                self.missing()
            }
            Err(e) => self.rejected("connect", source, destination, e),
        }
    }

    /// Disconnect `source` → `destination` if connected.
    pub fn disconnect(
        &mut self,
        source: &str,
        destination: &str,
    ) -> Result<EdgeOutcome, GraphError> {
        if self.lookup(destination)?.is_none() {
            return self.missing();
        }
        match self.lookup(source)?.map(|set| set.contains(destination)) {
            None => return self.missing(),
            Some(false) => return self.unchanged(),
            Some(true) => {}
        }

        match self.graph.disconnect(source, destination) {
            Ok(()) => {
                debug!("disconnected {} -> {}", source, destination);
                self.record(source, destination, false);
                self.report.disconnected += 1;
                Ok(EdgeOutcome::Applied)
            }
            Err(GraphError::NotConnected { .. }) => {
                self.record(source, destination, false);
                self.unchanged()
            }
            Err(GraphError::PortNotFound(port)) => {
                self.mark_missing(&port);
                self.missing()
            }
            Err(e) => self.rejected("disconnect", source, destination, e),
        }
    }

    /// Connect or disconnect depending on `wanted`.
    pub fn set_edge(
        &mut self,
        source: &str,
        destination: &str,
        wanted: bool,
    ) -> Result<EdgeOutcome, GraphError> {
        if wanted {
            self.connect(source, destination)
        } else {
            self.disconnect(source, destination)
        }
    }

    /// Make `mirror` (an input port) fed by exactly the sources feeding
    /// `original`: add what is missing, remove what is extra.
    pub fn replicate_connections(&mut self, original: &str, mirror: &str) -> Result<(), GraphError> {
        let wanted = self.connections(original)?;
        let current = self.connections(mirror)?;

        for source in wanted.iter().filter(|s| !current.contains(s)) {
            self.connect(source, mirror)?;
        }
        for source in current.iter().filter(|s| !wanted.contains(s)) {
            self.disconnect(source, mirror)?;
        }
        Ok(())
    }

    pub fn finish(self) -> PassReport {
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryGraph;
    use crate::types::{MediaKind, PortDirection};

    fn graph() -> MemoryGraph {
        let graph = MemoryGraph::new();
        graph.add_port(PortInfo::new("synth:out", PortDirection::Output, MediaKind::Audio));
        graph.add_port(PortInfo::new("mixer:in_a", PortDirection::Input, MediaKind::Audio));
        graph.add_port(PortInfo::new("mixer:in_b", PortDirection::Input, MediaKind::Audio));
        graph
    }

    #[test]
    fn test_connect_then_connect_again_is_unchanged() {
        let graph = graph();
        let mut session = PatchSession::new(&graph);

        assert_eq!(session.connect("synth:out", "mixer:in_a").unwrap(), EdgeOutcome::Applied);
        assert_eq!(
            session.connect("synth:out", "mixer:in_a").unwrap(),
            EdgeOutcome::AlreadyInDesiredState
        );

        let report = session.finish();
        assert_eq!(report.connected, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(graph.stats().connects, 1);
    }

    #[test]
    fn test_disconnect_absent_edge_issues_no_call() {
        let graph = graph();
        let mut session = PatchSession::new(&graph);

        assert_eq!(
            session.disconnect("synth:out", "mixer:in_b").unwrap(),
            EdgeOutcome::AlreadyInDesiredState
        );
        assert_eq!(graph.stats().disconnects, 0);
    }

    #[test]
    fn test_missing_ports_are_skipped() {
        let graph = graph();
        let mut session = PatchSession::new(&graph);

        assert_eq!(session.connect("ghost:out", "mixer:in_a").unwrap(), EdgeOutcome::PortNotFound);
        assert_eq!(session.connect("synth:out", "ghost:in").unwrap(), EdgeOutcome::PortNotFound);
        let queries = graph.stats().queries;
        // Second attempt at the missing destination is answered from the cache.
        assert_eq!(session.connect("synth:out", "ghost:in").unwrap(), EdgeOutcome::PortNotFound);
        assert_eq!(graph.stats().queries, queries);
        assert_eq!(session.finish().missing, 3);
        assert_eq!(graph.stats().connects, 0);
    }

    #[test]
    fn test_rejected_edge_does_not_stop_the_session() {
        let graph = graph();
        graph.fail_edge("synth:out", "mixer:in_a");
        let mut session = PatchSession::new(&graph);

        assert_eq!(session.connect("synth:out", "mixer:in_a").unwrap(), EdgeOutcome::Failed);
        assert_eq!(session.connect("synth:out", "mixer:in_b").unwrap(), EdgeOutcome::Applied);

        let report = session.finish();
        assert_eq!(report.failed, 1);
        assert_eq!(report.connected, 1);
        assert!(!graph.is_connected("synth:out", "mixer:in_a"));
    }

    #[test]
    fn test_unavailable_server_aborts_the_session() {
        let graph = graph();
        graph.set_unavailable(true);
        let mut session = PatchSession::new(&graph);

        let err = session.connect("synth:out", "mixer:in_a").unwrap_err();
        assert!(matches!(err, GraphError::Unavailable(_)));
    }

    #[test]
    fn test_replicate_connections_mirrors_sources() {
        let graph = graph();
        graph.add_port(PortInfo::new("drums:out", PortDirection::Output, MediaKind::Audio));
        graph.connect("synth:out", "mixer:in_a").unwrap();
        graph.connect("drums:out", "mixer:in_b").unwrap();

        let mut session = PatchSession::new(&graph);
        session.replicate_connections("mixer:in_a", "mixer:in_b").unwrap();

        assert!(graph.is_connected("synth:out", "mixer:in_b"));
        assert!(!graph.is_connected("drums:out", "mixer:in_b"));
    }

    #[test]
    fn test_xrun_monitor_take_clears_flag() {
        let monitor = XrunMonitor::new();
        assert!(!monitor.take());
        monitor.record();
        monitor.record();
        assert!(monitor.take());
        assert!(!monitor.take());
        assert_eq!(monitor.count(), 2);
    }
}
