//! In-process media graph.
//!
//! Behaves like a media server for reconciliation purposes (ports, edges,
//! registration generation) and counts every call made against it, which
//! makes idempotence and "no query" properties directly observable.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::GraphError;
use crate::graph::{MediaGraph, MediaServer, XrunMonitor};
use crate::types::{PortInfo, PortQuery};

/// Call counters of a [`MemoryGraph`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphStats {
    /// Port enumerations plus connection-set queries.
    pub queries: usize,
    /// Connect calls issued, successful or not.
    pub connects: usize,
    /// Disconnect calls issued, successful or not.
    pub disconnects: usize,
}

impl GraphStats {
    pub fn mutations(&self) -> usize {
        self.connects + self.disconnects
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    ports: Vec<PortInfo>,
    edges: BTreeSet<(String, String)>,
    /// Edges whose connect/disconnect is rejected with a backend error.
    failing: BTreeSet<(String, String)>,
    generation: u64,
    xruns: Option<Arc<XrunMonitor>>,
}

#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: Mutex<MemoryState>,
    queries: AtomicUsize,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    fail_mutations: AtomicBool,
    unavailable: AtomicBool,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a port. Re-registering a name replaces its attributes.
    pub fn add_port(&self, port: PortInfo) {
        let mut state = self.state();
        state.ports.retain(|p| p.name != port.name);
        state.ports.push(port);
        state.generation += 1;
    }

    /// Unregister a port and drop its edges.
    pub fn remove_port(&self, name: &str) {
        let mut state = self.state();
        let before = state.ports.len();
        state.ports.retain(|p| p.name != name);
        if state.ports.len() != before {
            state.edges.retain(|(s, d)| s != name && d != name);
            state.generation += 1;
        }
    }

    pub fn has_port(&self, name: &str) -> bool {
        self.state().ports.iter().any(|p| p.name == name)
    }

    pub fn is_connected(&self, source: &str, destination: &str) -> bool {
        self.state()
            .edges
            .contains(&(source.to_string(), destination.to_string()))
    }

    /// All edges as `(source, destination)`, sorted.
    pub fn edges(&self) -> Vec<(String, String)> {
        self.state().edges.iter().cloned().collect()
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            queries: self.queries.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.queries.store(0, Ordering::Relaxed);
        self.connects.store(0, Ordering::Relaxed);
        self.disconnects.store(0, Ordering::Relaxed);
    }

    /// Make every connect/disconnect fail with a backend error.
    pub fn fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::Relaxed);
    }

    /// Reject connect/disconnect of one edge with a backend error, as a
    /// server racing another patchbay would.
    pub fn fail_edge(&self, source: &str, destination: &str) {
        self.state()
            .failing
            .insert((source.to_string(), destination.to_string()));
    }

    pub fn clear_failures(&self) {
        self.fail_mutations(false);
        self.state().failing.clear();
    }

    /// Refuse client connections and every graph call of an open client,
    /// as a stopped server would. Port enumeration keeps working.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Fire the x-run notification of the opened client, if any.
    pub fn simulate_xrun(&self) {
        if let Some(xruns) = self.state().xruns.clone() {
            xruns.record();
        }
    }

    fn check_online(&self) -> Result<(), GraphError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(GraphError::Unavailable("memory graph offline".to_string()));
        }
        Ok(())
    }

    fn check_mutation(&self, state: &MemoryState, source: &str, destination: &str) -> Result<(), GraphError> {
        self.check_online()?;
        let edge = (source.to_string(), destination.to_string());
        if self.fail_mutations.load(Ordering::Relaxed) || state.failing.contains(&edge) {
            return Err(GraphError::Backend(format!("{} -> {} rejected", source, destination)));
        }
        for name in [source, destination] {
            if !state.ports.iter().any(|p| p.name == name) {
                return Err(GraphError::PortNotFound(name.to_string()));
            }
        }
        Ok(())
    }
}

impl MediaGraph for MemoryGraph {
    fn ports(&self, query: &PortQuery) -> Vec<PortInfo> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.state()
            .ports
            .iter()
            .filter(|p| query.matches(p))
            .cloned()
            .collect()
    }

    fn connections(&self, port: &str) -> Result<Vec<String>, GraphError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.check_online()?;
        let state = self.state();
        if !state.ports.iter().any(|p| p.name == port) {
            return Err(GraphError::PortNotFound(port.to_string()));
        }
        Ok(state
            .edges
            .iter()
            .filter_map(|(s, d)| {
                if s == port {
                    Some(d.clone())
                } else if d == port {
                    Some(s.clone())
                } else {
                    None
                }
            })
            .collect())
    }

    fn connect(&self, source: &str, destination: &str) -> Result<(), GraphError> {
        self.connects.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state();
        self.check_mutation(&state, source, destination)?;
        if !state.edges.insert((source.to_string(), destination.to_string())) {
            return Err(GraphError::AlreadyConnected {
                source_port: source.to_string(),
                destination: destination.to_string(),
            });
        }
        Ok(())
    }

    fn disconnect(&self, source: &str, destination: &str) -> Result<(), GraphError> {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state();
        self.check_mutation(&state, source, destination)?;
        if !state.edges.remove(&(source.to_string(), destination.to_string())) {
            return Err(GraphError::NotConnected {
                source_port: source.to_string(),
                destination: destination.to_string(),
            });
        }
        Ok(())
    }

    fn port_generation(&self) -> Option<u64> {
        Some(self.state().generation)
    }

    fn sample_rate(&self) -> u32 {
        48000
    }

    fn buffer_size(&self) -> u32 {
        256
    }
}

impl MediaServer for Arc<MemoryGraph> {
    fn open(
        &self,
        _client_name: &str,
        xruns: Arc<XrunMonitor>,
    ) -> Result<Box<dyn MediaGraph>, GraphError> {
        self.check_online()?;
        self.state().xruns = Some(xruns);
        Ok(Box::new(Arc::clone(self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MediaKind, PortDirection};

    #[test]
    fn test_generation_tracks_registrations() {
        let graph = MemoryGraph::new();
        assert_eq!(graph.port_generation(), Some(0));
        graph.add_port(PortInfo::new("a:out", PortDirection::Output, MediaKind::Midi));
        graph.remove_port("a:out");
        graph.remove_port("a:out");
        assert_eq!(graph.port_generation(), Some(2));
    }

    #[test]
    fn test_remove_port_drops_edges() {
        let graph = MemoryGraph::new();
        graph.add_port(PortInfo::new("a:out", PortDirection::Output, MediaKind::Midi));
        graph.add_port(PortInfo::new("b:in", PortDirection::Input, MediaKind::Midi));
        graph.connect("a:out", "b:in").unwrap();
        assert_eq!(graph.connections("b:in").unwrap(), vec!["a:out".to_string()]);

        graph.remove_port("a:out");
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn test_duplicate_connect_is_reported() {
        let graph = MemoryGraph::new();
        graph.add_port(PortInfo::new("a:out", PortDirection::Output, MediaKind::Midi));
        graph.add_port(PortInfo::new("b:in", PortDirection::Input, MediaKind::Midi));
        graph.connect("a:out", "b:in").unwrap();
        assert!(matches!(
            graph.connect("a:out", "b:in"),
            Err(GraphError::AlreadyConnected { .. })
        ));
        assert!(matches!(
            graph.disconnect("b:in", "a:out"),
            Err(GraphError::NotConnected { .. })
        ));
    }

    #[test]
    fn test_failing_edge_is_rejected_until_cleared() {
        let graph = MemoryGraph::new();
        graph.add_port(PortInfo::new("a:out", PortDirection::Output, MediaKind::Audio));
        graph.add_port(PortInfo::new("b:in", PortDirection::Input, MediaKind::Audio));
        graph.fail_edge("a:out", "b:in");

        assert!(matches!(graph.connect("a:out", "b:in"), Err(GraphError::Backend(_))));
        graph.clear_failures();
        graph.connect("a:out", "b:in").unwrap();
        assert_eq!(graph.stats().connects, 2);
    }

    #[test]
    fn test_unavailable_server_refuses_clients() {
        let graph = Arc::new(MemoryGraph::new());
        graph.set_unavailable(true);
        let result = graph.open("test", Arc::new(XrunMonitor::new()));
        assert!(matches!(result, Err(GraphError::Unavailable(_))));
        assert!(matches!(graph.connections("a:out"), Err(GraphError::Unavailable(_))));
    }
}
