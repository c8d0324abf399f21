//! JACK backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use jack::{AsyncClient, Client, ClientOptions, Control, NotificationHandler, PortFlags, PortId};

use crate::error::GraphError;
use crate::graph::{MediaGraph, MediaServer, XrunMonitor};
use crate::types::{MediaKind, PortDirection, PortInfo, PortQuery};

const AUDIO_TYPE: &str = "audio";
const MIDI_TYPE: &str = "midi";

/// Notification handler. Runs on JACK's notification thread, so it only
/// touches atomics.
pub struct Notifications {
    xruns: Arc<XrunMonitor>,
    generation: Arc<AtomicU64>,
}

impl NotificationHandler for Notifications {
    fn xrun(&mut self, _: &Client) -> Control {
        self.xruns.record();
        Control::Continue
    }

    fn port_registration(&mut self, _: &Client, _port_id: PortId, _is_registered: bool) {
        self.generation.fetch_add(1, Ordering::Release);
    }
}

/// Connects to a running JACK server; never starts one.
#[derive(Debug, Default, Clone, Copy)]
pub struct JackServer;

impl MediaServer for JackServer {
    fn open(
        &self,
        client_name: &str,
        xruns: Arc<XrunMonitor>,
    ) -> Result<Box<dyn MediaGraph>, GraphError> {
        let (client, _status) = Client::new(client_name, ClientOptions::NO_START_SERVER)
            .map_err(|e| GraphError::Unavailable(e.to_string()))?;

        let generation = Arc::new(AtomicU64::new(0));
        let handler = Notifications {
            xruns,
            generation: Arc::clone(&generation),
        };
        let client = client
            .activate_async(handler, ())
            .map_err(|e| GraphError::Backend(e.to_string()))?;

        Ok(Box::new(JackGraph {
            client: Mutex::new(client),
            generation,
        }))
    }
}

pub struct JackGraph {
    client: Mutex<AsyncClient<Notifications, ()>>,
    generation: Arc<AtomicU64>,
}

impl JackGraph {
    fn client(&self) -> MutexGuard<'_, AsyncClient<Notifications, ()>> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn port_info(client: &Client, name: &str) -> Option<PortInfo> {
        let port = client.port_by_name(name)?;
        let flags = port.flags();
        let direction = if flags.contains(PortFlags::IS_INPUT) {
            PortDirection::Input
        } else {
            PortDirection::Output
        };
        let kind = match port.port_type() {
            Ok(t) if t.contains(MIDI_TYPE) => MediaKind::Midi,
            _ => MediaKind::Audio,
        };
        Some(PortInfo {
            name: name.to_string(),
            direction,
            kind,
            physical: flags.contains(PortFlags::IS_PHYSICAL),
            aliases: port.aliases().unwrap_or_default(),
        })
    }
}

/// JACK takes port name patterns as regular expressions.
fn escape_pattern(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Turn a failed (dis)connect into the graph state that explains it.
///
/// JACK reports a duplicate connect (EEXIST), a missing edge and a port
/// that vanished mid-call with the same error type, so look at the graph
/// again instead of decoding the error.
fn classify_failure(
    client: &Client,
    source: &str,
    destination: &str,
    connecting: bool,
    err: jack::Error,
) -> GraphError {
    let Some(port) = client.port_by_name(source) else {
        return GraphError::PortNotFound(source.to_string());
    };
    if client.port_by_name(destination).is_none() {
        return GraphError::PortNotFound(destination.to_string());
    }
    match port.is_connected_to(destination) {
        Ok(true) if connecting => GraphError::AlreadyConnected {
            source_port: source.to_string(),
            destination: destination.to_string(),
        },
        Ok(false) if !connecting => GraphError::NotConnected {
            source_port: source.to_string(),
            destination: destination.to_string(),
        },
        _ => GraphError::Backend(err.to_string()),
    }
}

impl MediaGraph for JackGraph {
    fn ports(&self, query: &PortQuery) -> Vec<PortInfo> {
        let guard = self.client();
        let client = guard.as_client();

        let pattern = query.name.as_deref().map(escape_pattern);
        let type_pattern = query.kind.map(|k| match k {
            MediaKind::Audio => AUDIO_TYPE,
            MediaKind::Midi => MIDI_TYPE,
        });
        let mut flags = match query.direction {
            Some(PortDirection::Input) => PortFlags::IS_INPUT,
            Some(PortDirection::Output) => PortFlags::IS_OUTPUT,
            None => PortFlags::empty(),
        };
        if query.physical == Some(true) {
            flags |= PortFlags::IS_PHYSICAL;
        }

        client
            .ports(pattern.as_deref(), type_pattern, flags)
            .iter()
            .filter_map(|name| Self::port_info(client, name))
            .filter(|port| query.matches(port))
            .collect()
    }

    fn connections(&self, port: &str) -> Result<Vec<String>, GraphError> {
        let guard = self.client();
        let client = guard.as_client();
        let info = Self::port_info(client, port).ok_or_else(|| GraphError::PortNotFound(port.to_string()))?;
        let handle = client
            .port_by_name(port)
            .ok_or_else(|| GraphError::PortNotFound(port.to_string()))?;

        let peers = match info.direction {
            PortDirection::Input => PortFlags::IS_OUTPUT,
            PortDirection::Output => PortFlags::IS_INPUT,
        };
        let type_pattern = match info.kind {
            MediaKind::Audio => AUDIO_TYPE,
            MediaKind::Midi => MIDI_TYPE,
        };
        Ok(client
            .ports(None, Some(type_pattern), peers)
            .into_iter()
            .filter(|peer| handle.is_connected_to(peer).unwrap_or(false))
            .collect())
    }

    fn connect(&self, source: &str, destination: &str) -> Result<(), GraphError> {
        let guard = self.client();
        let client = guard.as_client();
        client
            .connect_ports_by_name(source, destination)
            .map_err(|e| classify_failure(client, source, destination, true, e))
    }

    fn disconnect(&self, source: &str, destination: &str) -> Result<(), GraphError> {
        let guard = self.client();
        let client = guard.as_client();
        client
            .disconnect_ports_by_name(source, destination)
            .map_err(|e| classify_failure(client, source, destination, false, e))
    }

    fn port_generation(&self) -> Option<u64> {
        Some(self.generation.load(Ordering::Acquire))
    }

    fn cpu_load(&self) -> f32 {
        self.client().as_client().cpu_load()
    }

    fn sample_rate(&self) -> u32 {
        self.client().as_client().sample_rate() as u32
    }

    fn buffer_size(&self) -> u32 {
        self.client().as_client().buffer_size()
    }
}
