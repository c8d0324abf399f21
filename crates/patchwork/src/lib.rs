//! Patchwork - autoconnect engine for a JACK based music workstation.
//!
//! Keeps the live audio/MIDI graph in line with what the chain topology,
//! the routing policy and the attached devices call for:
//!
//! - [`midi`] wires MIDI devices to the router's per-device slots and the
//!   router to chain entry engines. Runs on demand or when the device set
//!   changes.
//! - [`audio`] wires layer outputs to the mixer, system outputs and other
//!   layers. Runs on demand only.
//! - [`service`] owns the media-server connection, the reconciliation lock
//!   and the background loop.
//!
//! The media server, the chain manager and the device library are reached
//! through the [`MediaGraph`], [`ChainTopology`] and [`DeviceLibrary`]
//! traits. [`MemoryGraph`] is an in-process graph used by tests and
//! embedders; the JACK backend is behind the `jack` feature.

pub mod audio;
pub mod device;
pub mod error;
pub mod graph;
pub mod identity;
#[cfg(feature = "jack")]
pub mod jack_graph;
pub mod memory;
pub mod midi;
pub mod names;
pub mod schedule;
pub mod service;
pub mod slots;
pub mod topology;
pub mod types;

pub use audio::{
    audio_capture_ports, audio_connect_aux, audio_connect_recorder, audio_disconnect_sysout,
    audio_input_ports, audio_playback_ports, layer_audio_destinations, AudioContext, AudioReconciler,
};
pub use device::{ChannelMode, DeviceLibrary, MemoryDevices};
pub use error::{AutoconnectError, GraphError};
pub use graph::{EdgeOutcome, MediaGraph, MediaServer, PassReport, PatchSession, XrunMonitor};
pub use identity::{device_identity, fixed_engine_port_name};
#[cfg(feature = "jack")]
pub use jack_graph::{JackGraph, JackServer};
pub use memory::{GraphStats, MemoryGraph};
pub use midi::{fingerprint, hw_destination_ports, hw_source_ports, MidiContext, MidiReconciler};
pub use schedule::{Pending, PendingOracle, RequestFlags, TickPlan, TickSchedule};
pub use service::{Autoconnect, AutoconnectConfig};
pub use slots::{DeviceDirection, DeviceSlotTable, SlotAssignment, SlotEntry, DEVICE_SLOTS};
pub use topology::{ChainTopology, EngineInfo, EngineKind, Layer, StaticTopology, TopologySnapshot};
pub use types::{MediaKind, PortDirection, PortInfo, PortQuery};
