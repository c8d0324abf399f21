//! Device identity derivation.
//!
//! A hardware MIDI port is keyed by an identity derived from its first
//! alias, which survives re-enumeration better than the port name. ALSA
//! style aliases look like `alsa_pcm:in-hw-1-0-0-Keystep-Pro`; the
//! leading five `-` separated components describe the bus and are dropped.

use crate::types::{PortDirection, PortInfo};

/// Number of leading alias components that describe the bus, not the device.
const ALIAS_BUS_COMPONENTS: usize = 5;

/// Derive the device identity of a MIDI port.
///
/// The `IN`/`OUT` postfix of bridge labels is from the device's point of
/// view: a graph input port is where the system writes to the device, so
/// it is the device's *output*.
pub fn device_identity(port: &PortInfo) -> String {
    let Some(alias) = port.aliases.first() else {
        return port.name.clone();
    };

    let stripped = alias
        .split('-')
        .skip(ALIAS_BUS_COMPONENTS)
        .collect::<Vec<_>>()
        .join("_");

    let postfix = match port.direction {
        PortDirection::Input => "OUT",
        PortDirection::Output => "IN",
    };

    // The raw alias only names the bridge when nothing device specific
    // follows the bus components.
    let label = bridge_label(&stripped)
        .or_else(|| stripped.is_empty().then(|| bridge_label(alias)).flatten());
    if let Some(label) = label {
        return format!("{}-{}", label, postfix);
    }

    if stripped.is_empty() {
        port.name.clone()
    } else {
        stripped
    }
}

fn bridge_label(id: &str) -> Option<&'static str> {
    if id.starts_with("ttymidi:") {
        Some("DIN-5 MIDI")
    } else if id.starts_with("a2j:") {
        Some("ALSA MIDI")
    } else if id == "f_midi" {
        Some("USB MIDI")
    } else {
        None
    }
}

/// Client name an engine actually registers its MIDI ports under.
pub fn fixed_engine_port_name(jackname: &str) -> &str {
    match jackname {
        "pure_data" => "Pure Data",
        "csound6" => "Csound",
        "mod-monitor" => "mod-host",
        other => other,
    }
}
