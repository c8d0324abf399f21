//! Bootstrap configuration - seeds the runtime routing policy, then the
//! running service owns it (the UI edits it through the service API).

use serde::{Deserialize, Serialize};

/// MIDI routing policy consumed by the MIDI reconciler.
///
/// Identity lists hold device identities as derived from port aliases, e.g.
/// `"DIN-5 MIDI-OUT"`. Either the spaced spelling or the underscored one
/// (`"DIN-5_MIDI-OUT"`) matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Hardware/network MIDI destinations that receive the router THRU output.
    #[serde(default)]
    pub enabled_midi_out_ports: Vec<String>,

    /// MIDI sources whose input is not routed into the router.
    #[serde(default)]
    pub disabled_midi_in_ports: Vec<String>,

    /// MIDI destinations that receive controller feedback.
    #[serde(default)]
    pub enabled_midi_fb_ports: Vec<String>,

    /// Router THRU (forward filtered input to outputs).
    #[serde(default)]
    pub midi_thru: bool,

    /// QmidiNet network bridge.
    #[serde(default)]
    pub midi_network: bool,

    /// RTP-MIDI bridge.
    #[serde(default)]
    pub midi_rtpmidi: bool,

    /// TouchOSC bridge.
    #[serde(default)]
    pub midi_touchosc: bool,

    /// Audio-to-MIDI pitch detector.
    #[serde(default)]
    pub midi_aubionotes: bool,
}

impl RoutingConfig {
    pub fn is_output_enabled(&self, identity: &str) -> bool {
        lists_identity(&self.enabled_midi_out_ports, identity)
    }

    pub fn is_input_disabled(&self, identity: &str) -> bool {
        lists_identity(&self.disabled_midi_in_ports, identity)
    }

    pub fn is_feedback_enabled(&self, identity: &str) -> bool {
        lists_identity(&self.enabled_midi_fb_ports, identity)
    }

    /// Enable or disable routing of a MIDI source. Returns true if the
    /// policy changed.
    pub fn set_input_enabled(&mut self, identity: &str, enabled: bool) -> bool {
        set_listed(&mut self.disabled_midi_in_ports, identity, !enabled)
    }

    pub fn set_output_enabled(&mut self, identity: &str, enabled: bool) -> bool {
        set_listed(&mut self.enabled_midi_out_ports, identity, enabled)
    }

    pub fn set_feedback_enabled(&mut self, identity: &str, enabled: bool) -> bool {
        set_listed(&mut self.enabled_midi_fb_ports, identity, enabled)
    }
}

fn same_identity(entry: &str, identity: &str) -> bool {
    entry == identity || entry == identity.replace(' ', "_")
}

fn lists_identity(list: &[String], identity: &str) -> bool {
    list.iter().any(|entry| same_identity(entry, identity))
}

fn set_listed(list: &mut Vec<String>, identity: &str, listed: bool) -> bool {
    let present = lists_identity(list, identity);
    if listed && !present {
        list.push(identity.to_string());
        true
    } else if !listed && present {
        list.retain(|entry| !same_identity(entry, identity));
        true
    } else {
        false
    }
}

/// All bootstrap configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub routing: RoutingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_underscored_spelling_matches() {
        let routing = RoutingConfig {
            enabled_midi_out_ports: vec!["DIN-5_MIDI-OUT".to_string()],
            ..Default::default()
        };
        assert!(routing.is_output_enabled("DIN-5 MIDI-OUT"));
        assert!(routing.is_output_enabled("DIN-5_MIDI-OUT"));
        assert!(!routing.is_output_enabled("USB MIDI-OUT"));
    }

    #[test]
    fn test_set_input_enabled_toggles_disabled_list() {
        let mut routing = RoutingConfig::default();
        assert!(routing.set_input_enabled("Keystep Pro", false));
        assert!(routing.is_input_disabled("Keystep Pro"));
        assert!(!routing.set_input_enabled("Keystep Pro", false));
        assert!(routing.set_input_enabled("Keystep Pro", true));
        assert!(routing.disabled_midi_in_ports.is_empty());
    }

    #[test]
    fn test_removing_by_spaced_name_drops_underscored_entry() {
        let mut routing = RoutingConfig {
            enabled_midi_fb_ports: vec!["Launchpad_Mini".to_string()],
            ..Default::default()
        };
        assert!(routing.set_feedback_enabled("Launchpad Mini", false));
        assert!(routing.enabled_midi_fb_ports.is_empty());
    }
}
