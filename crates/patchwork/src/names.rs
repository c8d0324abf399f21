//! Port names of the fixed collaborators the reconcilers wire together.
//!
//! These are external wire names (the router hub, the mixer, bridges and
//! helper clients register their ports under them), so they live here as
//! data rather than being scattered through the reconcilers.

/// Number of per-device router ports in each direction.
pub const ROUTER_DEVICE_PORTS: usize = 16;

/// Number of per-channel router outputs.
pub const MIDI_CHANNELS: u8 = 16;

pub const ROUTER_NET_IN: &str = "ZynMidiRouter:net_in";
pub const ROUTER_STEP_IN: &str = "ZynMidiRouter:step_in";
pub const ROUTER_SEQ_IN: &str = "ZynMidiRouter:seq_in";
pub const ROUTER_CTRL_IN: &str = "ZynMidiRouter:ctrl_in";
pub const ROUTER_MAIN_OUT: &str = "ZynMidiRouter:main_out";
pub const ROUTER_MIDI_OUT: &str = "ZynMidiRouter:midi_out";
pub const ROUTER_NET_OUT: &str = "ZynMidiRouter:net_out";
pub const ROUTER_STEP_OUT: &str = "ZynMidiRouter:step_out";
pub const ROUTER_CTRL_OUT: &str = "ZynMidiRouter:ctrl_out";

/// Router input fed by the device in input slot `slot`.
pub fn router_device_in(slot: usize) -> String {
    format!("ZynMidiRouter:dev{}_in", slot)
}

/// Router output feeding the device in output slot `slot`.
pub fn router_device_out(slot: usize) -> String {
    format!("ZynMidiRouter:dev{}_out", slot)
}

/// Router output carrying MIDI channel `chan` (0-based).
pub fn router_channel_out(chan: u8) -> String {
    format!("ZynMidiRouter:ch{}_out", chan)
}

pub const CV_GATE_IN: &str = "ZynMaster:midi_in";
/// Routing tag of the CV/gate sink in layer MIDI-out lists.
pub const CV_GATE_TAG: &str = "CV/Gate Out";
/// Routing tag grouping the enabled network destinations.
pub const NET_OUT_TAG: &str = "NET-OUT";

pub const QMIDINET_OUT: &str = "QmidiNet:out_1";
pub const RTPMIDI_OUT: &str = "jackrtpmidid:rtpmidi_out";
pub const TOUCHOSC_OUT: &str = "RtMidiOut Client:TouchOSC Bridge";

/// Network MIDI destinations, in wiring order.
pub const NETWORK_MIDI_IN: [&str; 3] = [
    "QmidiNet:in_1",
    "jackrtpmidid:rtpmidi_in",
    "RtMidiIn Client:TouchOSC Bridge",
];

pub const STEPSEQ_OUT: &str = "zynseq:output";
pub const STEPSEQ_IN: &str = "zynseq:input";
pub const METRONOME: &str = "zynseq:metronome";
pub const SMF_OUT: &str = "zynsmf:midi_out";
pub const SMF_IN: &str = "zynsmf:midi_in";

pub const PITCH_DETECTOR: &str = "aubio";
pub const LEGACY_MIDI_SINK: &str = "mod-host:midi_in";

pub const MIXER: &str = "zynmixer";
pub const MIXER_SEND: &str = "zynmixer:send";
pub const MIXER_RETURN: &str = "zynmixer:return";
pub const MIXER_OUT: [&str; 2] = ["zynmixer:output_a", "zynmixer:output_b"];
pub const MIXER_AUX: [&str; 2] = ["zynmixer:input_17a", "zynmixer:input_17b"];
pub const MIXER_RETURN_PAIR: [&str; 2] = ["zynmixer:return_a", "zynmixer:return_b"];
pub const MIXER_MODUI_PAIR: [&str; 2] = ["zynmixer:input_moduia", "zynmixer:input_moduib"];

/// First MIDI channel number that denotes an aux (return bus) chain.
pub const AUX_CHANNEL: u8 = 17;

/// Mixer input pair for MIDI channel `chan`: strip `chan + 1`.
pub fn mixer_input_pair(chan: u8) -> [String; 2] {
    let strip = u16::from(chan) + 1;
    [
        format!("zynmixer:input_{:02}a", strip),
        format!("zynmixer:input_{:02}b", strip),
    ]
}

pub const SYSTEM: &str = "system";
pub const SYSTEM_PLAYBACK: &str = "system:playback";
pub const SYSTEM_PLAYBACK_PAIR: [&str; 2] = ["system:playback_1", "system:playback_2"];
pub const HEADPHONES: &str = "Headphones:playback";
pub const MONITOR: &str = "mod-monitor";
pub const RECORDER_IN: [&str; 2] = ["ffmpeg:input_1", "ffmpeg:input_2"];

/// Clients whose audio inputs are never routing targets.
pub const RECORDING_SINKS: [&str; 3] = ["jack_capture", "Headphones", "mod-monitor"];
/// Client-name prefix of hosted plugin instances.
pub const PLUGIN_PREFIX: &str = "effect_";

/// Engine nickname of the chain entry that captures audio inputs.
pub const AUDIO_INPUT_NICKNAME: &str = "AI";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixer_pair_is_one_based() {
        assert_eq!(
            mixer_input_pair(3),
            ["zynmixer:input_04a".to_string(), "zynmixer:input_04b".to_string()]
        );
        assert_eq!(mixer_input_pair(0)[0], "zynmixer:input_01a");
        assert_eq!(mixer_input_pair(15)[1], "zynmixer:input_16b");
    }

    #[test]
    fn test_router_port_names() {
        assert_eq!(router_device_in(0), "ZynMidiRouter:dev0_in");
        assert_eq!(router_device_out(15), "ZynMidiRouter:dev15_out");
        assert_eq!(router_channel_out(9), "ZynMidiRouter:ch9_out");
    }
}
