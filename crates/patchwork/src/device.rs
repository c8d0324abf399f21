//! Device abstraction library seam.
//!
//! The native device library owns per-device channel filtering and the
//! router's THRU/bypass switches. We only read two flags per input slot and
//! flip a couple of switches.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// Channel filter mode of an input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    /// Events are rechannelized to the active chain.
    ActiveChannel,
    /// Every channel goes to the active chain.
    Omni,
    /// Channels are passed through untouched.
    Multi,
}

impl ChannelMode {
    /// Active-channel takes precedence over omni; multi is the default.
    pub fn from_flags(active_channel: bool, omni: bool) -> Self {
        if active_channel {
            ChannelMode::ActiveChannel
        } else if omni {
            ChannelMode::Omni
        } else {
            ChannelMode::Multi
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChannelMode::ActiveChannel => "ACTI",
            ChannelMode::Omni => "OMNI",
            ChannelMode::Multi => "MULTI",
        }
    }
}

pub trait DeviceLibrary: Send + Sync {
    fn active_channel_flag(&self, slot: usize) -> bool;

    fn omni_flag(&self, slot: usize) -> bool;

    fn set_midi_thru(&self, enabled: bool);

    /// Route input slot `slot` around the router (a driver claimed it).
    fn set_extdev_routing(&self, slot: usize, bypass: bool);
}

#[derive(Debug, Default)]
struct DeviceFlags {
    active_channel: BTreeSet<usize>,
    omni: BTreeSet<usize>,
    midi_thru: Option<bool>,
    claimed: BTreeSet<usize>,
}

/// Device library kept in memory. Records the switches it is asked to flip.
#[derive(Debug, Default)]
pub struct MemoryDevices {
    flags: Mutex<DeviceFlags>,
}

impl MemoryDevices {
    pub fn new() -> Self {
        Self::default()
    }

    fn flags(&self) -> MutexGuard<'_, DeviceFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_active_channel(&self, slot: usize, on: bool) {
        let mut flags = self.flags();
        if on {
            flags.active_channel.insert(slot);
        } else {
            flags.active_channel.remove(&slot);
        }
    }

    pub fn set_omni(&self, slot: usize, on: bool) {
        let mut flags = self.flags();
        if on {
            flags.omni.insert(slot);
        } else {
            flags.omni.remove(&slot);
        }
    }

    /// Last THRU value pushed, if any.
    pub fn midi_thru(&self) -> Option<bool> {
        self.flags().midi_thru
    }

    pub fn is_claimed(&self, slot: usize) -> bool {
        self.flags().claimed.contains(&slot)
    }
}

impl DeviceLibrary for MemoryDevices {
    fn active_channel_flag(&self, slot: usize) -> bool {
        self.flags().active_channel.contains(&slot)
    }

    fn omni_flag(&self, slot: usize) -> bool {
        self.flags().omni.contains(&slot)
    }

    fn set_midi_thru(&self, enabled: bool) {
        self.flags().midi_thru = Some(enabled);
    }

    fn set_extdev_routing(&self, slot: usize, bypass: bool) {
        let mut flags = self.flags();
        if bypass {
            flags.claimed.insert(slot);
        } else {
            flags.claimed.remove(&slot);
        }
    }
}

impl<D: DeviceLibrary + ?Sized> DeviceLibrary for std::sync::Arc<D> {
    fn active_channel_flag(&self, slot: usize) -> bool {
        (**self).active_channel_flag(slot)
    }

    fn omni_flag(&self, slot: usize) -> bool {
        (**self).omni_flag(slot)
    }

    fn set_midi_thru(&self, enabled: bool) {
        (**self).set_midi_thru(enabled)
    }

    fn set_extdev_routing(&self, slot: usize, bypass: bool) {
        (**self).set_extdev_routing(slot, bypass)
    }
}
