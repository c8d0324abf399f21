//! Device slot table.
//!
//! Fixed-capacity arrays mapping device identities to stable slot numbers.
//! Slot `n` of the input side is wired to router `dev{n}_in`, slot `n` of
//! the output side is fed by router `dev{n}_out`.
//!
//! The MIDI reconciler is the only writer. Device drivers and the UI read
//! from other threads and see the state of the last completed pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::device::{ChannelMode, DeviceLibrary};

/// Slots per direction.
pub const DEVICE_SLOTS: usize = 16;

/// Direction from the device's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    /// The device sends MIDI into the system.
    Input,
    /// The device receives MIDI from the system.
    Output,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlotEntry {
    pub identity: Option<String>,
    pub display_name: Option<String>,
    /// Cached channel mode; input slots only.
    pub mode: Option<ChannelMode>,
}

impl SlotEntry {
    fn clear(&mut self) {
        *self = SlotEntry::default();
    }
}

/// Result of [`DeviceSlotTable::assign_or_lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAssignment {
    pub slot: usize,
    /// The identity was not in the table before this call.
    pub new: bool,
}

#[derive(Debug, Default)]
struct Slots {
    inputs: [SlotEntry; DEVICE_SLOTS],
    outputs: [SlotEntry; DEVICE_SLOTS],
}

impl Slots {
    fn side(&self, direction: DeviceDirection) -> &[SlotEntry; DEVICE_SLOTS] {
        match direction {
            DeviceDirection::Input => &self.inputs,
            DeviceDirection::Output => &self.outputs,
        }
    }

    fn side_mut(&mut self, direction: DeviceDirection) -> &mut [SlotEntry; DEVICE_SLOTS] {
        match direction {
            DeviceDirection::Input => &mut self.inputs,
            DeviceDirection::Output => &mut self.outputs,
        }
    }
}

#[derive(Debug, Default)]
pub struct DeviceSlotTable {
    slots: RwLock<Slots>,
    changed: AtomicBool,
}

impl DeviceSlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Slot of `identity`, allocating the lowest free one if it has none.
    ///
    /// Returns `None` when the table is full; the device stays unmanaged.
    pub fn assign_or_lookup(
        &self,
        direction: DeviceDirection,
        identity: &str,
        display_name: &str,
    ) -> Option<SlotAssignment> {
        let mut slots = self.write();
        let side = slots.side_mut(direction);

        if let Some(slot) = side
            .iter()
            .position(|e| e.identity.as_deref() == Some(identity))
        {
            return Some(SlotAssignment { slot, new: false });
        }

        match side.iter().position(|e| e.identity.is_none()) {
            Some(slot) => {
                side[slot] = SlotEntry {
                    identity: Some(identity.to_string()),
                    display_name: Some(display_name.to_string()),
                    mode: None,
                };
                debug!("{:?} slot {} -> {}", direction, slot, identity);
                Some(SlotAssignment { slot, new: true })
            }
            None => {
                warn!(
                    "no free {:?} device slot for {}, leaving it unmanaged",
                    direction, identity
                );
                None
            }
        }
    }

    /// Clear every slot whose identity is not in `seen`. Returns the freed
    /// identities.
    pub fn free_unseen(&self, direction: DeviceDirection, seen: &[String]) -> Vec<String> {
        let mut slots = self.write();
        let mut freed = Vec::new();
        for entry in slots.side_mut(direction).iter_mut() {
            let Some(identity) = entry.identity.as_deref() else {
                // Empty slots may still carry a mode from the startup refresh.
                entry.clear();
                continue;
            };
            if !seen.iter().any(|s| s == identity) {
                debug!("{:?} device gone: {}", direction, identity);
                freed.push(identity.to_string());
                entry.clear();
            }
        }
        freed
    }

    pub fn lookup(&self, direction: DeviceDirection, slot: usize) -> Option<String> {
        self.read()
            .side(direction)
            .get(slot)
            .and_then(|e| e.identity.clone())
    }

    pub fn lookup_by_identity(&self, direction: DeviceDirection, identity: &str) -> Option<usize> {
        self.read()
            .side(direction)
            .iter()
            .position(|e| e.identity.as_deref() == Some(identity))
    }

    pub fn display_name(&self, direction: DeviceDirection, slot: usize) -> Option<String> {
        self.read()
            .side(direction)
            .get(slot)
            .and_then(|e| e.display_name.clone())
    }

    /// Replace the display name of an occupied slot. Returns false for an
    /// empty or out-of-range slot.
    pub fn set_display_name(&self, direction: DeviceDirection, slot: usize, name: &str) -> bool {
        let mut slots = self.write();
        match slots.side_mut(direction).get_mut(slot) {
            Some(entry) if entry.identity.is_some() => {
                entry.display_name = Some(name.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn entry(&self, direction: DeviceDirection, slot: usize) -> Option<SlotEntry> {
        self.read().side(direction).get(slot).cloned()
    }

    /// Occupied slots as `(slot, identity)`.
    pub fn occupied(&self, direction: DeviceDirection) -> Vec<(usize, String)> {
        self.read()
            .side(direction)
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.identity.clone().map(|id| (i, id)))
            .collect()
    }

    pub fn channel_mode(&self, slot: usize) -> Option<ChannelMode> {
        self.read().inputs.get(slot).and_then(|e| e.mode)
    }

    /// Re-read the channel mode of input slot `slot` from the device library.
    pub fn refresh_mode(&self, slot: usize, devices: &dyn DeviceLibrary) {
        if slot >= DEVICE_SLOTS {
            return;
        }
        let mode = ChannelMode::from_flags(devices.active_channel_flag(slot), devices.omni_flag(slot));
        self.write().inputs[slot].mode = Some(mode);
    }

    pub fn refresh_all_modes(&self, devices: &dyn DeviceLibrary) {
        for slot in 0..DEVICE_SLOTS {
            self.refresh_mode(slot, devices);
        }
    }

    pub fn mark_changed(&self) {
        self.changed.store(true, Ordering::Release);
    }

    /// Read-and-clear the "device set changed" flag.
    pub fn take_changed(&self) -> bool {
        self.changed.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevices;

    #[test]
    fn test_first_free_allocation_and_lookup() {
        let table = DeviceSlotTable::new();
        let a = table.assign_or_lookup(DeviceDirection::Input, "A", "a:port").unwrap();
        let b = table.assign_or_lookup(DeviceDirection::Input, "B", "b:port").unwrap();
        assert_eq!((a.slot, a.new), (0, true));
        assert_eq!((b.slot, b.new), (1, true));

        let again = table.assign_or_lookup(DeviceDirection::Input, "A", "a:port").unwrap();
        assert_eq!((again.slot, again.new), (0, false));

        assert_eq!(table.lookup(DeviceDirection::Input, 1).as_deref(), Some("B"));
        assert_eq!(table.lookup_by_identity(DeviceDirection::Input, "B"), Some(1));
        assert_eq!(table.lookup_by_identity(DeviceDirection::Output, "B"), None);
        assert_eq!(table.lookup(DeviceDirection::Input, 99), None);
    }

    #[test]
    fn test_freed_slot_is_reused() {
        let table = DeviceSlotTable::new();
        table.assign_or_lookup(DeviceDirection::Output, "A", "a").unwrap();
        table.assign_or_lookup(DeviceDirection::Output, "B", "b").unwrap();

        let freed = table.free_unseen(DeviceDirection::Output, &["B".to_string()]);
        assert_eq!(freed, vec!["A".to_string()]);

        let c = table.assign_or_lookup(DeviceDirection::Output, "C", "c").unwrap();
        assert_eq!(c.slot, 0);
        assert_eq!(table.lookup_by_identity(DeviceDirection::Output, "B"), Some(1));
    }

    #[test]
    fn test_full_table_leaves_device_unmanaged() {
        let table = DeviceSlotTable::new();
        for i in 0..DEVICE_SLOTS {
            table.assign_or_lookup(DeviceDirection::Input, &format!("dev{}", i), "p").unwrap();
        }
        assert!(table.assign_or_lookup(DeviceDirection::Input, "late", "p").is_none());
        assert_eq!(table.occupied(DeviceDirection::Input).len(), DEVICE_SLOTS);
        assert_eq!(table.lookup(DeviceDirection::Input, 15).as_deref(), Some("dev15"));
    }

    #[test]
    fn test_display_name_and_mode() {
        let table = DeviceSlotTable::new();
        let devices = MemoryDevices::new();
        devices.set_omni(0, true);

        table.assign_or_lookup(DeviceDirection::Input, "Keystep", "system:midi_capture_1").unwrap();
        table.refresh_mode(0, &devices);
        assert_eq!(table.channel_mode(0), Some(ChannelMode::Omni));
        assert_eq!(
            table.display_name(DeviceDirection::Input, 0).as_deref(),
            Some("system:midi_capture_1")
        );

        assert!(table.set_display_name(DeviceDirection::Input, 0, "Keystep Pro"));
        assert!(!table.set_display_name(DeviceDirection::Input, 5, "nobody"));
        assert_eq!(table.display_name(DeviceDirection::Input, 0).as_deref(), Some("Keystep Pro"));

        table.free_unseen(DeviceDirection::Input, &[]);
        assert_eq!(table.entry(DeviceDirection::Input, 0), Some(SlotEntry::default()));
    }

    #[test]
    fn test_changed_flag_reads_and_clears() {
        let table = DeviceSlotTable::new();
        assert!(!table.take_changed());
        table.mark_changed();
        assert!(table.take_changed());
        assert!(!table.take_changed());
    }
}
