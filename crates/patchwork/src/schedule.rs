//! Trigger predicates for the two reconciliation tasks.
//!
//! MIDI runs when a pass was requested (forced) or when the device poll
//! accumulator passes its threshold (fingerprint-gated). Audio runs only
//! when requested.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Reconciliation requested by the application since the last tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pending {
    pub midi: bool,
    pub audio: bool,
}

impl Pending {
    pub fn any(&self) -> bool {
        self.midi || self.audio
    }

    pub fn merge(self, other: Pending) -> Pending {
        Pending {
            midi: self.midi || other.midi,
            audio: self.audio || other.audio,
        }
    }
}

/// Answers "is a full pass due" once per loop tick.
pub trait PendingOracle: Send + Sync {
    /// Read and clear the pending requests.
    fn take_pending(&self) -> Pending;
}

/// Request flags set from any thread, drained by the loop.
#[derive(Debug, Default)]
pub struct RequestFlags {
    midi: AtomicBool,
    audio: AtomicBool,
}

impl RequestFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_midi(&self) {
        self.midi.store(true, Ordering::Release);
    }

    pub fn request_audio(&self) {
        self.audio.store(true, Ordering::Release);
    }

    pub fn request_all(&self) {
        self.request_midi();
        self.request_audio();
    }
}

impl PendingOracle for RequestFlags {
    fn take_pending(&self) -> Pending {
        Pending {
            midi: self.midi.swap(false, Ordering::AcqRel),
            audio: self.audio.swap(false, Ordering::AcqRel),
        }
    }
}

/// What one loop tick should run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickPlan {
    /// `Some(force)` when a MIDI pass is due.
    pub midi: Option<bool>,
    pub audio: bool,
}

/// Loop timing state: the device poll accumulator.
#[derive(Debug, Clone)]
pub struct TickSchedule {
    refresh: Duration,
    device_poll: Duration,
    since_midi: Duration,
}

impl TickSchedule {
    pub fn new(refresh: Duration, device_poll: Duration) -> Self {
        Self {
            refresh,
            device_poll,
            since_midi: Duration::ZERO,
        }
    }

    pub fn plan(&self, pending: Pending) -> TickPlan {
        let midi = if pending.midi {
            Some(true)
        } else if self.since_midi > self.device_poll {
            Some(false)
        } else {
            None
        };
        TickPlan {
            midi,
            audio: pending.audio,
        }
    }

    /// Any MIDI pass, forced or not, restarts the poll accumulator.
    pub fn midi_ran(&mut self) {
        self.since_midi = Duration::ZERO;
    }

    /// Account for one sleep interval.
    pub fn advance(&mut self) {
        self.since_midi += self.refresh;
    }
}
