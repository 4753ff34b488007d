// Transport state - states, loop range and the atomically shared view
//
// The dispatch thread owns the real state. `SharedTransportState` is a
// read-mostly mirror the GUI can poll without touching a lock.

use crate::error::TransportError;
use crate::timeline::Position;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

/// Transport state (play/stop/record/pause)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Recording,
    Paused,
}

impl TransportState {
    /// Playing or Recording: events are being dispatched
    pub fn is_playing(&self) -> bool {
        matches!(self, TransportState::Playing | TransportState::Recording)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, TransportState::Recording)
    }

    /// Stopped or Paused
    pub fn is_stopped(&self) -> bool {
        matches!(self, TransportState::Stopped | TransportState::Paused)
    }

    fn to_u8(self) -> u8 {
        match self {
            TransportState::Stopped => 0,
            TransportState::Playing => 1,
            TransportState::Recording => 2,
            TransportState::Paused => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => TransportState::Playing,
            2 => TransportState::Recording,
            3 => TransportState::Paused,
            _ => TransportState::Stopped,
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TransportState::Stopped => "stopped",
            TransportState::Playing => "playing",
            TransportState::Recording => "recording",
            TransportState::Paused => "paused",
        };
        write!(f, "{}", text)
    }
}

/// Loop region; an enabled empty range does not loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopRange {
    pub start: Position,
    pub end: Position,
    pub enabled: bool,
}

impl LoopRange {
    pub fn new(start: Position, end: Position) -> Self {
        Self {
            start,
            end,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Enabled and non-empty
    pub fn is_active(&self) -> bool {
        self.enabled && self.start < self.end
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if self.enabled && self.start > self.end {
            return Err(TransportError::InvalidLoop {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

/// Lock-free mirror of the transport for other threads
#[derive(Debug, Default)]
pub struct SharedTransportState {
    state: AtomicU8,
    position_ticks: AtomicU64,
    seconds_bits: AtomicU64,
    loop_enabled: AtomicBool,
    loop_start: AtomicU64,
    loop_end: AtomicU64,
    recording_disabled: AtomicBool,
}

impl SharedTransportState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: TransportState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    pub fn position(&self) -> Position {
        Position(self.position_ticks.load(Ordering::Relaxed))
    }

    /// Song seconds at the last tick
    pub fn seconds(&self) -> f64 {
        f64::from_bits(self.seconds_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn set_position(&self, position: Position, seconds: f64) {
        self.position_ticks.store(position.ticks(), Ordering::Relaxed);
        self.seconds_bits.store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub fn loop_range(&self) -> LoopRange {
        LoopRange {
            start: Position(self.loop_start.load(Ordering::Relaxed)),
            end: Position(self.loop_end.load(Ordering::Relaxed)),
            enabled: self.loop_enabled.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn set_loop_range(&self, range: LoopRange) {
        self.loop_start.store(range.start.ticks(), Ordering::Relaxed);
        self.loop_end.store(range.end.ticks(), Ordering::Relaxed);
        self.loop_enabled.store(range.enabled, Ordering::Relaxed);
    }

    pub fn is_recording_disabled(&self) -> bool {
        self.recording_disabled.load(Ordering::Relaxed)
    }

    pub(crate) fn set_recording_disabled(&self, disabled: bool) {
        self.recording_disabled.store(disabled, Ordering::Relaxed);
    }
}
