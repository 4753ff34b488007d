// Notifications - dispatch thread → GUI
//
// Everything the GUI learns about the transport arrives here: state
// changes, throttled position reports, sync lock, health diagnostics,
// finished recordings and leveled status messages.

use crate::health::Diagnostic;
use crate::recording::RecordedSegment;
use crate::sync::{SyncLockState, SyncSettings};
use crate::timeline::{MusicalTime, Position, Seconds};
use crate::transport::{LoopRange, TransportState};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Severity of a status message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    Transport,
    Sync,
    Midi,
    Audio,
    Health,
    Recording,
    Generic,
}

/// Human-readable message with level and category
#[derive(Debug, Clone, PartialEq)]
pub struct StatusMessage {
    pub level: NotificationLevel,
    pub category: NotificationCategory,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl StatusMessage {
    pub fn new(
        level: NotificationLevel,
        category: NotificationCategory,
        text: impl Into<String>,
    ) -> Self {
        Self {
            level,
            category,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn info(category: NotificationCategory, text: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Info, category, text)
    }

    pub fn warning(category: NotificationCategory, text: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Warning, category, text)
    }

    pub fn error(category: NotificationCategory, text: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, category, text)
    }

    /// Younger than `max_age_ms`
    pub fn is_recent(&self, max_age_ms: u64) -> bool {
        let age = Utc::now().signed_duration_since(self.timestamp);
        age.num_milliseconds() < max_age_ms as i64
    }
}

/// Where the transport is, in every unit the GUI displays
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionReport {
    pub position: Position,
    pub musical: MusicalTime,
    pub seconds: Seconds,
    pub tempo: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    StateChanged {
        from: TransportState,
        to: TransportState,
    },
    Position(PositionReport),
    LoopChanged(LoopRange),
    SyncLock(SyncLockState),
    SyncSettingsChanged(SyncSettings),
    Health(Diagnostic),
    RecordingFinished {
        session: Uuid,
        segments: Vec<RecordedSegment>,
    },
    Message(StatusMessage),
}

impl Notification {
    pub fn info(category: NotificationCategory, text: impl Into<String>) -> Self {
        Notification::Message(StatusMessage::info(category, text))
    }

    pub fn warning(category: NotificationCategory, text: impl Into<String>) -> Self {
        Notification::Message(StatusMessage::warning(category, text))
    }

    pub fn error(category: NotificationCategory, text: impl Into<String>) -> Self {
        Notification::Message(StatusMessage::error(category, text))
    }

    /// The status message carried, if any
    pub fn message(&self) -> Option<&StatusMessage> {
        match self {
            Notification::Message(message) => Some(message),
            _ => None,
        }
    }
}
