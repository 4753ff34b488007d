// Scheduler - Song clock, event queue and look-ahead dispatch

pub mod clock;
pub mod dispatch;
pub mod event;
pub mod queue;

pub use clock::SongClock;
pub use dispatch::{Scheduler, SchedulerStatus, SoundingVoice, TickWindow, Voice};
pub use event::{ClickAccent, EventKind, EventPayload, EventSource, ScheduledEvent, SegmentBoundary};
pub use queue::EventQueue;
