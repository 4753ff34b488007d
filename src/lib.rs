// seqsync - Library exports for the engine, tests and benchmarks

pub mod backend;
pub mod composition;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod health;
pub mod messaging;
pub mod metronome;
pub mod midi;
pub mod recording;
pub mod scheduler;
pub mod sync;
pub mod timeline;
pub mod transport;

// Re-export commonly used types for convenience
pub use backend::{Backend, VirtualBackend, VirtualProbe};
pub use composition::{Composition, DeviceId, SharedComposition, Track, TrackEvent};
pub use config::EngineConfig;
pub use engine::{DriverKind, Engine};
pub use error::{BackendError, EngineError, EngineResult, TransportError};
pub use health::{Diagnostic, HealthCondition, HealthMonitor};
pub use messaging::{Notification, TransportCommand};
pub use metronome::Metronome;
pub use scheduler::{Scheduler, ScheduledEvent, SongClock};
pub use sync::{SyncController, SyncMode, SyncSettings};
pub use timeline::{MusicalTime, Position, TempoMap, TimeSignature};
pub use transport::{LoopRange, Transport, TransportHandle, TransportState};
