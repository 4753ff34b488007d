// Recording - punch-in capture on armed tracks

pub mod session;

pub use session::{CapturedEvent, FinishedTake, RecordedSegment, RecordingSession};
