// Transport commands - GUI → dispatch thread
//
// Applied at the next tick boundary, in the order they were sent.

use crate::sync::{SyncMode, SyncSettings};
use crate::timeline::Position;
use crate::transport::LoopRange;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportCommand {
    Play,
    Stop,
    Pause,
    Resume,
    Record,
    Seek(Position),
    SetLoop(LoopRange),
    SetSyncMode(SyncMode),
    SetSyncSettings(SyncSettings),
    AcknowledgeHealth,
    /// Metronome while Playing (it always clicks while Recording)
    SetMetronome(bool),
}
