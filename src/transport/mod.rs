// Transport - state machine, GUI handle and shared state

pub mod handle;
pub mod machine;
pub mod state;

pub use handle::TransportHandle;
pub use machine::Transport;
pub use state::{LoopRange, SharedTransportState, TransportState};
