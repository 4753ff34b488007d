// Backends - MIDI/audio output and input behind one capability interface
//
// The scheduler, the sync subsystem and the health monitor only ever talk
// to `dyn Backend`. Implementations:
// - `VirtualBackend`: loopback, always available (tests, headless runs)
// - `MidiPortBackend`: hardware/OS MIDI ports through midir (feature `midi`)

pub mod status;
pub mod virtual_port;

#[cfg(feature = "midi")]
pub mod midi_port;

pub use status::{AtomicDeviceStatus, DeviceStatus};
pub use virtual_port::{SentEvent, SentRaw, VirtualBackend, VirtualProbe};

#[cfg(feature = "midi")]
pub use midi_port::{MidiPortBackend, PortBinding};

use crate::composition::DeviceId;
use crate::error::BackendError;
use crate::midi::MidiMessage;
use crate::scheduler::ScheduledEvent;
use std::time::{Duration, Instant};

/// A timestamped message received from an input port
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputEvent {
    pub device: DeviceId,
    pub timestamp: Instant,
    pub message: MidiMessage,
}

/// Health snapshot reported by a backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendHealth {
    pub status: DeviceStatus,
    /// Cumulative buffer under/overruns since the backend was created
    pub xruns: u64,
    /// Last time the backend showed life (I/O done or connection verified)
    pub last_activity: Option<Instant>,
}

impl BackendHealth {
    pub fn is_connected(&self) -> bool {
        self.status == DeviceStatus::Connected
    }
}

pub trait Backend: Send {
    fn name(&self) -> &str;

    /// Open ports / streams. Called on engine start and by recovery.
    fn start(&mut self) -> Result<(), BackendError>;

    fn stop(&mut self);

    /// Ready to dispatch right now
    fn is_available(&self) -> bool;

    fn has_device(&self, device: DeviceId) -> bool;

    /// Hand over an event to be output at `at`
    fn schedule_event(&mut self, event: &ScheduledEvent, at: Instant) -> Result<(), BackendError>;

    /// Output raw bytes (clock, time code, machine control) at `at`
    fn send_raw(&mut self, device: DeviceId, bytes: &[u8], at: Instant)
    -> Result<(), BackendError>;

    /// Called once per tick before dispatch; flush anything now due
    fn service(&mut self, _now: Instant) {}

    /// Move received input into `sink`, oldest first
    fn drain_input(&mut self, sink: &mut dyn FnMut(InputEvent));

    /// Delay between handing over an event and it being heard
    fn query_latency(&self) -> Duration;

    fn query_health(&mut self, now: Instant) -> BackendHealth;

    /// Close and reopen everything
    fn restart(&mut self) -> Result<(), BackendError> {
        self.stop();
        self.start()
    }
}

/// Encode and send one message through `send_raw`
pub fn send_message(
    backend: &mut dyn Backend,
    device: DeviceId,
    message: MidiMessage,
    at: Instant,
) -> Result<(), BackendError> {
    let raw = message.encode();
    backend.send_raw(device, raw.as_slice(), at)
}
