// Virtual backend - in-process loopback
//
// Records everything it is asked to output and replays injected input.
// A `VirtualProbe` stays with the caller after the backend has been moved
// into the engine, to inspect output and to simulate faults.

use super::{AtomicDeviceStatus, Backend, BackendHealth, DeviceStatus, InputEvent};
use crate::composition::DeviceId;
use crate::error::BackendError;
use crate::midi::{MidiMessage, RawMidi};
use crate::scheduler::{EventKind, ScheduledEvent};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentEvent {
    pub event: ScheduledEvent,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentRaw {
    pub device: DeviceId,
    pub bytes: RawMidi,
    pub message: Option<MidiMessage>,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct ProbeState {
    sent: Vec<SentEvent>,
    raw: Vec<SentRaw>,
    input: VecDeque<InputEvent>,
    xruns: u64,
    stalled: bool,
    fail_restart: bool,
    restarts: u32,
    last_activity: Option<Instant>,
}

/// Test/observer side of a [`VirtualBackend`]
#[derive(Debug, Clone)]
pub struct VirtualProbe {
    state: Arc<Mutex<ProbeState>>,
    status: AtomicDeviceStatus,
}

impl VirtualProbe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn sent_events(&self) -> Vec<SentEvent> {
        self.lock().sent.clone()
    }

    pub fn sent_raw(&self) -> Vec<SentRaw> {
        self.lock().raw.clone()
    }

    /// Decoded raw messages, in send order
    pub fn sent_messages(&self) -> Vec<MidiMessage> {
        self.lock().raw.iter().filter_map(|r| r.message).collect()
    }

    /// Note-ons without a matching note-off, per (device, channel, pitch)
    ///
    /// Evaluated in timestamp order, the order a device would receive them;
    /// events with equal timestamps keep their hand-over order.
    pub fn hanging_notes(&self) -> usize {
        let state = self.lock();
        let mut wire: Vec<&SentEvent> = state.sent.iter().collect();
        wire.sort_by_key(|s| s.at);
        let mut open: Vec<(DeviceId, u8, u8)> = Vec::new();
        for sent in wire {
            let e = &sent.event;
            let Some(msg) = e.to_midi() else { continue };
            match msg {
                MidiMessage::NoteOn { channel, note, .. } => {
                    open.push((e.route.device, channel, note))
                }
                MidiMessage::NoteOff { channel, note, .. } => {
                    if let Some(i) = open
                        .iter()
                        .position(|&k| k == (e.route.device, channel, note))
                    {
                        open.remove(i);
                    }
                }
                MidiMessage::ControlChange {
                    channel,
                    controller: crate::midi::message::ALL_NOTES_OFF,
                    ..
                } => open.retain(|&(d, c, _)| !(d == e.route.device && c == channel)),
                _ => {}
            }
        }
        open.len()
    }

    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.lock()
            .sent
            .iter()
            .filter(|s| s.event.kind() == kind)
            .count()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.sent.clear();
        state.raw.clear();
    }

    pub fn inject(&self, event: InputEvent) {
        self.lock().input.push_back(event);
    }

    pub fn disconnect(&self) {
        self.status.set(DeviceStatus::Disconnected);
    }

    pub fn reconnect(&self) {
        self.status.set(DeviceStatus::Connected);
    }

    pub fn add_xruns(&self, count: u64) {
        self.lock().xruns += count;
    }

    /// A stalled backend stops reporting activity
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    pub fn set_restart_fails(&self, fail: bool) {
        self.lock().fail_restart = fail;
    }

    pub fn restart_count(&self) -> u32 {
        self.lock().restarts
    }
}

pub struct VirtualBackend {
    name: String,
    devices: Vec<DeviceId>,
    latency: Duration,
    probe: VirtualProbe,
}

impl VirtualBackend {
    pub fn new(devices: impl IntoIterator<Item = DeviceId>) -> Self {
        Self {
            name: "virtual".to_string(),
            devices: devices.into_iter().collect(),
            latency: Duration::ZERO,
            probe: VirtualProbe {
                state: Arc::new(Mutex::new(ProbeState::default())),
                status: AtomicDeviceStatus::new(DeviceStatus::Connected),
            },
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn probe(&self) -> VirtualProbe {
        self.probe.clone()
    }

    fn check_output(&self, device: DeviceId) -> Result<(), BackendError> {
        if !self.probe.status.is_connected() {
            return Err(BackendError::Disconnected(self.name.clone()));
        }
        if !self.has_device(device) {
            return Err(BackendError::UnknownDevice(device));
        }
        Ok(())
    }
}

impl Backend for VirtualBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), BackendError> {
        let mut state = self.probe.lock();
        if state.fail_restart {
            self.probe.status.set(DeviceStatus::Error);
            return Err(BackendError::RestartFailed(
                "virtual backend set to fail".to_string(),
            ));
        }
        state.stalled = false;
        state.last_activity = Some(Instant::now());
        self.probe.status.set(DeviceStatus::Connected);
        log::debug!("Virtual backend started ({} devices)", self.devices.len());
        Ok(())
    }

    fn stop(&mut self) {
        self.probe.status.set(DeviceStatus::Disconnected);
    }

    fn is_available(&self) -> bool {
        self.probe.status.is_connected()
    }

    fn has_device(&self, device: DeviceId) -> bool {
        self.devices.contains(&device)
    }

    fn schedule_event(&mut self, event: &ScheduledEvent, at: Instant) -> Result<(), BackendError> {
        self.check_output(event.route.device)?;
        self.probe.lock().sent.push(SentEvent { event: *event, at });
        Ok(())
    }

    fn send_raw(
        &mut self,
        device: DeviceId,
        bytes: &[u8],
        at: Instant,
    ) -> Result<(), BackendError> {
        self.check_output(device)?;
        let mut state = self.probe.lock();
        state.raw.push(SentRaw {
            device,
            bytes: RawMidi::from_slice(bytes),
            message: MidiMessage::parse(bytes),
            at,
        });
        Ok(())
    }

    fn drain_input(&mut self, sink: &mut dyn FnMut(InputEvent)) {
        let pending: Vec<InputEvent> = self.probe.lock().input.drain(..).collect();
        for event in pending {
            sink(event);
        }
    }

    fn query_latency(&self) -> Duration {
        self.latency
    }

    fn query_health(&mut self, now: Instant) -> BackendHealth {
        let mut state = self.probe.lock();
        // An idle loopback is alive as long as it is connected and not stalled
        if !state.stalled && self.probe.status.is_connected() {
            state.last_activity = Some(now);
        }
        BackendHealth {
            status: self.probe.status.get(),
            xruns: state.xruns,
            last_activity: state.last_activity,
        }
    }

    fn restart(&mut self) -> Result<(), BackendError> {
        self.probe.lock().restarts += 1;
        self.stop();
        self.start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::DeviceChannelRoute;
    use crate::scheduler::{EventPayload, EventSource};
    use crate::timeline::Position;

    fn note_on(device: DeviceId) -> ScheduledEvent {
        ScheduledEvent {
            dispatch_time: 0.0,
            position: Position(0),
            end: Position(480),
            payload: EventPayload::NoteOn {
                pitch: 60,
                velocity: 100,
            },
            route: DeviceChannelRoute::new(device, 0),
            source: EventSource::Track(0),
            seq: 0,
        }
    }

    #[test]
    fn test_records_events() {
        let mut backend = VirtualBackend::new([DeviceId(0)]);
        let probe = backend.probe();
        backend.schedule_event(&note_on(DeviceId(0)), Instant::now()).unwrap();
        assert_eq!(probe.sent_events().len(), 1);
        assert_eq!(probe.hanging_notes(), 1);
    }

    #[test]
    fn test_hanging_notes_follow_timestamps() {
        let mut backend = VirtualBackend::new([DeviceId(0)]);
        let probe = backend.probe();
        let t0 = Instant::now();
        let on = note_on(DeviceId(0));
        let off = ScheduledEvent {
            payload: EventPayload::NoteOff { pitch: 60 },
            ..on
        };
        // Handed over first but stamped later: the off reaches the wire first
        backend.schedule_event(&on, t0 + Duration::from_millis(5)).unwrap();
        backend.schedule_event(&off, t0).unwrap();
        assert_eq!(probe.hanging_notes(), 1);

        backend.schedule_event(&off, t0 + Duration::from_millis(5)).unwrap();
        assert_eq!(probe.hanging_notes(), 0);
    }

    #[test]
    fn test_unknown_device_rejected() {
        let mut backend = VirtualBackend::new([DeviceId(0)]);
        let err = backend
            .schedule_event(&note_on(DeviceId(7)), Instant::now())
            .unwrap_err();
        assert_eq!(err, BackendError::UnknownDevice(DeviceId(7)));
    }

    #[test]
    fn test_disconnect_and_restart() {
        let mut backend = VirtualBackend::new([DeviceId(0)]);
        let probe = backend.probe();
        probe.disconnect();
        assert!(!backend.is_available());
        assert!(backend.schedule_event(&note_on(DeviceId(0)), Instant::now()).is_err());

        backend.restart().unwrap();
        assert!(backend.is_available());
        assert_eq!(probe.restart_count(), 1);

        probe.set_restart_fails(true);
        assert!(backend.restart().is_err());
        assert_eq!(backend.query_health(Instant::now()).status, DeviceStatus::Error);
    }

    #[test]
    fn test_stalled_backend_reports_old_activity() {
        let mut backend = VirtualBackend::new([DeviceId(0)]);
        let probe = backend.probe();
        let t0 = Instant::now();
        assert_eq!(backend.query_health(t0).last_activity, Some(t0));
        probe.set_stalled(true);
        let later = t0 + Duration::from_secs(10);
        assert_eq!(backend.query_health(later).last_activity, Some(t0));
    }

    #[test]
    fn test_raw_messages_decoded() {
        let mut backend = VirtualBackend::new([DeviceId(0)]);
        let probe = backend.probe();
        backend
            .send_raw(DeviceId(0), &[0xF8], Instant::now())
            .unwrap();
        assert_eq!(probe.sent_messages(), vec![MidiMessage::TimingClock]);
    }
}
