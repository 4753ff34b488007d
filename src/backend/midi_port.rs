// MIDI port backend - OS MIDI ports through midir
//
// midir sends immediately, so events handed over ahead of time wait in an
// outbox that `service` flushes every tick. Input callbacks run on midir's
// thread and only touch a ring buffer and atomics.

use super::{AtomicDeviceStatus, Backend, BackendHealth, DeviceStatus, InputEvent};
use crate::composition::DeviceId;
use crate::error::BackendError;
use crate::messaging::{InputConsumer, InputProducer, create_input_channel};
use crate::midi::{MidiMessage, RawMidi};
use crate::scheduler::ScheduledEvent;
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use ringbuf::traits::{Consumer, Producer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const CLIENT_NAME: &str = "seqsync";

/// Messages waiting for their send time
const MAX_OUTBOX: usize = 8192;

/// How often the connected ports are checked for presence
const VERIFY_INTERVAL: Duration = Duration::from_secs(1);

/// Which OS ports a device id stands for (matched by name substring)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub device: DeviceId,
    pub output: Option<String>,
    pub input: Option<String>,
}

impl PortBinding {
    pub fn output(device: DeviceId, port: impl Into<String>) -> Self {
        Self {
            device,
            output: Some(port.into()),
            input: None,
        }
    }

    pub fn with_input(mut self, port: impl Into<String>) -> Self {
        self.input = Some(port.into());
        self
    }
}

struct Pending {
    at: Instant,
    device: DeviceId,
    bytes: RawMidi,
}

pub struct MidiPortBackend {
    name: String,
    bindings: Vec<PortBinding>,
    outputs: Vec<(DeviceId, String, MidiOutputConnection)>,
    inputs: Vec<MidiInputConnection<()>>,
    input_tx: Arc<Mutex<InputProducer>>,
    input_rx: InputConsumer,
    dropped_input: Arc<AtomicU64>,
    outbox: Vec<Pending>,
    status: AtomicDeviceStatus,
    latency: Duration,
    last_activity: Option<Instant>,
    last_verified: Option<Instant>,
}

impl MidiPortBackend {
    pub fn new(bindings: Vec<PortBinding>, input_capacity: usize) -> Self {
        let (input_tx, input_rx) = create_input_channel(input_capacity);
        Self {
            name: "midi".to_string(),
            bindings,
            outputs: Vec::new(),
            inputs: Vec::new(),
            input_tx: Arc::new(Mutex::new(input_tx)),
            input_rx,
            dropped_input: Arc::new(AtomicU64::new(0)),
            outbox: Vec::with_capacity(1024),
            status: AtomicDeviceStatus::default(),
            latency: Duration::ZERO,
            last_activity: None,
            last_verified: None,
        }
    }

    /// Fixed latency of the MIDI interface, if known
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Names of the output ports the OS currently offers
    pub fn output_port_names() -> Result<Vec<String>, BackendError> {
        let midi_out = MidiOutput::new(CLIENT_NAME)
            .map_err(|e| BackendError::Unavailable(format!("MIDI init: {}", e)))?;
        Ok(midi_out
            .ports()
            .iter()
            .filter_map(|p| midi_out.port_name(p).ok())
            .collect())
    }

    pub fn input_port_names() -> Result<Vec<String>, BackendError> {
        let midi_in = MidiInput::new(CLIENT_NAME)
            .map_err(|e| BackendError::Unavailable(format!("MIDI init: {}", e)))?;
        Ok(midi_in
            .ports()
            .iter()
            .filter_map(|p| midi_in.port_name(p).ok())
            .collect())
    }

    fn connect_output(device: DeviceId, wanted: &str) -> Result<(String, MidiOutputConnection), BackendError> {
        let midi_out = MidiOutput::new(CLIENT_NAME)
            .map_err(|e| BackendError::Unavailable(format!("MIDI init: {}", e)))?;
        let ports = midi_out.ports();
        let found = ports.iter().find_map(|p| {
            midi_out
                .port_name(p)
                .ok()
                .filter(|name| name.contains(wanted))
                .map(|name| (p.clone(), name))
        });
        let Some((port, port_name)) = found else {
            return Err(BackendError::Unavailable(format!(
                "no MIDI output matching '{}' for {}",
                wanted, device
            )));
        };
        let connection = midi_out
            .connect(&port, "seqsync-out")
            .map_err(|e| BackendError::Unavailable(format!("{}: {}", port_name, e)))?;
        log::info!("MIDI output {} -> {}", device, port_name);
        Ok((port_name, connection))
    }

    fn connect_input(&self, device: DeviceId, wanted: &str) -> Result<MidiInputConnection<()>, BackendError> {
        let mut midi_in = MidiInput::new(CLIENT_NAME)
            .map_err(|e| BackendError::Unavailable(format!("MIDI init: {}", e)))?;
        // Clock, time code and SysEx (MMC, full frames) are needed
        midi_in.ignore(Ignore::ActiveSense);
        let ports = midi_in.ports();
        let found = ports.iter().find_map(|p| {
            midi_in
                .port_name(p)
                .ok()
                .filter(|name| name.contains(wanted))
                .map(|name| (p.clone(), name))
        });
        let Some((port, port_name)) = found else {
            return Err(BackendError::Unavailable(format!(
                "no MIDI input matching '{}' for {}",
                wanted, device
            )));
        };

        let input_tx = Arc::clone(&self.input_tx);
        let dropped = Arc::clone(&self.dropped_input);
        let connection = midi_in
            .connect(
                &port,
                "seqsync-in",
                move |_timestamp, bytes, _| {
                    // MIDI callback, running on midir's thread
                    let Some(message) = MidiMessage::parse(bytes) else {
                        return;
                    };
                    let event = InputEvent {
                        device,
                        timestamp: Instant::now(),
                        message,
                    };
                    let pushed = match input_tx.try_lock() {
                        Ok(mut tx) => tx.try_push(event).is_ok(),
                        Err(_) => false,
                    };
                    if !pushed {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                },
                (),
            )
            .map_err(|e| BackendError::Unavailable(format!("{}: {}", port_name, e)))?;
        log::info!("MIDI input {} <- {}", device, port_name);
        Ok(connection)
    }

    fn send_now(&mut self, device: DeviceId, bytes: &[u8], now: Instant) -> Result<(), BackendError> {
        let Some((_, _, connection)) = self.outputs.iter_mut().find(|(d, _, _)| *d == device) else {
            return Err(BackendError::UnknownDevice(device));
        };
        connection
            .send(bytes)
            .map_err(|e| BackendError::SendFailed(e.to_string()))?;
        self.last_activity = Some(now);
        Ok(())
    }

    fn enqueue(&mut self, device: DeviceId, bytes: &[u8], at: Instant) -> Result<(), BackendError> {
        if !self.status.is_connected() {
            return Err(BackendError::Disconnected(self.name.clone()));
        }
        if !self.has_device(device) {
            return Err(BackendError::UnknownDevice(device));
        }
        let now = Instant::now();
        if at <= now {
            return self.send_now(device, bytes, now);
        }
        if self.outbox.len() >= MAX_OUTBOX {
            return Err(BackendError::SendFailed("MIDI outbox full".to_string()));
        }
        self.outbox.push(Pending {
            at,
            device,
            bytes: RawMidi::from_slice(bytes),
        });
        Ok(())
    }

    /// Every bound output port is still offered by the OS
    fn verify_ports(&self) -> bool {
        match Self::output_port_names() {
            Ok(names) => self
                .outputs
                .iter()
                .all(|(_, port_name, _)| names.iter().any(|n| n == port_name)),
            Err(_) => false,
        }
    }
}

impl Backend for MidiPortBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), BackendError> {
        self.status.set(DeviceStatus::Connecting);
        let bindings = self.bindings.clone();
        let mut outputs = Vec::new();
        let mut inputs = Vec::new();
        for binding in &bindings {
            let result = binding
                .output
                .as_deref()
                .map(|wanted| Self::connect_output(binding.device, wanted))
                .transpose()
                .and_then(|output| {
                    binding
                        .input
                        .as_deref()
                        .map(|wanted| self.connect_input(binding.device, wanted))
                        .transpose()
                        .map(|input| (output, input))
                });
            match result {
                Ok((output, input)) => {
                    if let Some((port_name, connection)) = output {
                        outputs.push((binding.device, port_name, connection));
                    }
                    inputs.extend(input);
                }
                Err(e) => {
                    log::debug!("MIDI backend start failed: {}", e);
                    self.status.set(DeviceStatus::Error);
                    return Err(e);
                }
            }
        }
        self.outputs = outputs;
        self.inputs = inputs;
        let now = Instant::now();
        self.last_activity = Some(now);
        self.last_verified = Some(now);
        self.status.set(DeviceStatus::Connected);
        Ok(())
    }

    fn stop(&mut self) {
        self.outbox.clear();
        for (_, _, connection) in self.outputs.drain(..) {
            connection.close();
        }
        for connection in self.inputs.drain(..) {
            connection.close();
        }
        self.status.set(DeviceStatus::Disconnected);
    }

    fn is_available(&self) -> bool {
        self.status.is_connected()
    }

    fn has_device(&self, device: DeviceId) -> bool {
        self.outputs.iter().any(|(d, _, _)| *d == device)
    }

    fn schedule_event(&mut self, event: &ScheduledEvent, at: Instant) -> Result<(), BackendError> {
        // Audio segments have no MIDI form
        let Some(message) = event.to_midi() else {
            return Ok(());
        };
        let raw = message.encode();
        self.enqueue(event.route.device, raw.as_slice(), at)
    }

    fn send_raw(&mut self, device: DeviceId, bytes: &[u8], at: Instant) -> Result<(), BackendError> {
        self.enqueue(device, bytes, at)
    }

    fn service(&mut self, now: Instant) {
        if self.outbox.is_empty() {
            return;
        }
        let mut outbox = std::mem::take(&mut self.outbox);
        let mut failures = 0;
        outbox.retain(|pending| {
            if pending.at > now {
                return true;
            }
            if self.send_now(pending.device, pending.bytes.as_slice(), now).is_err() {
                failures += 1;
            }
            false
        });
        self.outbox = outbox;
        if failures > 0 {
            log::debug!("{} queued MIDI message(s) could not be sent", failures);
        }
    }

    fn drain_input(&mut self, sink: &mut dyn FnMut(InputEvent)) {
        let mut received = false;
        while let Some(event) = self.input_rx.try_pop() {
            received = true;
            sink(event);
        }
        if received {
            self.last_activity = Some(Instant::now());
        }
    }

    fn query_latency(&self) -> Duration {
        self.latency
    }

    fn query_health(&mut self, now: Instant) -> BackendHealth {
        if self.status.is_connected()
            && self
                .last_verified
                .is_none_or(|at| now.saturating_duration_since(at) >= VERIFY_INTERVAL)
        {
            self.last_verified = Some(now);
            if self.verify_ports() {
                self.last_activity = Some(now);
            } else {
                log::debug!("A bound MIDI output port disappeared");
                self.status.set(DeviceStatus::Disconnected);
            }
        }
        BackendHealth {
            status: self.status.get(),
            // Input lost to a full ring buffer
            xruns: self.dropped_input.load(Ordering::Relaxed),
            last_activity: self.last_activity,
        }
    }
}
