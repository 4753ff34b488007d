// Sync controller - drives the masters and interprets slave input
//
// Owned by the transport. Transport transitions call the `on_*` hooks,
// `tick` emits clock pulses and quarter frames ahead of their due time, and
// `handle_input` turns received sync messages into `SyncAction`s the
// transport applies at the same tick boundary.

use super::midi_clock::MidiClockMaster;
use super::mmc::{MmcMaster, MmcSlave};
use super::mtc::{MtcMaster, MtcSlave, TimecodeFix};
use super::{Role, SyncAction, SyncLockState, SyncMode, SyncSettings};
use crate::backend::{Backend, InputEvent, send_message};
use crate::composition::DeviceId;
use crate::config::SyncConfig;
use crate::midi::{MidiMessage, MmcCommand};
use crate::scheduler::SongClock;
use crate::timeline::{Position, Seconds, TempoMap};
use std::time::{Duration, Instant};

/// Clock and timing inputs for one call
pub struct SyncContext<'a> {
    pub now: Instant,
    pub clock: &'a SongClock,
    pub map: &'a TempoMap,
    pub latency: Duration,
    pub horizon: Duration,
}

pub struct SyncController {
    settings: SyncSettings,
    device: DeviceId,
    lock_threshold: Seconds,
    chase_threshold: Seconds,
    signal_timeout: Duration,
    clock_master: MidiClockMaster,
    mtc_master: MtcMaster,
    mtc_slave: MtcSlave,
    mmc_master: MmcMaster,
    mmc_slave: MmcSlave,
    lock: SyncLockState,
    send_errors: u64,
}

fn send(
    backend: &mut dyn Backend,
    device: DeviceId,
    message: MidiMessage,
    at: Instant,
    errors: &mut u64,
) {
    if let Err(e) = send_message(backend, device, message, at) {
        *errors += 1;
        log::debug!("Sync output {:?} failed: {}", message, e);
    }
}

impl SyncController {
    pub fn new(config: &SyncConfig) -> Self {
        let mut controller = Self {
            settings: SyncSettings::default(),
            device: config.output_device,
            lock_threshold: config.lock_threshold_ms / 1000.0,
            chase_threshold: config.chase_threshold_ms / 1000.0,
            signal_timeout: config.signal_timeout(),
            clock_master: MidiClockMaster::new(),
            mtc_master: MtcMaster::new(config.frame_rate),
            mtc_slave: MtcSlave::new(),
            mmc_master: MmcMaster::new(config.mmc_device_id, config.frame_rate),
            mmc_slave: MmcSlave::new(config.mmc_device_id),
            lock: SyncLockState::Internal,
            send_errors: 0,
        };
        // Validated with the rest of the config
        controller.settings = config.settings;
        controller.lock = controller.idle_lock();
        controller
    }

    pub fn settings(&self) -> SyncSettings {
        self.settings
    }

    pub fn lock_state(&self) -> SyncLockState {
        self.lock
    }

    pub fn send_errors(&self) -> u64 {
        self.send_errors
    }

    fn idle_lock(&self) -> SyncLockState {
        if self.settings.is_mtc_slave() {
            SyncLockState::Waiting
        } else {
            SyncLockState::Internal
        }
    }

    pub fn apply_mode(
        &mut self,
        mode: SyncMode,
        now: Instant,
        backend: &mut dyn Backend,
    ) -> Result<(), String> {
        let mut settings = self.settings;
        settings.apply(mode);
        self.set_settings(settings, now, backend)
    }

    /// Replace all roles at once; masters that lose their role go quiet
    pub fn set_settings(
        &mut self,
        settings: SyncSettings,
        now: Instant,
        backend: &mut dyn Backend,
    ) -> Result<(), String> {
        settings.validate()?;
        let old = self.settings;
        if old.midi_clock_master && !settings.midi_clock_master {
            let (device, errors) = (self.device, &mut self.send_errors);
            self.clock_master
                .stop(&mut |m| send(backend, device, m, now, errors));
        }
        if old.mtc == Role::Master && settings.mtc != Role::Master {
            self.mtc_master.stop();
        }
        let mtc_slave_kept = old.is_mtc_slave() && settings.is_mtc_slave();
        if !mtc_slave_kept {
            self.mtc_slave.reset();
        }
        self.settings = settings;
        if !mtc_slave_kept {
            self.lock = self.idle_lock();
        }
        if old != settings {
            log::debug!("Sync settings: {}", settings);
        }
        Ok(())
    }

    fn send_mmc(&mut self, command: MmcCommand, now: Instant, backend: &mut dyn Backend) {
        if self.settings.mmc == Role::Master {
            let message = self.mmc_master.command(command);
            send(backend, self.device, message, now, &mut self.send_errors);
        }
    }

    /// Transport started or resumed at `position`
    pub fn on_start(&mut self, ctx: &SyncContext<'_>, position: Position, backend: &mut dyn Backend) {
        let (now, device) = (ctx.now, self.device);
        let seconds = ctx.clock.seconds();
        let errors = &mut self.send_errors;
        if self.settings.midi_clock_master {
            self.clock_master
                .start(position, &mut |m| send(backend, device, m, now, errors));
        }
        if self.settings.mtc == Role::Master {
            self.mtc_master
                .start(seconds, &mut |m| send(backend, device, m, now, errors));
        }
        if self.settings.mmc == Role::Master {
            let locate = self.mmc_master.locate(seconds);
            send(backend, device, locate, now, &mut self.send_errors);
            self.send_mmc(MmcCommand::Play, now, backend);
        }
        if self.settings.is_mtc_slave() {
            // A signal that went quiet while stopped gets a fresh timeout
            if self.mtc_slave.signal_lost(now, self.signal_timeout) {
                self.mtc_slave.reset();
            }
            self.mtc_slave.arm_timeout(now);
        }
    }

    pub fn on_stop(&mut self, now: Instant, backend: &mut dyn Backend) {
        let device = self.device;
        let errors = &mut self.send_errors;
        self.clock_master
            .stop(&mut |m| send(backend, device, m, now, errors));
        self.mtc_master.stop();
        self.send_mmc(MmcCommand::Stop, now, backend);
    }

    pub fn on_pause(&mut self, now: Instant, backend: &mut dyn Backend) {
        let device = self.device;
        let errors = &mut self.send_errors;
        self.clock_master
            .stop(&mut |m| send(backend, device, m, now, errors));
        self.mtc_master.stop();
        self.send_mmc(MmcCommand::Pause, now, backend);
    }

    /// Position jumped (seek, loop wrap); `running` tells whether playback continues
    pub fn on_locate(
        &mut self,
        ctx: &SyncContext<'_>,
        position: Position,
        running: bool,
        backend: &mut dyn Backend,
    ) {
        let (now, device) = (ctx.now, self.device);
        let seconds = ctx.map.time_at(position);
        let errors = &mut self.send_errors;
        if self.settings.midi_clock_master {
            self.clock_master
                .locate(position, running, &mut |m| send(backend, device, m, now, errors));
        }
        if self.settings.mtc == Role::Master {
            self.mtc_master
                .locate(seconds, running, &mut |m| send(backend, device, m, now, errors));
        }
        if self.settings.mmc == Role::Master {
            let locate = self.mmc_master.locate(seconds);
            send(backend, device, locate, now, &mut self.send_errors);
        }
    }

    pub fn on_record(&mut self, now: Instant, backend: &mut dyn Backend) {
        self.send_mmc(MmcCommand::RecordStrobe, now, backend);
    }

    pub fn on_record_exit(&mut self, now: Instant, backend: &mut dyn Backend) {
        self.send_mmc(MmcCommand::RecordExit, now, backend);
    }

    /// Emit clock pulses and quarter frames due before the next tick
    pub fn tick(&mut self, ctx: &SyncContext<'_>, backend: &mut dyn Backend) -> usize {
        if !ctx.clock.is_running() {
            return 0;
        }
        let due_at = ctx
            .now
            .checked_add(ctx.latency + ctx.horizon)
            .unwrap_or(ctx.now);
        let due = ctx.clock.seconds_at(due_at);
        let device = self.device;
        let errors = &mut self.send_errors;
        let mut emit = |m: MidiMessage, at: Seconds| {
            let instant = ctx.clock.target_instant(at, ctx.latency, ctx.now);
            send(backend, device, m, instant, errors);
        };

        let mut sent = 0;
        if self.settings.midi_clock_master {
            sent += self.clock_master.pulses_until(ctx.map, due, &mut emit);
        }
        if self.settings.mtc == Role::Master {
            sent += self.mtc_master.quarter_frames_until(due, &mut emit);
        }
        sent
    }

    /// Interpret one received message; `audible` is true while Playing or Recording
    pub fn handle_input(
        &mut self,
        ctx: &SyncContext<'_>,
        event: &InputEvent,
        audible: bool,
    ) -> Option<SyncAction> {
        match event.message {
            MidiMessage::QuarterFrame { piece, nibble } if self.settings.is_mtc_slave() => {
                let fix = self
                    .mtc_slave
                    .handle_quarter_frame(piece, nibble, event.timestamp)?;
                self.on_fix(ctx, fix, audible)
            }
            MidiMessage::MtcFullFrame(tc) if self.settings.is_mtc_slave() => {
                let fix = self.mtc_slave.handle_full_frame(tc, event.timestamp);
                self.on_fix(ctx, fix, audible)
            }
            MidiMessage::Mmc { device_id, command } if self.settings.is_mmc_slave() => {
                self.mmc_slave.handle(device_id, command)
            }
            _ => None,
        }
    }

    fn on_fix(&mut self, ctx: &SyncContext<'_>, fix: TimecodeFix, audible: bool) -> Option<SyncAction> {
        if audible {
            // Compare both clocks at the arrival instant
            let error = fix.seconds - ctx.clock.seconds_at(fix.at);
            self.lock = if error.abs() <= self.lock_threshold {
                SyncLockState::Locked
            } else {
                SyncLockState::Syncing
            };
            return Some(SyncAction::Slew(error));
        }

        if fix.running {
            let elapsed = ctx.now.saturating_duration_since(fix.at).as_secs_f64();
            self.lock = SyncLockState::Syncing;
            log::debug!("Chasing time code at {:.3}s", fix.seconds + elapsed);
            return Some(SyncAction::Chase(fix.seconds + elapsed));
        }

        if self.lock == SyncLockState::Lost {
            self.lock = SyncLockState::Waiting;
        }
        let error = fix.seconds - ctx.clock.seconds();
        (error.abs() > self.chase_threshold).then_some(SyncAction::Locate(fix.seconds))
    }

    /// Signal timeout check, once per tick
    pub fn check_signal(&mut self, now: Instant, audible: bool) -> Option<SyncAction> {
        if !self.settings.is_mtc_slave() || !audible {
            return None;
        }
        if self.mtc_slave.signal_lost(now, self.signal_timeout) {
            self.mtc_slave.reset();
            self.lock = SyncLockState::Lost;
            log::debug!(
                "No time code for more than {} ms",
                self.signal_timeout.as_millis()
            );
            return Some(SyncAction::SignalLost);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VirtualBackend;
    use crate::sync::{FrameRate, Timecode};

    fn controller(mode: SyncMode) -> (SyncController, VirtualBackend) {
        let mut config = SyncConfig::default();
        config.settings.apply(mode);
        (SyncController::new(&config), VirtualBackend::new([DeviceId(0)]))
    }

    fn input(at: Instant, message: MidiMessage) -> InputEvent {
        InputEvent {
            device: DeviceId(0),
            timestamp: at,
            message,
        }
    }

    #[test]
    fn test_clock_master_start_and_pulses() {
        let (mut sync, mut backend) = controller(SyncMode::InternalClockMaster);
        let probe = backend.probe();
        let map = TempoMap::default();
        let t0 = Instant::now();
        let mut clock = SongClock::new(t0, 0.005);
        clock.start(t0);
        let ctx = SyncContext {
            now: t0,
            clock: &clock,
            map: &map,
            latency: Duration::ZERO,
            horizon: Duration::from_millis(100),
        };
        sync.on_start(&ctx, Position::ZERO, &mut backend);
        let sent = sync.tick(&ctx, &mut backend);
        // Pulses every 1/48 s at 120 bpm: 0.0 ..= 0.1 holds 5
        assert_eq!(sent, 5);
        let messages = probe.sent_messages();
        assert_eq!(messages[0], MidiMessage::Start);
        assert_eq!(messages[1], MidiMessage::TimingClock);
    }

    #[test]
    fn test_mtc_slave_chases_when_stopped() {
        let (mut sync, _backend) = controller(SyncMode::MtcSlave);
        assert_eq!(sync.lock_state(), SyncLockState::Waiting);
        let map = TempoMap::default();
        let t0 = Instant::now();
        let clock = SongClock::new(t0, 0.005);
        let ctx = SyncContext {
            now: t0,
            clock: &clock,
            map: &map,
            latency: Duration::ZERO,
            horizon: Duration::ZERO,
        };
        let tc = Timecode::new(0, 0, 20, 0, FrameRate::Fps25);
        let mut action = None;
        for piece in 0..8 {
            let qf = MidiMessage::quarter_frame(&tc, piece);
            action = sync.handle_input(&ctx, &input(t0, qf), false);
        }
        match action {
            Some(SyncAction::Chase(seconds)) => assert!((seconds - 20.07).abs() < 1e-9),
            other => panic!("expected chase, got {:?}", other),
        }
        assert_eq!(sync.lock_state(), SyncLockState::Syncing);
    }

    #[test]
    fn test_mtc_slave_slews_when_audible() {
        let (mut sync, _backend) = controller(SyncMode::MtcSlave);
        let map = TempoMap::default();
        let t0 = Instant::now();
        let mut clock = SongClock::new(t0, 0.005);
        clock.anchor(t0, 10.0);
        clock.start(t0);
        let ctx = SyncContext {
            now: t0,
            clock: &clock,
            map: &map,
            latency: Duration::ZERO,
            horizon: Duration::ZERO,
        };
        let fix = MidiMessage::MtcFullFrame(Timecode::new(0, 0, 10, 1, FrameRate::Fps25));
        match sync.handle_input(&ctx, &input(t0, fix), true) {
            Some(SyncAction::Slew(error)) => assert!((error - 0.04).abs() < 1e-9),
            other => panic!("expected slew, got {:?}", other),
        }
        assert_eq!(sync.lock_state(), SyncLockState::Syncing);

        let exact = MidiMessage::MtcFullFrame(Timecode::new(0, 0, 10, 0, FrameRate::Fps25));
        sync.handle_input(&ctx, &input(t0, exact), true);
        assert_eq!(sync.lock_state(), SyncLockState::Locked);
    }

    #[test]
    fn test_signal_loss_only_while_audible() {
        let (mut sync, _backend) = controller(SyncMode::MtcSlave);
        let map = TempoMap::default();
        let t0 = Instant::now();
        let mut clock = SongClock::new(t0, 0.005);
        clock.start(t0);
        let ctx = SyncContext {
            now: t0,
            clock: &clock,
            map: &map,
            latency: Duration::ZERO,
            horizon: Duration::ZERO,
        };
        let mut backend = VirtualBackend::new([DeviceId(0)]);
        sync.on_start(&ctx, Position::ZERO, &mut backend);
        let later = t0 + Duration::from_secs(4);
        assert_eq!(sync.check_signal(later, false), None);
        assert_eq!(sync.check_signal(later, true), Some(SyncAction::SignalLost));
        assert_eq!(sync.lock_state(), SyncLockState::Lost);
        // Reported once
        assert_eq!(sync.check_signal(later, true), None);
    }

    #[test]
    fn test_mmc_master_follows_transport() {
        let (mut sync, mut backend) = controller(SyncMode::MmcMaster);
        let probe = backend.probe();
        let now = Instant::now();
        sync.on_record(now, &mut backend);
        sync.on_stop(now, &mut backend);
        let messages = probe.sent_messages();
        assert_eq!(
            messages,
            vec![
                MidiMessage::Mmc {
                    device_id: 0x7F,
                    command: MmcCommand::RecordStrobe
                },
                MidiMessage::Mmc {
                    device_id: 0x7F,
                    command: MmcCommand::Stop
                },
            ]
        );
    }

    #[test]
    fn test_input_ignored_without_slave_role() {
        let (mut sync, _backend) = controller(SyncMode::MtcMaster);
        let map = TempoMap::default();
        let t0 = Instant::now();
        let clock = SongClock::new(t0, 0.005);
        let ctx = SyncContext {
            now: t0,
            clock: &clock,
            map: &map,
            latency: Duration::ZERO,
            horizon: Duration::ZERO,
        };
        let play = MidiMessage::Mmc {
            device_id: 0x7F,
            command: MmcCommand::Play,
        };
        assert_eq!(sync.handle_input(&ctx, &input(t0, play), false), None);
    }
}
