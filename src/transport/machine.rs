// Transport - play/pause/record/stop/seek/loop on the dispatch thread
//
// The transport owns everything that runs per tick: song clock, scheduler,
// sync controller, health monitor, metronome and the backend. The GUI
// talks to it only through a `TransportHandle` (commands in, notifications
// out); commands are applied at the start of the next `on_tick`.
//
// Nothing here logs above debug: anything the user needs to see goes out
// as a notification and is logged on the GUI side.

use super::handle::TransportHandle;
use super::state::{LoopRange, SharedTransportState, TransportState};
use crate::backend::{Backend, InputEvent};
use crate::composition::{Composition, SharedComposition};
use crate::config::EngineConfig;
use crate::driver::DriverTelemetry;
use crate::error::{EngineResult, TransportError};
use crate::health::HealthMonitor;
use crate::messaging::{
    CommandConsumer, Notification, NotificationCategory, Notifier, PositionReport, TakeProducer,
    TransportCommand, create_command_channel, create_notification_channel, create_take_channel,
};
use crate::metronome::Metronome;
use crate::recording::{FinishedTake, RecordingSession};
use crate::scheduler::{Scheduler, SchedulerStatus, SongClock, TickWindow};
use crate::sync::{SyncAction, SyncContext, SyncController, SyncLockState, SyncMode, SyncSettings};
use crate::timeline::{Position, Seconds};
use ringbuf::traits::{Consumer, Producer};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Transport {
    config: EngineConfig,
    state: TransportState,
    shared: Arc<SharedTransportState>,
    composition: SharedComposition,
    snapshot: Arc<Composition>,
    clock: SongClock,
    /// Where the transport is while not running (the clock is frozen there)
    position: Position,
    loop_range: LoopRange,
    scheduler: Scheduler,
    sync: SyncController,
    health: HealthMonitor,
    metronome: Metronome,
    backend: Box<dyn Backend>,
    telemetry: Arc<DriverTelemetry>,
    notifier: Notifier,
    commands: CommandConsumer,
    session: Option<RecordingSession>,
    takes: TakeProducer,
    /// Closed takes the GUI side has not made room for yet
    unsent_takes: VecDeque<FinishedTake>,
    horizon: Duration,
    input_buf: Vec<InputEvent>,
    last_status: SchedulerStatus,
    last_lock: SyncLockState,
    last_report: Option<(Instant, Position)>,
}

impl Transport {
    /// Build a stopped transport and the GUI handle that drives it
    pub fn new(
        config: EngineConfig,
        composition: SharedComposition,
        backend: Box<dyn Backend>,
        now: Instant,
    ) -> EngineResult<(Self, TransportHandle)> {
        config.validate()?;
        let (command_tx, command_rx) = create_command_channel(config.capacity.commands);
        let (notification_tx, notification_rx) =
            create_notification_channel(config.capacity.notifications);
        let (take_tx, take_rx) = create_take_channel(config.capacity.finished_takes);
        let shared = SharedTransportState::new();
        let horizon = config.timing.tick_interval();
        let sync = SyncController::new(&config.sync);

        let transport = Self {
            state: TransportState::Stopped,
            shared: Arc::clone(&shared),
            snapshot: composition.snapshot(),
            composition,
            clock: SongClock::new(now, config.sync.max_correction_rate),
            position: Position::ZERO,
            loop_range: LoopRange::disabled(),
            scheduler: Scheduler::new(config.capacity.pending_events),
            last_lock: sync.lock_state(),
            sync,
            health: HealthMonitor::new(config.health.clone(), horizon),
            metronome: Metronome::new(config.metronome.clone()),
            backend,
            telemetry: Arc::new(DriverTelemetry::new()),
            notifier: Notifier::new(notification_tx),
            commands: command_rx,
            session: None,
            takes: take_tx,
            unsent_takes: VecDeque::with_capacity(config.capacity.finished_takes),
            horizon,
            input_buf: Vec::with_capacity(config.capacity.midi_input),
            last_status: SchedulerStatus::default(),
            last_report: None,
            config,
        };
        let handle = TransportHandle::new(command_tx, notification_rx, take_rx, shared);
        Ok((transport, handle))
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn shared_state(&self) -> Arc<SharedTransportState> {
        Arc::clone(&self.shared)
    }

    pub fn telemetry(&self) -> Arc<DriverTelemetry> {
        Arc::clone(&self.telemetry)
    }

    /// Musical position of the song clock
    pub fn position(&self) -> Position {
        if self.state.is_playing() {
            self.snapshot.tempo_map.position_at(self.clock.seconds())
        } else {
            self.position
        }
    }

    pub fn seconds(&self) -> Seconds {
        self.clock.seconds()
    }

    pub fn loop_range(&self) -> LoopRange {
        self.loop_range
    }

    pub fn sync_settings(&self) -> SyncSettings {
        self.sync.settings()
    }

    pub fn sync_lock_state(&self) -> SyncLockState {
        self.sync.lock_state()
    }

    pub fn is_recording_disabled(&self) -> bool {
        self.health.is_recording_disabled()
    }

    /// Status of the last tick
    pub fn scheduler_status(&self) -> &SchedulerStatus {
        &self.last_status
    }

    pub fn sounding_count(&self) -> usize {
        self.scheduler.sounding_count()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// Closed takes still waiting for room in the take channel
    pub fn unsent_takes(&self) -> usize {
        self.unsent_takes.len()
    }

    pub fn notifications_dropped(&self) -> u64 {
        self.notifier.dropped()
    }

    /// Tick period changed (timer interval or audio buffer size)
    pub fn set_tick_period(&mut self, period: Duration) {
        self.horizon = period;
        self.health.set_tick_period(period);
    }

    fn output_latency(&self) -> Duration {
        let extra = self.config.timing.extra_output_latency_ms / 1000.0;
        self.backend.query_latency() + Duration::try_from_secs_f64(extra).unwrap_or_default()
    }

    fn set_state(&mut self, to: TransportState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.shared.set_state(to);
        log::debug!("Transport {} -> {}", from, to);
        self.notifier.publish(Notification::StateChanged { from, to });
    }

    fn reject(&mut self, operation: &'static str) -> Result<(), TransportError> {
        let error = TransportError::InvalidTransition {
            from: self.state,
            operation,
        };
        log::debug!("{}", error);
        self.notifier
            .publish(Notification::warning(NotificationCategory::Transport, error.to_string()));
        Err(error)
    }

    /// Backend ready and every track routed to a device it knows
    fn check_ready(&self) -> Result<(), TransportError> {
        if !self.backend.is_available() {
            return Err(TransportError::Configuration(format!(
                "backend '{}' is not available",
                self.backend.name()
            )));
        }
        self.snapshot
            .validate_routing()
            .map_err(TransportError::Configuration)?;
        if let Some(track) = self
            .snapshot
            .tracks
            .iter()
            .find(|t| !self.backend.has_device(t.route.device))
        {
            return Err(TransportError::Configuration(format!(
                "{} '{}' routed to {} which backend '{}' does not provide",
                track.id,
                track.name,
                track.route.device,
                self.backend.name()
            )));
        }
        Ok(())
    }

    /// Start the clock at the frozen position and open a fresh window
    fn start_running(&mut self, now: Instant) -> Result<(), TransportError> {
        // Start from the latest edit
        self.refresh_snapshot(now);
        if let Err(error) = self.check_ready() {
            log::debug!("Cannot start: {}", error);
            self.notifier
                .publish(Notification::error(NotificationCategory::Transport, error.to_string()));
            return Err(error);
        }
        self.clock.start(now);
        self.scheduler.reset_window(self.position);
        let ctx = SyncContext {
            now,
            clock: &self.clock,
            map: &self.snapshot.tempo_map,
            latency: self.backend.query_latency(),
            horizon: self.horizon,
        };
        self.sync.on_start(&ctx, self.position, self.backend.as_mut());
        Ok(())
    }

    /// Stop the clock where it is, drop everything not yet dispatched
    fn freeze(&mut self, now: Instant) {
        let seconds = self.clock.freeze(now);
        self.position = self.snapshot.tempo_map.position_at(seconds);
        self.scheduler.cancel_pending();
    }

    pub fn play(&mut self, now: Instant) -> Result<(), TransportError> {
        if self.state != TransportState::Stopped {
            return self.reject("play");
        }
        self.start_running(now)?;
        self.set_state(TransportState::Playing);
        Ok(())
    }

    /// Playing → Paused; sounding notes keep their musical ends
    pub fn pause(&mut self, now: Instant) -> Result<(), TransportError> {
        if self.state != TransportState::Playing {
            return self.reject("pause");
        }
        self.freeze(now);
        self.sync.on_pause(now, self.backend.as_mut());
        self.set_state(TransportState::Paused);
        Ok(())
    }

    pub fn resume(&mut self, now: Instant) -> Result<(), TransportError> {
        if self.state != TransportState::Paused {
            return self.reject("resume");
        }
        if let Err(error) = self.check_ready() {
            self.notifier
                .publish(Notification::error(NotificationCategory::Transport, error.to_string()));
            return Err(error);
        }
        self.clock.start(now);
        self.scheduler.resume_window(self.position);
        let ctx = SyncContext {
            now,
            clock: &self.clock,
            map: &self.snapshot.tempo_map,
            latency: self.backend.query_latency(),
            horizon: self.horizon,
        };
        self.sync.on_start(&ctx, self.position, self.backend.as_mut());
        self.set_state(TransportState::Playing);
        Ok(())
    }

    /// Stopped → Recording, or punch-in from Playing on the same clock
    pub fn record(&mut self, now: Instant) -> Result<(), TransportError> {
        if self.health.is_recording_disabled() {
            let error = TransportError::RecordingDisabled;
            log::debug!("{}", error);
            self.notifier
                .publish(Notification::warning(NotificationCategory::Recording, error.to_string()));
            return Err(error);
        }
        match self.state {
            TransportState::Stopped => self.start_running(now)?,
            TransportState::Playing => {
                self.clock.advance(now);
            }
            TransportState::Recording | TransportState::Paused => return self.reject("record"),
        }

        let start = self.position();
        let session =
            RecordingSession::begin(&self.snapshot, start, self.config.capacity.recorded_events);
        if session.armed_tracks().next().is_none() {
            self.notifier.publish(Notification::warning(
                NotificationCategory::Recording,
                "Recording without armed tracks",
            ));
        }
        log::debug!("Recording session {} at {}", session.id(), start);
        self.session = Some(session);
        self.sync.on_record(now, self.backend.as_mut());
        self.set_state(TransportState::Recording);
        Ok(())
    }

    /// Close the open session at the current clock time
    ///
    /// The take is moved to the GUI side unconverted; the handle finalizes
    /// it and reports `RecordingFinished`.
    fn finish_recording(&mut self, now: Instant) {
        let Some(session) = self.session.take() else {
            return;
        };
        log::debug!(
            "Recording session {} closed, {} captured",
            session.id(),
            session.captured().len()
        );
        self.sync.on_record_exit(now, self.backend.as_mut());
        self.unsent_takes.push_back(FinishedTake {
            session,
            composition: Arc::clone(&self.snapshot),
            end_seconds: self.clock.seconds(),
        });
        self.hand_over_takes();
    }

    /// Push closed takes to the GUI side, oldest first, as far as there is room
    fn hand_over_takes(&mut self) {
        while let Some(take) = self.unsent_takes.pop_front() {
            if let Err(take) = self.takes.try_push(take) {
                self.unsent_takes.push_front(take);
                break;
            }
        }
    }

    /// Any → Stopped; idempotent
    pub fn stop(&mut self, now: Instant) -> Result<(), TransportError> {
        if self.state == TransportState::Stopped {
            return Ok(());
        }
        if self.state.is_playing() {
            self.freeze(now);
        }
        self.scheduler.cancel_pending();
        self.scheduler
            .release_all(now, &self.clock, self.backend.as_mut());
        self.finish_recording(now);
        self.sync.on_stop(now, self.backend.as_mut());
        self.set_state(TransportState::Stopped);
        Ok(())
    }

    /// Pause from Playing or Recording (the take is finalized first)
    fn suspend(&mut self, now: Instant) {
        if !self.state.is_playing() {
            return;
        }
        self.freeze(now);
        self.finish_recording(now);
        self.sync.on_pause(now, self.backend.as_mut());
        self.set_state(TransportState::Paused);
    }

    pub fn seek(&mut self, position: Position, now: Instant) -> Result<(), TransportError> {
        if self.state == TransportState::Recording {
            return self.reject("seek");
        }
        let seconds = self.snapshot.tempo_map.time_at(position);
        self.jump(position, seconds, now);
        Ok(())
    }

    /// Move the clock; sounding voices are released, the window restarts
    fn jump(&mut self, position: Position, seconds: Seconds, now: Instant) {
        let running = self.state.is_playing();
        if running {
            self.clock.advance(now);
        }
        self.scheduler.cancel_pending();
        self.scheduler
            .release_all(now, &self.clock, self.backend.as_mut());
        self.clock.anchor(now, seconds);
        self.position = position;
        self.scheduler.reset_window(position);
        let ctx = SyncContext {
            now,
            clock: &self.clock,
            map: &self.snapshot.tempo_map,
            latency: self.backend.query_latency(),
            horizon: self.horizon,
        };
        self.sync
            .on_locate(&ctx, position, running, self.backend.as_mut());
        log::debug!("Located to {} ({:.3}s)", position, seconds);
    }

    pub fn set_loop(&mut self, range: LoopRange) -> Result<(), TransportError> {
        if let Err(error) = range.validate() {
            self.notifier
                .publish(Notification::warning(NotificationCategory::Transport, error.to_string()));
            return Err(error);
        }
        self.loop_range = range;
        self.shared.set_loop_range(range);
        self.notifier.publish(Notification::LoopChanged(range));
        Ok(())
    }

    pub fn set_sync_mode(&mut self, mode: SyncMode, now: Instant) -> Result<(), TransportError> {
        let mut settings = self.sync.settings();
        settings.apply(mode);
        self.set_sync_settings(settings, now)
    }

    pub fn set_sync_settings(
        &mut self,
        settings: SyncSettings,
        now: Instant,
    ) -> Result<(), TransportError> {
        let old = self.sync.settings();
        if let Err(reason) = self.sync.set_settings(settings, now, self.backend.as_mut()) {
            let error = TransportError::InvalidSync(reason);
            self.notifier
                .publish(Notification::warning(NotificationCategory::Sync, error.to_string()));
            return Err(error);
        }
        if old != settings {
            // Bring newly enabled masters in at the current position
            if self.state.is_playing() {
                self.clock.advance(now);
                let position = self.position();
                let ctx = SyncContext {
                    now,
                    clock: &self.clock,
                    map: &self.snapshot.tempo_map,
                    latency: self.backend.query_latency(),
                    horizon: self.horizon,
                };
                self.sync
                    .on_locate(&ctx, position, true, self.backend.as_mut());
            }
            self.notifier
                .publish(Notification::SyncSettingsChanged(settings));
        }
        self.publish_lock_state();
        Ok(())
    }

    pub fn set_metronome(&mut self, enabled_while_playing: bool) {
        self.metronome
            .set_enabled_while_playing(enabled_while_playing);
    }

    /// Operator acknowledged persistent health problems
    pub fn acknowledge_health(&mut self) {
        self.health.acknowledge();
        self.shared.set_recording_disabled(false);
        self.notifier.publish(Notification::info(
            NotificationCategory::Health,
            "Health problems acknowledged, recording enabled",
        ));
    }

    pub fn apply_command(
        &mut self,
        command: TransportCommand,
        now: Instant,
    ) -> Result<(), TransportError> {
        match command {
            TransportCommand::Play => self.play(now),
            TransportCommand::Stop => self.stop(now),
            TransportCommand::Pause => self.pause(now),
            TransportCommand::Resume => self.resume(now),
            TransportCommand::Record => self.record(now),
            TransportCommand::Seek(position) => self.seek(position, now),
            TransportCommand::SetLoop(range) => self.set_loop(range),
            TransportCommand::SetSyncMode(mode) => self.set_sync_mode(mode, now),
            TransportCommand::SetSyncSettings(settings) => self.set_sync_settings(settings, now),
            TransportCommand::AcknowledgeHealth => {
                self.acknowledge_health();
                Ok(())
            }
            TransportCommand::SetMetronome(enabled) => {
                self.set_metronome(enabled);
                Ok(())
            }
        }
    }

    /// One dispatch tick
    ///
    /// Commands, composition edits and input are all applied before any
    /// event is dispatched, so a tick sees either the state before a
    /// cancelling operation or the state after it.
    pub fn on_tick(&mut self, now: Instant) -> &SchedulerStatus {
        let measure = self.health.tick_budget().start_measure(Instant::now());

        while let Some(command) = self.commands.try_pop() {
            if let Err(e) = self.apply_command(command, now) {
                log::debug!("Command {:?} rejected: {}", command, e);
            }
        }
        self.refresh_snapshot(now);
        if !self.unsent_takes.is_empty() {
            self.hand_over_takes();
        }
        self.process_input(now);

        let before = self.clock.seconds();
        self.clock.advance(now);
        self.check_loop(before, now);

        self.backend.service(now);
        self.dispatch(now);

        if let Some(action) = self.sync.check_signal(now, self.state.is_playing()) {
            self.apply_sync_action(action, now);
        }
        self.publish_lock_state();
        self.check_health(now);
        self.publish_position(now);

        self.health
            .tick_budget()
            .end_measure(measure, Instant::now());
        &self.last_status
    }

    /// Adopt a newly published composition, keeping the musical position
    fn refresh_snapshot(&mut self, now: Instant) {
        let Some(latest) = self.composition.try_snapshot() else {
            return;
        };
        if Arc::ptr_eq(&latest, &self.snapshot) {
            return;
        }
        let previous = std::mem::replace(&mut self.snapshot, latest);
        if previous.tempo_map != self.snapshot.tempo_map {
            let ticks = previous
                .tempo_map
                .ticks_at_seconds(self.clock.seconds_at(now));
            self.clock
                .anchor(now, self.snapshot.tempo_map.seconds_at_ticks(ticks));
            log::debug!("Tempo map changed, clock re-anchored at tick {:.1}", ticks);
        }
        if self.state.is_playing() {
            self.scheduler.cancel_pending();
            let position = self.position();
            self.scheduler.resume_window(position);
        }
    }

    fn process_input(&mut self, now: Instant) {
        let mut inputs = std::mem::take(&mut self.input_buf);
        self.backend.drain_input(&mut |event| inputs.push(event));

        for event in inputs.drain(..) {
            if event.message.is_sync() {
                let ctx = SyncContext {
                    now,
                    clock: &self.clock,
                    map: &self.snapshot.tempo_map,
                    latency: self.backend.query_latency(),
                    horizon: self.horizon,
                };
                let audible = self.state.is_playing();
                if let Some(action) = self.sync.handle_input(&ctx, &event, audible) {
                    self.apply_sync_action(action, now);
                }
            } else if self.state.is_recording()
                && let Some(session) = self.session.as_mut()
            {
                let seconds = self.clock.seconds_at(event.timestamp);
                let overflowed = session.overflowed();
                session.capture(event.device, event.message, seconds);
                if overflowed == 0 && session.overflowed() > 0 {
                    self.notifier.publish(Notification::warning(
                        NotificationCategory::Recording,
                        "Recording buffer full, further input is dropped",
                    ));
                }
            }
        }
        self.input_buf = inputs;
    }

    fn apply_sync_action(&mut self, action: SyncAction, now: Instant) {
        let result = match action {
            SyncAction::Play => match self.state {
                TransportState::Stopped => self.play(now),
                TransportState::Paused => self.resume(now),
                TransportState::Playing | TransportState::Recording => Ok(()),
            },
            SyncAction::Stop => self.stop(now),
            SyncAction::Pause => {
                self.suspend(now);
                Ok(())
            }
            SyncAction::Record => self.record(now),
            SyncAction::Locate(seconds) => self.locate_seconds(seconds, now),
            SyncAction::Chase(seconds) => self.locate_seconds(seconds, now).and_then(|()| {
                match self.state {
                    TransportState::Stopped => self.play(now),
                    TransportState::Paused => self.resume(now),
                    TransportState::Playing | TransportState::Recording => Ok(()),
                }
            }),
            SyncAction::Slew(error) => {
                self.clock.slew(error);
                Ok(())
            }
            SyncAction::SignalLost => {
                self.notifier.publish(Notification::warning(
                    NotificationCategory::Sync,
                    "Sync lost: no time code received",
                ));
                self.suspend(now);
                Ok(())
            }
        };
        if let Err(e) = result {
            log::debug!("Sync action {:?} not applied: {}", action, e);
        }
    }

    fn locate_seconds(&mut self, seconds: Seconds, now: Instant) -> Result<(), TransportError> {
        if self.state == TransportState::Recording {
            return self.reject("locate");
        }
        let seconds = seconds.max(0.0);
        let position = self.snapshot.tempo_map.position_at(seconds);
        self.jump(position, seconds, now);
        Ok(())
    }

    /// Wrap to the loop start whenever the clock is at or past the loop end
    ///
    /// The overshoot is carried only when this tick crossed the end; a
    /// clock that was already past it (loop set behind the playhead, seek
    /// beyond the end) restarts exactly at the loop start.
    fn check_loop(&mut self, before: Seconds, now: Instant) {
        if !self.state.is_playing() || !self.loop_range.is_active() {
            return;
        }
        let map = &self.snapshot.tempo_map;
        let end = map.time_at(self.loop_range.end);
        let seconds = self.clock.seconds();
        if seconds < end {
            return;
        }
        let start = map.time_at(self.loop_range.start);
        let length = end - start;
        let overshoot = if before < end && length > 0.0 {
            (seconds - end) % length
        } else {
            0.0
        };
        log::debug!(
            "Loop wrap {} -> {} (+{:.4}s)",
            self.loop_range.end,
            self.loop_range.start,
            overshoot
        );
        self.jump(self.loop_range.start, start + overshoot, now);
    }

    fn dispatch(&mut self, now: Instant) {
        if !self.state.is_playing() {
            self.last_status = SchedulerStatus {
                cursor: self.scheduler.cursor(),
                window_end: self.scheduler.window_end(),
                pending: self.scheduler.pending_count(),
                sounding: self.scheduler.sounding_count(),
                ..SchedulerStatus::default()
            };
            return;
        }

        let latency = self.output_latency();
        let limit = self
            .loop_range
            .is_active()
            .then_some(self.loop_range.end);
        let metronome = self
            .metronome
            .is_active(self.state)
            .then_some(&self.metronome);
        let window = TickWindow {
            now,
            clock: &self.clock,
            composition: self.snapshot.as_ref(),
            latency,
            lookahead: self.config.timing.lookahead(),
            horizon: self.horizon,
            limit,
            metronome,
        };
        let status = self.scheduler.tick(&window, self.backend.as_mut());

        if status.send_errors > 0 && self.last_status.send_errors == 0 {
            let reason = status
                .last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();
            log::debug!("{} event(s) could not be sent: {}", status.send_errors, reason);
            self.notifier.publish(Notification::warning(
                NotificationCategory::Midi,
                format!("Output failed: {}", reason),
            ));
        }

        let ctx = SyncContext {
            now,
            clock: &self.clock,
            map: &self.snapshot.tempo_map,
            latency,
            horizon: self.horizon,
        };
        self.sync.tick(&ctx, self.backend.as_mut());
        self.last_status = status;
    }

    fn publish_lock_state(&mut self) {
        let lock = self.sync.lock_state();
        if lock != self.last_lock {
            self.last_lock = lock;
            log::debug!("Sync {}", lock);
            self.notifier.publish(Notification::SyncLock(lock));
        }
    }

    fn check_health(&mut self, now: Instant) {
        let verdict = self
            .health
            .evaluate(now, self.backend.as_mut(), &self.telemetry);
        for diagnostic in verdict.diagnostics {
            self.notifier.publish(Notification::Health(diagnostic));
        }
        if verdict.restarted && self.state.is_playing() {
            // Whatever was queued in the old connection is gone
            self.scheduler
                .release_all(now, &self.clock, self.backend.as_mut());
            self.scheduler.cancel_pending();
            let position = self.position();
            self.scheduler.resume_window(position);
        }
        if verdict.force_stop && self.state != TransportState::Stopped {
            self.notifier.publish(Notification::error(
                NotificationCategory::Health,
                "Transport stopped: persistent health problem, recording disabled",
            ));
            if let Err(e) = self.stop(now) {
                log::debug!("Forced stop failed: {}", e);
            }
        }
        self.shared
            .set_recording_disabled(self.health.is_recording_disabled());
    }

    fn publish_position(&mut self, now: Instant) {
        let position = self.position();
        if self.state.is_playing() {
            self.position = position;
        }
        self.shared.set_position(position, self.clock.seconds());

        let due = match self.last_report {
            None => true,
            Some((at, last)) => {
                last != position
                    && now.saturating_duration_since(at) >= self.config.timing.position_notify_interval()
            }
        };
        if !due {
            return;
        }
        self.last_report = Some((now, position));
        let map = &self.snapshot.tempo_map;
        let report = PositionReport {
            position,
            musical: map.bar_beat_at(position),
            seconds: self.clock.seconds(),
            tempo: map.tempo_at(position),
        };
        self.notifier.publish(Notification::Position(report));
    }
}
