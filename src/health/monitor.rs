// Health monitor - per-tick evaluation of backend and driver health
//
// Each condition lives in an episode from the tick it is first seen until
// the tick it clears. An episode gets bounded recovery attempts; if the
// condition outlives them, or the recovery itself fails, it escalates:
// the transport is forced to Stopped and recording stays disabled until
// `acknowledge()`.

use super::{Diagnostic, HealthCondition, RecoveryOutcome, RecoveryStrategy, Severity, TickBudget};
use crate::backend::Backend;
use crate::config::HealthConfig;
use crate::driver::DriverTelemetry;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::{Duration, Instant};

/// Consecutive coarse wake-ups before the timer counts as coarse
const COARSE_TICKS: u32 = 8;

/// Bound on remembered xrun timestamps
const MAX_XRUN_HISTORY: usize = 256;

/// What the transport has to do after an evaluation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthVerdict {
    pub diagnostics: Vec<Diagnostic>,
    /// A persistent condition: go to Stopped now
    pub force_stop: bool,
    /// The driver was asked to switch to its precise mode
    pub recalibrate_timer: bool,
    /// The backend was restarted: pending output is gone
    pub restarted: bool,
}

impl HealthVerdict {
    fn push(&mut self, diagnostic: Diagnostic) {
        log::debug!("{:?}: {}", diagnostic.severity, diagnostic);
        self.diagnostics.push(diagnostic);
    }
}

#[derive(Debug)]
struct Episode {
    recovery: RecoveryStrategy,
    attempted_at: Option<Instant>,
    settle: Duration,
    escalated: bool,
}

pub struct HealthMonitor {
    config: HealthConfig,
    episodes: BTreeMap<HealthCondition, Episode>,
    xrun_times: VecDeque<Instant>,
    last_xruns: u64,
    coarse_ticks: u32,
    tick_overrun: bool,
    recording_disabled: bool,
    tick_budget: TickBudget,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, tick_period: Duration) -> Self {
        let tick_budget = TickBudget::new(tick_period, config.tick_budget_sample_every);
        Self {
            config,
            episodes: BTreeMap::new(),
            xrun_times: VecDeque::new(),
            last_xruns: 0,
            coarse_ticks: 0,
            tick_overrun: false,
            recording_disabled: false,
            tick_budget,
        }
    }

    pub fn tick_budget(&self) -> &TickBudget {
        &self.tick_budget
    }

    pub fn set_tick_period(&mut self, period: Duration) {
        self.tick_budget.set_period(period);
    }

    pub fn is_recording_disabled(&self) -> bool {
        self.recording_disabled
    }

    /// Conditions with an open episode
    pub fn active_conditions(&self) -> Vec<HealthCondition> {
        self.episodes.keys().copied().collect()
    }

    /// Operator intervention: forget all episodes and allow recording again
    pub fn acknowledge(&mut self) {
        self.episodes.clear();
        self.xrun_times.clear();
        self.coarse_ticks = 0;
        self.tick_overrun = false;
        self.recording_disabled = false;
        log::debug!("Health problems acknowledged, recording re-enabled");
    }

    pub fn evaluate(
        &mut self,
        now: Instant,
        backend: &mut dyn Backend,
        telemetry: &DriverTelemetry,
    ) -> HealthVerdict {
        let active = self.observe(now, backend, telemetry);
        let mut verdict = HealthVerdict::default();

        let cleared: Vec<HealthCondition> = self
            .episodes
            .keys()
            .filter(|c| !active.contains(c))
            .copied()
            .collect();
        for condition in cleared {
            if let Some(episode) = self.episodes.remove(&condition) {
                if episode.escalated {
                    log::debug!("{} cleared, still waiting for acknowledgement", condition);
                } else {
                    verdict.push(Diagnostic::new(
                        condition,
                        Severity::Info,
                        RecoveryOutcome::Succeeded,
                        "recovered",
                    ));
                }
            }
        }
        for condition in active {
            match self.episodes.get(&condition) {
                None => self.open_episode(condition, now, backend, telemetry, &mut verdict),
                Some(episode) if !episode.escalated => {
                    let settled = episode
                        .attempted_at
                        .is_some_and(|at| now.saturating_duration_since(at) >= episode.settle);
                    if settled {
                        self.retry_or_escalate(condition, now, backend, telemetry, &mut verdict);
                    }
                }
                Some(_) => {}
            }
        }

        verdict
    }

    /// Poll the backend and telemetry; return the conditions present now
    fn observe(
        &mut self,
        now: Instant,
        backend: &mut dyn Backend,
        telemetry: &DriverTelemetry,
    ) -> BTreeSet<HealthCondition> {
        let mut active = BTreeSet::new();
        let health = backend.query_health(now);

        // Xruns: the backend counts cumulatively, a lower count means it was recreated
        let xruns = health.xruns + telemetry.xruns();
        if xruns < self.last_xruns {
            self.last_xruns = xruns;
        }
        let new_xruns = xruns - self.last_xruns;
        self.last_xruns = xruns;
        for _ in 0..new_xruns.min(MAX_XRUN_HISTORY as u64) {
            if self.xrun_times.len() == MAX_XRUN_HISTORY {
                self.xrun_times.pop_front();
            }
            self.xrun_times.push_back(now);
        }
        let window = self.config.xrun_window();
        while self
            .xrun_times
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) > window)
        {
            self.xrun_times.pop_front();
        }
        if new_xruns > 0 {
            active.insert(HealthCondition::Xrun);
        }
        if self.xrun_times.len() >= self.config.xrun_threshold as usize {
            active.insert(HealthCondition::RepeatedXruns);
        }

        if !health.is_connected() {
            active.insert(HealthCondition::Disconnected);
        } else if health
            .last_activity
            .is_some_and(|t| now.saturating_duration_since(t) > self.config.watchdog_timeout())
        {
            active.insert(HealthCondition::WatchdogTimeout);
        }

        if telemetry.take_worst_overshoot() > self.config.max_timer_resolution() {
            self.coarse_ticks = self.coarse_ticks.saturating_add(1);
        } else {
            self.coarse_ticks = 0;
        }
        if self.coarse_ticks >= COARSE_TICKS {
            active.insert(HealthCondition::CoarseTimer);
        }

        // Only sampled ticks produce a fraction; keep the last verdict otherwise
        if let Some(fraction) = self.tick_budget.take_fraction() {
            self.tick_overrun = fraction > self.config.tick_budget_fraction;
        }
        if self.tick_overrun {
            active.insert(HealthCondition::TickOverrun);
        }

        active
    }

    fn open_episode(
        &mut self,
        condition: HealthCondition,
        now: Instant,
        backend: &mut dyn Backend,
        telemetry: &DriverTelemetry,
        verdict: &mut HealthVerdict,
    ) {
        let mut episode = Episode {
            recovery: RecoveryStrategy::new(
                self.config.recovery_attempts,
                self.config.recovery_settle(),
            ),
            attempted_at: None,
            settle: Duration::ZERO,
            escalated: false,
        };

        match condition {
            HealthCondition::RepeatedXruns => {
                self.episodes.insert(condition, episode);
                let message = format!(
                    "{} xruns within {} ms",
                    self.xrun_times.len(),
                    self.config.xrun_window_ms
                );
                self.escalate(condition, RecoveryOutcome::Escalated, message, verdict);
            }
            HealthCondition::TickOverrun => {
                verdict.push(Diagnostic::new(
                    condition,
                    Severity::Warning,
                    RecoveryOutcome::None,
                    format!(
                        "ticks use more than {:.0}% of their period",
                        self.config.tick_budget_fraction * 100.0
                    ),
                ));
                self.episodes.insert(condition, episode);
            }
            _ => {
                let settle = episode.recovery.next_delay().unwrap_or_default();
                episode.settle = settle;
                episode.attempted_at = Some(now);
                self.episodes.insert(condition, episode);
                self.attempt(condition, backend, telemetry, verdict);
            }
        }
    }

    fn retry_or_escalate(
        &mut self,
        condition: HealthCondition,
        now: Instant,
        backend: &mut dyn Backend,
        telemetry: &DriverTelemetry,
        verdict: &mut HealthVerdict,
    ) {
        let Some(episode) = self.episodes.get_mut(&condition) else {
            return;
        };
        match episode.recovery.next_delay() {
            Some(settle) => {
                episode.settle = settle;
                episode.attempted_at = Some(now);
                self.attempt(condition, backend, telemetry, verdict);
            }
            None => {
                let message = format!(
                    "still present after {} recovery attempt(s)",
                    episode.recovery.current_attempt()
                );
                self.escalate(condition, RecoveryOutcome::Escalated, message, verdict);
            }
        }
    }

    /// Run the recovery action for `condition`
    fn attempt(
        &mut self,
        condition: HealthCondition,
        backend: &mut dyn Backend,
        telemetry: &DriverTelemetry,
        verdict: &mut HealthVerdict,
    ) {
        if condition == HealthCondition::CoarseTimer {
            telemetry.request_precise(true);
            verdict.recalibrate_timer = true;
            verdict.push(Diagnostic::new(
                condition,
                Severity::Warning,
                RecoveryOutcome::Attempted,
                format!(
                    "timer overshoots more than {} us, switching to precise timing",
                    self.config.max_timer_resolution_us
                ),
            ));
            return;
        }

        // One restart per tick covers every condition that asks for it
        if verdict.restarted {
            verdict.push(Diagnostic::new(
                condition,
                Severity::Warning,
                RecoveryOutcome::Attempted,
                format!("{} restarted", backend.name()),
            ));
            return;
        }

        match backend.restart() {
            Ok(()) => {
                verdict.restarted = true;
                verdict.push(Diagnostic::new(
                    condition,
                    Severity::Warning,
                    RecoveryOutcome::Attempted,
                    format!("{} restarted", backend.name()),
                ));
            }
            Err(e) => {
                verdict.restarted = true;
                self.escalate(condition, RecoveryOutcome::Failed, e.to_string(), verdict);
            }
        }
    }

    fn escalate(
        &mut self,
        condition: HealthCondition,
        outcome: RecoveryOutcome,
        message: String,
        verdict: &mut HealthVerdict,
    ) {
        if let Some(episode) = self.episodes.get_mut(&condition) {
            episode.escalated = true;
        }
        self.recording_disabled = true;
        verdict.force_stop = true;
        verdict.push(Diagnostic::new(condition, Severity::Critical, outcome, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VirtualBackend;
    use crate::composition::DeviceId;

    fn setup() -> (HealthMonitor, VirtualBackend, DriverTelemetry, Instant) {
        let monitor = HealthMonitor::new(HealthConfig::default(), Duration::from_millis(2));
        let mut backend = VirtualBackend::new([DeviceId(0)]);
        backend.start().unwrap();
        (monitor, backend, DriverTelemetry::new(), Instant::now())
    }

    #[test]
    fn test_healthy_backend_is_quiet() {
        let (mut monitor, mut backend, telemetry, t0) = setup();
        for i in 0..10 {
            let verdict = monitor.evaluate(t0 + Duration::from_millis(i), &mut backend, &telemetry);
            assert!(verdict.diagnostics.is_empty());
        }
        assert!(monitor.active_conditions().is_empty());
    }

    #[test]
    fn test_disconnect_recovers_with_restart() {
        let (mut monitor, mut backend, telemetry, t0) = setup();
        let probe = backend.probe();
        probe.disconnect();

        let verdict = monitor.evaluate(t0, &mut backend, &telemetry);
        assert!(verdict.restarted);
        assert!(!verdict.force_stop);
        assert_eq!(verdict.diagnostics[0].condition, HealthCondition::Disconnected);
        assert_eq!(verdict.diagnostics[0].recovery, RecoveryOutcome::Attempted);
        assert_eq!(probe.restart_count(), 1);

        let verdict = monitor.evaluate(t0 + Duration::from_millis(2), &mut backend, &telemetry);
        assert_eq!(verdict.diagnostics.len(), 1);
        assert_eq!(verdict.diagnostics[0].recovery, RecoveryOutcome::Succeeded);
        assert!(!monitor.is_recording_disabled());
    }

    #[test]
    fn test_failed_restart_escalates() {
        let (mut monitor, mut backend, telemetry, t0) = setup();
        let probe = backend.probe();
        probe.set_restart_fails(true);
        probe.disconnect();

        let verdict = monitor.evaluate(t0, &mut backend, &telemetry);
        assert!(verdict.force_stop);
        assert!(verdict.diagnostics[0].is_critical());
        assert_eq!(verdict.diagnostics[0].recovery, RecoveryOutcome::Failed);
        assert!(monitor.is_recording_disabled());

        // Escalated episodes do not repeat their diagnostic
        let verdict = monitor.evaluate(t0 + Duration::from_secs(5), &mut backend, &telemetry);
        assert!(verdict.diagnostics.is_empty());

        monitor.acknowledge();
        assert!(!monitor.is_recording_disabled());
    }

    #[test]
    fn test_condition_outliving_recovery_escalates() {
        let (mut monitor, mut backend, telemetry, t0) = setup();
        let probe = backend.probe();
        probe.disconnect();
        monitor.evaluate(t0, &mut backend, &telemetry);

        // Restart worked, but the device dropped out again
        probe.disconnect();
        let verdict = monitor.evaluate(t0 + Duration::from_millis(500), &mut backend, &telemetry);
        assert!(verdict.diagnostics.is_empty());

        let verdict = monitor.evaluate(t0 + Duration::from_millis(1000), &mut backend, &telemetry);
        assert!(verdict.force_stop);
        assert_eq!(verdict.diagnostics[0].recovery, RecoveryOutcome::Escalated);
        assert_eq!(probe.restart_count(), 1);
    }

    #[test]
    fn test_repeated_xruns_escalate_immediately() {
        let (mut monitor, mut backend, telemetry, t0) = setup();
        let probe = backend.probe();

        probe.add_xruns(1);
        let verdict = monitor.evaluate(t0, &mut backend, &telemetry);
        assert!(!verdict.force_stop);
        assert!(verdict.restarted);

        let verdict = monitor.evaluate(t0 + Duration::from_millis(10), &mut backend, &telemetry);
        assert_eq!(verdict.diagnostics[0].recovery, RecoveryOutcome::Succeeded);

        probe.add_xruns(2);
        let verdict = monitor.evaluate(t0 + Duration::from_secs(1), &mut backend, &telemetry);
        assert!(verdict.force_stop);
        assert!(verdict.diagnostics.iter().any(|d| {
            d.condition == HealthCondition::RepeatedXruns && d.severity == Severity::Critical
        }));
    }

    #[test]
    fn test_xruns_outside_window_do_not_add_up() {
        let (mut monitor, mut backend, telemetry, t0) = setup();
        let probe = backend.probe();
        for i in 0..5 {
            probe.add_xruns(1);
            let now = t0 + Duration::from_secs(11 * i);
            let verdict = monitor.evaluate(now, &mut backend, &telemetry);
            assert!(!verdict.force_stop);
            monitor.evaluate(now + Duration::from_millis(5), &mut backend, &telemetry);
        }
    }

    #[test]
    fn test_watchdog() {
        let (mut monitor, mut backend, telemetry, t0) = setup();
        let probe = backend.probe();
        monitor.evaluate(t0, &mut backend, &telemetry);

        probe.set_stalled(true);
        let verdict = monitor.evaluate(t0 + Duration::from_secs(3), &mut backend, &telemetry);
        assert!(verdict.diagnostics.is_empty());

        let verdict = monitor.evaluate(t0 + Duration::from_secs(6), &mut backend, &telemetry);
        assert_eq!(verdict.diagnostics[0].condition, HealthCondition::WatchdogTimeout);
        assert!(verdict.restarted);
    }

    #[test]
    fn test_coarse_timer_requests_precise_mode() {
        let (mut monitor, mut backend, telemetry, t0) = setup();
        let mut recalibrated = false;
        for i in 0..COARSE_TICKS {
            telemetry.record_tick(Duration::from_millis(5));
            let verdict = monitor.evaluate(t0 + Duration::from_millis(i as u64 * 7), &mut backend, &telemetry);
            recalibrated |= verdict.recalibrate_timer;
        }
        assert!(recalibrated);
        assert!(telemetry.precise_requested());
        assert!(!monitor.is_recording_disabled());

        // Precise mode fixed it
        telemetry.record_tick(Duration::from_micros(50));
        let verdict = monitor.evaluate(t0 + Duration::from_millis(100), &mut backend, &telemetry);
        assert_eq!(verdict.diagnostics[0].recovery, RecoveryOutcome::Succeeded);
    }

    #[test]
    fn test_tick_overrun_is_a_warning() {
        let config = HealthConfig {
            tick_budget_sample_every: 1,
            ..HealthConfig::default()
        };
        let mut monitor = HealthMonitor::new(config, Duration::from_millis(2));
        let mut backend = VirtualBackend::new([DeviceId(0)]);
        let telemetry = DriverTelemetry::new();
        let t0 = Instant::now();

        let start = monitor.tick_budget().start_measure(t0);
        monitor.tick_budget().end_measure(start, t0 + Duration::from_millis(3));
        let verdict = monitor.evaluate(t0, &mut backend, &telemetry);
        assert_eq!(verdict.diagnostics.len(), 1);
        assert_eq!(verdict.diagnostics[0].condition, HealthCondition::TickOverrun);
        assert_eq!(verdict.diagnostics[0].severity, Severity::Warning);
        assert!(!verdict.force_stop);
    }
}
