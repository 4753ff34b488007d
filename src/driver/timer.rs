// Timer driver - fixed-period tick loop for runs without an audio callback
//
// Sleeps to the next deadline and measures how late it woke up. When the
// health monitor reports a coarse timer it asks for precise mode: sleep to
// just before the deadline, then spin.

use super::DriverTelemetry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Spin for this long before each deadline in precise mode
const SPIN_MARGIN: Duration = Duration::from_micros(1_500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    Sleep,
    Precise,
}

pub struct TimerDriver {
    interval: Duration,
    running: Arc<AtomicBool>,
    telemetry: Arc<DriverTelemetry>,
}

impl TimerDriver {
    pub fn new(interval: Duration, telemetry: Arc<DriverTelemetry>) -> Self {
        Self {
            interval: interval.max(Duration::from_micros(100)),
            running: Arc::new(AtomicBool::new(true)),
            telemetry,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Set until cleared; clearing it makes `run` return after the current tick
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn mode(&self) -> TimerMode {
        if self.telemetry.precise_requested() {
            TimerMode::Precise
        } else {
            TimerMode::Sleep
        }
    }

    /// Call `on_tick` once per interval until the running flag is cleared
    ///
    /// Missed deadlines are not caught up: after a stall the loop resumes
    /// one interval after the late tick.
    pub fn run(&self, mut on_tick: impl FnMut(Instant)) {
        let mut mode = self.mode();
        log::info!("Timer driver running every {:?} ({:?})", self.interval, mode);

        let mut deadline = Instant::now() + self.interval;
        while self.running.load(Ordering::Acquire) {
            let current = self.mode();
            if current != mode {
                log::info!("Timer driver switched to {:?}", current);
                mode = current;
            }
            wait_until(deadline, mode);

            let woke = Instant::now();
            self.telemetry
                .record_tick(woke.saturating_duration_since(deadline));
            on_tick(woke);

            deadline += self.interval;
            let after = Instant::now();
            if deadline < after {
                deadline = after + self.interval;
            }
        }
        log::info!("Timer driver stopped after {} ticks", self.telemetry.ticks());
    }
}

fn wait_until(deadline: Instant, mode: TimerMode) {
    let now = Instant::now();
    if deadline <= now {
        return;
    }
    match mode {
        TimerMode::Sleep => std::thread::sleep(deadline - now),
        TimerMode::Precise => {
            let remaining = deadline - now;
            if remaining > SPIN_MARGIN {
                std::thread::sleep(remaining - SPIN_MARGIN);
            }
            while Instant::now() < deadline {
                std::hint::spin_loop();
            }
        }
    }
}
