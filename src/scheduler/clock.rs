// Song clock - maps monotonic instants onto song seconds
//
// Anchored at a known (instant, seconds) pair and advanced once per tick.
// External sync corrects it by slewing: the correction is spread over time
// at a bounded rate so playback never jumps or runs backwards.

use crate::timeline::Seconds;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SongClock {
    reference: Instant,
    seconds: Seconds,
    running: bool,
    /// Correction still to be applied, in song seconds
    correction: Seconds,
    /// Seconds of correction per second of real time, < 1
    max_correction_rate: f64,
}

impl SongClock {
    pub fn new(now: Instant, max_correction_rate: f64) -> Self {
        Self {
            reference: now,
            seconds: 0.0,
            running: false,
            correction: 0.0,
            max_correction_rate: max_correction_rate.clamp(0.0, 0.99),
        }
    }

    /// Pin `now` to `seconds`, dropping any pending correction
    pub fn anchor(&mut self, now: Instant, seconds: Seconds) {
        self.reference = now;
        self.seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        self.correction = 0.0;
    }

    pub fn start(&mut self, now: Instant) {
        self.reference = now;
        self.running = true;
    }

    /// Stop advancing; returns the frozen song time
    pub fn freeze(&mut self, now: Instant) -> Seconds {
        self.advance(now);
        self.running = false;
        self.correction = 0.0;
        self.seconds
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Move the reference to `now`, applying as much correction as allowed
    pub fn advance(&mut self, now: Instant) -> Seconds {
        if now <= self.reference {
            return self.seconds;
        }
        let dt = (now - self.reference).as_secs_f64();
        if self.running {
            let max_step = dt * self.max_correction_rate;
            let step = self.correction.clamp(-max_step, max_step);
            self.seconds += dt + step;
            self.correction -= step;
        }
        self.reference = now;
        self.seconds
    }

    /// Song time at the last advance
    pub fn seconds(&self) -> Seconds {
        self.seconds
    }

    pub fn reference(&self) -> Instant {
        self.reference
    }

    /// Song time at an instant, extrapolated at nominal rate
    pub fn seconds_at(&self, instant: Instant) -> Seconds {
        if !self.running {
            return self.seconds;
        }
        if instant >= self.reference {
            self.seconds + (instant - self.reference).as_secs_f64()
        } else {
            self.seconds - (self.reference - instant).as_secs_f64()
        }
    }

    /// Instant at which the song reaches `seconds` (nominal rate)
    pub fn instant_at(&self, seconds: Seconds) -> Instant {
        let delta = seconds - self.seconds;
        match Duration::try_from_secs_f64(delta.abs()) {
            Ok(offset) if delta >= 0.0 => self
                .reference
                .checked_add(offset)
                .unwrap_or(self.reference),
            Ok(offset) => self
                .reference
                .checked_sub(offset)
                .unwrap_or(self.reference),
            Err(_) => self.reference,
        }
    }

    /// Output instant for an event at `seconds`, shifted earlier by the
    /// output latency and never before `now`
    pub fn target_instant(&self, seconds: Seconds, latency: Duration, now: Instant) -> Instant {
        let at = self.instant_at(seconds);
        at.checked_sub(latency).unwrap_or(at).max(now)
    }

    /// Replace the pending correction; positive moves the song forward
    pub fn slew(&mut self, error: Seconds) {
        if error.is_finite() {
            self.correction = error;
        }
    }

    pub fn pending_correction(&self) -> Seconds {
        self.correction
    }

    pub fn max_correction_rate(&self) -> f64 {
        self.max_correction_rate
    }

    pub fn set_max_correction_rate(&mut self, rate: f64) {
        self.max_correction_rate = rate.clamp(0.0, 0.99);
    }
}
