// Drivers - what calls `Transport::on_tick`
//
// Exactly one driver runs the dispatch thread:
// - `timer`: high-resolution sleep loop (always available)
// - `audio`: the cpal output callback (feature `audio`)
//
// Both report how well they keep time through `DriverTelemetry`.

pub mod timer;

#[cfg(feature = "audio")]
pub mod audio;

pub use timer::{TimerDriver, TimerMode};

#[cfg(feature = "audio")]
pub use audio::AudioDriver;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Timing observations shared between a driver and the health monitor
#[derive(Debug, Default)]
pub struct DriverTelemetry {
    /// Worst wake-up overshoot since the last `take_worst_overshoot`
    worst_overshoot_us: AtomicU64,
    ticks: AtomicU64,
    /// Set by the health monitor: trade CPU for precision
    precise_requested: AtomicBool,
    /// Audio xruns reported by the stream error callback
    xruns: AtomicU64,
}

impl DriverTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&self, overshoot: Duration) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.worst_overshoot_us
            .fetch_max(overshoot.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn take_worst_overshoot(&self) -> Duration {
        Duration::from_micros(self.worst_overshoot_us.swap(0, Ordering::Relaxed))
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn request_precise(&self, precise: bool) {
        self.precise_requested.store(precise, Ordering::Relaxed);
    }

    pub fn precise_requested(&self) -> bool {
        self.precise_requested.load(Ordering::Relaxed)
    }

    pub fn add_xrun(&self) {
        self.xruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn xruns(&self) -> u64 {
        self.xruns.load(Ordering::Relaxed)
    }
}
