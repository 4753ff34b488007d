// Tick budget - dispatch tick duration against the tick period
//
// Measures one tick out of N to keep the overhead negligible. Shared with
// other threads through atomics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct TickBudget {
    total_tick_ns: Arc<AtomicU64>,
    total_budget_ns: Arc<AtomicU64>,
    sample_count: Arc<AtomicU64>,
    worst_ns: Arc<AtomicU64>,
    period: Duration,
    measure_every_n: u32,
    current_count: Arc<AtomicU32>,
}

/// Load level for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickLoad {
    Low,
    Medium,
    High,
}

impl TickBudget {
    pub fn new(period: Duration, measure_every_n: u32) -> Self {
        Self {
            total_tick_ns: Arc::new(AtomicU64::new(0)),
            total_budget_ns: Arc::new(AtomicU64::new(0)),
            sample_count: Arc::new(AtomicU64::new(0)),
            worst_ns: Arc::new(AtomicU64::new(0)),
            period,
            measure_every_n: measure_every_n.max(1),
            current_count: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Tick period changed (audio buffer size, timer interval)
    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
        self.reset();
    }

    /// `Some(start)` if this tick is sampled
    #[inline]
    pub fn start_measure(&self, now: Instant) -> Option<Instant> {
        let count = self.current_count.fetch_add(1, Ordering::Relaxed);
        (count % self.measure_every_n == 0).then_some(now)
    }

    #[inline]
    pub fn end_measure(&self, start: Option<Instant>, end: Instant) {
        if let Some(start) = start {
            let elapsed_ns = end.saturating_duration_since(start).as_nanos() as u64;
            self.total_tick_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
            self.total_budget_ns
                .fetch_add(self.period.as_nanos() as u64, Ordering::Relaxed);
            self.sample_count.fetch_add(1, Ordering::Relaxed);
            self.worst_ns.fetch_max(elapsed_ns, Ordering::Relaxed);
        }
    }

    /// Average fraction of the period used since the last call, then restart
    pub fn take_fraction(&self) -> Option<f64> {
        let samples = self.sample_count.swap(0, Ordering::Relaxed);
        let used = self.total_tick_ns.swap(0, Ordering::Relaxed);
        let budget = self.total_budget_ns.swap(0, Ordering::Relaxed);
        if samples == 0 || budget == 0 {
            return None;
        }
        Some(used as f64 / budget as f64)
    }

    /// Longest sampled tick since creation or reset
    pub fn worst_tick(&self) -> Duration {
        Duration::from_nanos(self.worst_ns.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.total_tick_ns.store(0, Ordering::Relaxed);
        self.total_budget_ns.store(0, Ordering::Relaxed);
        self.sample_count.store(0, Ordering::Relaxed);
        self.worst_ns.store(0, Ordering::Relaxed);
        self.current_count.store(0, Ordering::Relaxed);
    }

    pub fn load_level(fraction: f64) -> TickLoad {
        if fraction < 0.5 {
            TickLoad::Low
        } else if fraction < 0.75 {
            TickLoad::Medium
        } else {
            TickLoad::High
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_one_in_n() {
        let budget = TickBudget::new(Duration::from_millis(2), 4);
        let now = Instant::now();
        let sampled = (0..8).filter(|_| budget.start_measure(now).is_some()).count();
        assert_eq!(sampled, 2);
    }

    #[test]
    fn test_fraction() {
        let budget = TickBudget::new(Duration::from_millis(2), 1);
        let t0 = Instant::now();
        let start = budget.start_measure(t0);
        budget.end_measure(start, t0 + Duration::from_millis(1));
        let start = budget.start_measure(t0);
        budget.end_measure(start, t0 + Duration::from_millis(3));
        let fraction = budget.take_fraction().unwrap();
        assert!((fraction - 1.0).abs() < 1e-9);
        assert_eq!(budget.worst_tick(), Duration::from_millis(3));
        // Taken: nothing left
        assert_eq!(budget.take_fraction(), None);
    }

    #[test]
    fn test_load_levels() {
        assert_eq!(TickBudget::load_level(0.1), TickLoad::Low);
        assert_eq!(TickBudget::load_level(0.6), TickLoad::Medium);
        assert_eq!(TickBudget::load_level(1.2), TickLoad::High);
    }
}
