// Health - subsystem diagnostics, bounded recovery and escalation

pub mod monitor;
pub mod recovery;
pub mod tick_budget;

pub use monitor::{HealthMonitor, HealthVerdict};
pub use recovery::RecoveryStrategy;
pub use tick_budget::{TickBudget, TickLoad};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Something the monitor watches for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HealthCondition {
    /// Driver wake-ups overshoot more than the acceptable resolution
    CoarseTimer,
    /// New buffer under/overruns since the last tick
    Xrun,
    /// Xruns at or above the threshold within the window
    RepeatedXruns,
    Disconnected,
    /// Connected backend silent for longer than the watchdog timeout
    WatchdogTimeout,
    /// Ticks use too much of their period
    TickOverrun,
}

impl fmt::Display for HealthCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthCondition::CoarseTimer => "coarse timer",
            HealthCondition::Xrun => "xrun",
            HealthCondition::RepeatedXruns => "repeated xruns",
            HealthCondition::Disconnected => "backend disconnected",
            HealthCondition::WatchdogTimeout => "backend watchdog",
            HealthCondition::TickOverrun => "tick overrun",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// What was done about a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryOutcome {
    /// Nothing to do (informational, or a warning without a remedy)
    None,
    /// Recovery started, outcome judged after the settle time
    Attempted,
    /// The condition cleared
    Succeeded,
    /// The recovery action itself failed
    Failed,
    /// Persistent: transport stopped and recording disabled
    Escalated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub condition: HealthCondition,
    pub severity: Severity,
    pub recovery: RecoveryOutcome,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(
        condition: HealthCondition,
        severity: Severity,
        recovery: RecoveryOutcome,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition,
            severity,
            recovery,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:?}] {}: {} ({:?})",
            self.severity, self.condition, self.message, self.recovery
        )
    }
}
