// Engine configuration - timing, sync, health, metronome and channel sizes
//
// Loaded from RON or JSON (picked by file extension). Every section has
// conservative defaults so a missing file or a partial file is fine.

use crate::composition::{DeviceChannelRoute, DeviceId};
use crate::error::{EngineError, EngineResult};
use crate::sync::{FrameRate, SyncSettings};
use crate::timeline::DEFAULT_TEMPO;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR_NAME: &str = "seqsync";
const CONFIG_FILE_NAME: &str = "engine.ron";

/// Dispatch loop timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Real time covered by the look-ahead window
    pub lookahead_ms: u64,
    /// Period of the timer-driven dispatch loop
    pub tick_interval_us: u64,
    /// Added to the backend-reported latency
    pub extra_output_latency_ms: f64,
    /// Minimum interval between position notifications
    pub position_notify_interval_ms: u64,
    /// Tempo used before the first tempo change
    pub default_tempo: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            lookahead_ms: 200,
            tick_interval_us: 2_000,
            extra_output_latency_ms: 0.0,
            position_notify_interval_ms: 50,
            default_tempo: DEFAULT_TEMPO,
        }
    }
}

impl TimingConfig {
    pub fn lookahead(&self) -> Duration {
        Duration::from_millis(self.lookahead_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(self.tick_interval_us)
    }

    pub fn position_notify_interval(&self) -> Duration {
        Duration::from_millis(self.position_notify_interval_ms)
    }
}

/// External synchronization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub settings: SyncSettings,
    pub frame_rate: FrameRate,
    /// MMC device id we answer to and send as (0x7F = all call)
    pub mmc_device_id: u8,
    /// Upper bound of the MTC slew, in seconds of correction per second
    pub max_correction_rate: f64,
    /// Error below which the MTC slave reports Locked
    pub lock_threshold_ms: f64,
    /// Errors larger than this jump instead of slewing while not audible
    pub chase_threshold_ms: f64,
    /// Time without MTC before the slave declares the signal lost
    pub signal_timeout_ms: u64,
    /// Device used for clock, time code and machine control output
    pub output_device: DeviceId,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            settings: SyncSettings::default(),
            frame_rate: FrameRate::Fps25,
            mmc_device_id: 0x7F,
            max_correction_rate: 0.005,
            lock_threshold_ms: 2.0,
            chase_threshold_ms: 100.0,
            signal_timeout_ms: 3_000,
            output_device: DeviceId(0),
        }
    }
}

impl SyncConfig {
    pub fn signal_timeout(&self) -> Duration {
        Duration::from_millis(self.signal_timeout_ms)
    }
}

/// Health monitor thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Coarsest acceptable timer resolution
    pub max_timer_resolution_us: u64,
    /// Xruns within `xrun_window_ms` that make the condition persistent
    pub xrun_threshold: u32,
    pub xrun_window_ms: u64,
    /// Backend silence before the watchdog fires
    pub watchdog_timeout_ms: u64,
    /// Warn when a tick uses more than this fraction of the tick period
    pub tick_budget_fraction: f64,
    /// Measure one tick out of N
    pub tick_budget_sample_every: u32,
    /// Recovery attempts per episode of a transient condition
    pub recovery_attempts: u32,
    /// Time given to a recovery before the condition counts as persistent
    pub recovery_settle_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_timer_resolution_us: 2_000,
            xrun_threshold: 3,
            xrun_window_ms: 10_000,
            watchdog_timeout_ms: 5_000,
            tick_budget_fraction: 0.5,
            tick_budget_sample_every: 10,
            recovery_attempts: 1,
            recovery_settle_ms: 1_000,
        }
    }
}

impl HealthConfig {
    pub fn max_timer_resolution(&self) -> Duration {
        Duration::from_micros(self.max_timer_resolution_us)
    }

    pub fn xrun_window(&self) -> Duration {
        Duration::from_millis(self.xrun_window_ms)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn recovery_settle(&self) -> Duration {
        Duration::from_millis(self.recovery_settle_ms)
    }
}

/// One click level (bar, beat or sub-beat)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickLevel {
    pub enabled: bool,
    pub pitch: u8,
    pub velocity: u8,
}

impl ClickLevel {
    pub const fn new(enabled: bool, pitch: u8, velocity: u8) -> Self {
        Self {
            enabled,
            pitch,
            velocity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeConfig {
    pub enabled_while_playing: bool,
    pub enabled_while_recording: bool,
    pub bar: ClickLevel,
    pub beat: ClickLevel,
    pub sub_beat: ClickLevel,
    /// Sub-beat clicks per beat (2 = eighths in 4/4)
    pub subdivisions: u8,
    pub click_length_ticks: u64,
    pub route: DeviceChannelRoute,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            enabled_while_playing: false,
            enabled_while_recording: true,
            // GM percussion: high wood block / low wood block
            bar: ClickLevel::new(true, 76, 127),
            beat: ClickLevel::new(true, 77, 100),
            sub_beat: ClickLevel::new(false, 77, 60),
            subdivisions: 2,
            click_length_ticks: 60,
            route: DeviceChannelRoute::new(DeviceId(0), 9),
        }
    }
}

/// Ring buffer and queue capacities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    pub commands: usize,
    pub notifications: usize,
    pub midi_input: usize,
    /// Pre-allocated size of the scheduler's pending queue
    pub pending_events: usize,
    /// Input messages one recording take keeps; later ones are dropped
    pub recorded_events: usize,
    /// Closed takes waiting for the GUI side to finalize them
    pub finished_takes: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            commands: 256,
            notifications: 1024,
            midi_input: 1024,
            pending_events: 4096,
            recorded_events: 65_536,
            finished_takes: 8,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timing: TimingConfig,
    pub sync: SyncConfig,
    pub health: HealthConfig,
    pub metronome: MetronomeConfig,
    pub capacity: CapacityConfig,
}

impl EngineConfig {
    /// `<config dir>/seqsync/engine.ron`
    pub fn default_path() -> EngineResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or(EngineError::NoConfigDir)
    }

    /// Load from the default path, falling back to defaults if it does not exist
    pub fn load_or_default() -> EngineResult<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load(&path)
        } else {
            log::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig = match extension(path).as_deref() {
            Some("ron") => ron::from_str(&text)
                .map_err(|e| EngineError::Parse(format!("{}: {}", path.display(), e)))?,
            Some("json") => serde_json::from_str(&text)
                .map_err(|e| EngineError::Parse(format!("{}: {}", path.display(), e)))?,
            other => {
                return Err(EngineError::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                ));
            }
        };
        config.validate()?;
        log::debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let text = match extension(path).as_deref() {
            Some("ron") => ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| EngineError::Parse(e.to_string()))?,
            Some("json") => {
                serde_json::to_string_pretty(self).map_err(|e| EngineError::Parse(e.to_string()))?
            }
            other => {
                return Err(EngineError::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                ));
            }
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| EngineError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, text).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));

        let t = &self.timing;
        if t.lookahead_ms == 0 || t.lookahead_ms > 2_000 {
            return invalid(format!("lookahead_ms must be 1..=2000, got {}", t.lookahead_ms));
        }
        if t.tick_interval_us < 100 || t.tick_interval_us > 50_000 {
            return invalid(format!(
                "tick_interval_us must be 100..=50000, got {}",
                t.tick_interval_us
            ));
        }
        if t.tick_interval_us / 1_000 >= t.lookahead_ms {
            return invalid("tick interval must be shorter than the look-ahead".to_string());
        }
        if !t.extra_output_latency_ms.is_finite() || t.extra_output_latency_ms < 0.0 {
            return invalid("extra_output_latency_ms must be >= 0".to_string());
        }
        if !(t.default_tempo.is_finite() && t.default_tempo > 0.0) {
            return invalid(format!("default_tempo must be positive, got {}", t.default_tempo));
        }

        let s = &self.sync;
        s.settings.validate().map_err(EngineError::InvalidConfig)?;
        if !(s.max_correction_rate > 0.0 && s.max_correction_rate < 1.0) {
            return invalid(format!(
                "max_correction_rate must be in (0, 1), got {}",
                s.max_correction_rate
            ));
        }
        if !(s.lock_threshold_ms.is_finite() && s.lock_threshold_ms > 0.0) {
            return invalid("lock_threshold_ms must be positive".to_string());
        }
        if !(s.chase_threshold_ms.is_finite() && s.chase_threshold_ms >= s.lock_threshold_ms) {
            return invalid("chase_threshold_ms must be >= lock_threshold_ms".to_string());
        }
        if s.signal_timeout_ms == 0 {
            return invalid("signal_timeout_ms must be > 0".to_string());
        }
        if s.mmc_device_id > 0x7F {
            return invalid(format!("mmc_device_id must be <= 0x7F, got {:#x}", s.mmc_device_id));
        }

        let h = &self.health;
        if h.xrun_threshold == 0 {
            return invalid("xrun_threshold must be >= 1".to_string());
        }
        if h.xrun_window_ms == 0 || h.watchdog_timeout_ms == 0 {
            return invalid("health windows must be > 0".to_string());
        }
        if h.recovery_attempts == 0 || h.recovery_attempts > 5 {
            return invalid(format!(
                "recovery_attempts must be 1..=5, got {}",
                h.recovery_attempts
            ));
        }
        if !(h.tick_budget_fraction > 0.0 && h.tick_budget_fraction <= 1.0) {
            return invalid("tick_budget_fraction must be in (0, 1]".to_string());
        }

        let m = &self.metronome;
        if m.route.channel > 15 {
            return invalid(format!("metronome channel {} out of range", m.route.channel));
        }
        for level in [m.bar, m.beat, m.sub_beat] {
            if level.pitch > 127 || level.velocity == 0 || level.velocity > 127 {
                return invalid("metronome pitch/velocity out of range".to_string());
            }
        }
        if m.subdivisions == 0 || m.click_length_ticks == 0 {
            return invalid("metronome subdivisions and click length must be > 0".to_string());
        }

        let c = &self.capacity;
        if [
            c.commands,
            c.notifications,
            c.midi_input,
            c.pending_events,
            c.recorded_events,
            c.finished_takes,
        ]
        .contains(&0)
        {
            return invalid("capacities must be > 0".to_string());
        }

        Ok(())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}
