// Tempo Map - Conversion between musical positions and real time
// Piecewise tempo integration with linear ramps, plus bar/beat lookup

use super::position::{MusicalTime, Position, Seconds, TICKS_PER_QUARTER, TimeSignature};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tempo used before the first tempo change when nothing else is configured
pub const DEFAULT_TEMPO: f64 = 120.0;

/// Maximum bisection iterations when the closed-form ramp inversion fails
const BISECTION_STEPS: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TempoMapError {
    #[error("tempo must be positive and finite, got {0}")]
    InvalidTempo(f64),

    #[error("invalid time signature {numerator}/{denominator}")]
    InvalidTimeSignature { numerator: u8, denominator: u8 },
}

/// A tempo change in quarter notes per minute
///
/// When `ramp_to` is set, the tempo moves linearly (in musical time) from
/// `tempo` to the target over the span that ends at the next tempo change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoChange {
    pub position: Position,
    pub tempo: f64,
    #[serde(default)]
    pub ramp_to: Option<f64>,
}

impl TempoChange {
    pub fn constant(position: Position, tempo: f64) -> Self {
        Self {
            position,
            tempo,
            ramp_to: None,
        }
    }

    pub fn ramp(position: Position, tempo: f64, target: f64) -> Self {
        Self {
            position,
            tempo,
            ramp_to: Some(target),
        }
    }

    fn validate(&self) -> Result<(), TempoMapError> {
        if !(self.tempo.is_finite() && self.tempo > 0.0) {
            return Err(TempoMapError::InvalidTempo(self.tempo));
        }
        if let Some(target) = self.ramp_to
            && !(target.is_finite() && target > 0.0)
        {
            return Err(TempoMapError::InvalidTempo(target));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSignatureChange {
    pub position: Position,
    pub signature: TimeSignature,
    #[serde(default)]
    pub hidden: bool,
}

impl TimeSignatureChange {
    pub fn new(position: Position, signature: TimeSignature) -> Self {
        Self {
            position,
            signature,
            hidden: false,
        }
    }
}

/// One piece of the integrated tempo curve
///
/// Within a segment the period (seconds per quarter) varies linearly from
/// `start_period` to `end_period`, so elapsed time is quadratic in
/// musical time and a constant segment is the special case of equal periods.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    start_ticks: u64,
    end_ticks: Option<u64>,
    start_seconds: Seconds,
    start_period: f64,
    end_period: f64,
}

impl Segment {
    fn length_quarters(&self) -> Option<f64> {
        self.end_ticks
            .map(|end| (end - self.start_ticks) as f64 / TICKS_PER_QUARTER as f64)
    }

    fn is_ramp(&self) -> bool {
        self.start_period != self.end_period
    }

    /// Seconds elapsed `quarters` into the segment
    fn elapsed(&self, quarters: f64) -> Seconds {
        match self.length_quarters() {
            Some(len) if self.is_ramp() && len > 0.0 => {
                let slope = (self.end_period - self.start_period) / len;
                self.start_period * quarters + 0.5 * slope * quarters * quarters
            }
            _ => self.start_period * quarters,
        }
    }

    /// Period (seconds per quarter) `quarters` into the segment
    fn period_at(&self, quarters: f64) -> f64 {
        match self.length_quarters() {
            Some(len) if self.is_ramp() && len > 0.0 => {
                let u = quarters.clamp(0.0, len);
                self.start_period + (self.end_period - self.start_period) * u / len
            }
            _ => self.start_period,
        }
    }

    /// Quarters into the segment at which `seconds` have elapsed
    fn quarters_for(&self, seconds: Seconds) -> f64 {
        let Some(len) = self.length_quarters().filter(|len| *len > 0.0 && self.is_ramp()) else {
            return seconds / self.start_period;
        };

        // a*u^2 + b*u - dt = 0, root taken in the form that stays stable
        // when the slope approaches zero
        let a = 0.5 * (self.end_period - self.start_period) / len;
        let b = self.start_period;
        let disc = b * b + 4.0 * a * seconds;
        if disc >= 0.0 {
            let u = 2.0 * seconds / (b + disc.sqrt());
            if u.is_finite() && (0.0..=len * (1.0 + 1e-9)).contains(&u) {
                return u;
            }
        }
        self.bisect(seconds, len)
    }

    fn bisect(&self, seconds: Seconds, len: f64) -> f64 {
        let (mut lo, mut hi) = (0.0, len);
        for _ in 0..BISECTION_STEPS {
            let mid = 0.5 * (lo + hi);
            if self.elapsed(mid) < seconds {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        0.5 * (lo + hi)
    }
}

/// Tempo and time signature map of a composition
///
/// Immutable while the engine uses it: edits happen on a copy that is then
/// published as a new composition snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TempoMapData", into = "TempoMapData")]
pub struct TempoMap {
    default_tempo: f64,
    tempos: Vec<TempoChange>,
    signatures: Vec<TimeSignatureChange>,
    segments: Vec<Segment>,
}

#[derive(Serialize, Deserialize)]
struct TempoMapData {
    default_tempo: f64,
    #[serde(default)]
    tempos: Vec<TempoChange>,
    #[serde(default)]
    signatures: Vec<TimeSignatureChange>,
}

impl TryFrom<TempoMapData> for TempoMap {
    type Error = TempoMapError;

    fn try_from(data: TempoMapData) -> Result<Self, Self::Error> {
        let mut map = TempoMap::new(data.default_tempo)?;
        for change in data.tempos {
            map.insert_tempo(change)?;
        }
        for change in data.signatures {
            map.insert_signature(change);
        }
        Ok(map)
    }
}

impl From<TempoMap> for TempoMapData {
    fn from(map: TempoMap) -> Self {
        Self {
            default_tempo: map.default_tempo,
            tempos: map.tempos,
            signatures: map.signatures,
        }
    }
}

impl TempoMap {
    pub fn new(default_tempo: f64) -> Result<Self, TempoMapError> {
        if !(default_tempo.is_finite() && default_tempo > 0.0) {
            return Err(TempoMapError::InvalidTempo(default_tempo));
        }
        let mut map = Self {
            default_tempo,
            tempos: Vec::new(),
            signatures: Vec::new(),
            segments: Vec::new(),
        };
        map.rebuild();
        Ok(map)
    }

    /// Map with a single constant tempo from Position 0
    pub fn constant(tempo: f64) -> Result<Self, TempoMapError> {
        let mut map = Self::new(tempo)?;
        map.insert_tempo(TempoChange::constant(Position::ZERO, tempo))?;
        Ok(map)
    }

    pub fn default_tempo(&self) -> f64 {
        self.default_tempo
    }

    pub fn set_default_tempo(&mut self, tempo: f64) -> Result<(), TempoMapError> {
        if !(tempo.is_finite() && tempo > 0.0) {
            return Err(TempoMapError::InvalidTempo(tempo));
        }
        self.default_tempo = tempo;
        self.rebuild();
        Ok(())
    }

    pub fn tempo_changes(&self) -> &[TempoChange] {
        &self.tempos
    }

    pub fn signature_changes(&self) -> &[TimeSignatureChange] {
        &self.signatures
    }

    /// Insert a tempo change, replacing any change at the same position
    pub fn insert_tempo(&mut self, change: TempoChange) -> Result<(), TempoMapError> {
        change.validate()?;
        match self
            .tempos
            .binary_search_by_key(&change.position, |c| c.position)
        {
            Ok(index) => self.tempos[index] = change,
            Err(index) => self.tempos.insert(index, change),
        }
        self.rebuild();
        Ok(())
    }

    pub fn remove_tempo_at(&mut self, position: Position) -> Option<TempoChange> {
        let index = self
            .tempos
            .binary_search_by_key(&position, |c| c.position)
            .ok()?;
        let removed = self.tempos.remove(index);
        self.rebuild();
        Some(removed)
    }

    /// Insert a time signature change, replacing any change at the same position
    pub fn insert_signature(&mut self, change: TimeSignatureChange) {
        match self
            .signatures
            .binary_search_by_key(&change.position, |c| c.position)
        {
            Ok(index) => self.signatures[index] = change,
            Err(index) => self.signatures.insert(index, change),
        }
    }

    /// Checked variant of [`insert_signature`](Self::insert_signature) for raw values
    pub fn insert_signature_parts(
        &mut self,
        position: Position,
        numerator: u8,
        denominator: u8,
    ) -> Result<(), TempoMapError> {
        let signature = TimeSignature::new(numerator, denominator).ok_or(
            TempoMapError::InvalidTimeSignature {
                numerator,
                denominator,
            },
        )?;
        self.insert_signature(TimeSignatureChange::new(position, signature));
        Ok(())
    }

    pub fn remove_signature_at(&mut self, position: Position) -> Option<TimeSignatureChange> {
        let index = self
            .signatures
            .binary_search_by_key(&position, |c| c.position)
            .ok()?;
        Some(self.signatures.remove(index))
    }

    fn rebuild(&mut self) {
        let default_period = 60.0 / self.default_tempo;
        let mut segments = Vec::with_capacity(self.tempos.len() + 1);

        let first_start = self.tempos.first().map_or(u64::MAX, |c| c.position.ticks());
        if first_start > 0 {
            segments.push(Segment {
                start_ticks: 0,
                end_ticks: self.tempos.first().map(|c| c.position.ticks()),
                start_seconds: 0.0,
                start_period: default_period,
                end_period: default_period,
            });
        }

        for (index, change) in self.tempos.iter().enumerate() {
            let end_ticks = self.tempos.get(index + 1).map(|next| next.position.ticks());
            let start_period = 60.0 / change.tempo;
            // A ramp needs somewhere to end and somewhere to go, otherwise it
            // is just a constant tempo
            let end_period = match (change.ramp_to, end_ticks) {
                (Some(target), Some(end)) if end > change.position.ticks() => 60.0 / target,
                _ => start_period,
            };
            segments.push(Segment {
                start_ticks: change.position.ticks(),
                end_ticks,
                start_seconds: 0.0,
                start_period,
                end_period,
            });
        }

        let mut elapsed = 0.0;
        for segment in segments.iter_mut() {
            segment.start_seconds = elapsed;
            if let Some(len) = segment.length_quarters() {
                elapsed += segment.elapsed(len);
            }
        }
        self.segments = segments;
    }

    fn segment_for_ticks(&self, ticks: f64) -> &Segment {
        let index = self
            .segments
            .partition_point(|s| s.start_ticks as f64 <= ticks)
            .saturating_sub(1);
        &self.segments[index]
    }

    fn segment_for_seconds(&self, seconds: Seconds) -> &Segment {
        let index = self
            .segments
            .partition_point(|s| s.start_seconds <= seconds)
            .saturating_sub(1);
        &self.segments[index]
    }

    /// Seconds at a fractional tick position
    pub fn seconds_at_ticks(&self, ticks: f64) -> Seconds {
        if !(ticks > 0.0) {
            return 0.0;
        }
        let segment = self.segment_for_ticks(ticks);
        let quarters = (ticks - segment.start_ticks as f64) / TICKS_PER_QUARTER as f64;
        segment.start_seconds + segment.elapsed(quarters)
    }

    /// Fractional tick position reached after `seconds`
    pub fn ticks_at_seconds(&self, seconds: Seconds) -> f64 {
        if !(seconds > 0.0) {
            return 0.0;
        }
        let segment = self.segment_for_seconds(seconds);
        let quarters = segment.quarters_for(seconds - segment.start_seconds);
        segment.start_ticks as f64 + quarters * TICKS_PER_QUARTER as f64
    }

    /// Real time of a musical position
    pub fn time_at(&self, position: Position) -> Seconds {
        self.seconds_at_ticks(position.ticks() as f64)
    }

    /// Musical position reached at a real time, rounded to the nearest tick
    pub fn position_at(&self, seconds: Seconds) -> Position {
        Position(self.ticks_at_seconds(seconds).round().max(0.0) as u64)
    }

    /// First position whose time is at or after `seconds`
    pub fn position_at_or_after(&self, seconds: Seconds) -> Position {
        let mut position = Position(self.ticks_at_seconds(seconds).ceil().max(0.0) as u64);
        while position.ticks() > 0 && self.time_at(Position(position.ticks() - 1)) >= seconds {
            position = Position(position.ticks() - 1);
        }
        position
    }

    /// Instantaneous tempo (quarter notes per minute) at a position
    pub fn tempo_at(&self, position: Position) -> f64 {
        let segment = self.segment_for_ticks(position.ticks() as f64);
        let quarters =
            (position.ticks() - segment.start_ticks.min(position.ticks())) as f64
                / TICKS_PER_QUARTER as f64;
        60.0 / segment.period_at(quarters)
    }

    /// Active time signature at a position (4/4 before the first change)
    pub fn signature_at(&self, position: Position) -> TimeSignature {
        self.signature_span_at(position).1
    }

    /// Start of the active signature span, its signature and where it ends
    pub fn signature_span_at(
        &self,
        position: Position,
    ) -> (Position, TimeSignature, Option<Position>) {
        let index = self.signatures.partition_point(|c| c.position <= position);
        let end = self.signatures.get(index).map(|c| c.position);
        match index.checked_sub(1).map(|i| &self.signatures[i]) {
            Some(change) => (change.position, change.signature, end),
            None => (Position::ZERO, TimeSignature::default(), end),
        }
    }

    /// Bar/beat/tick of a position
    ///
    /// Each signature change starts a new bar; an incomplete bar before a
    /// change still counts as a bar.
    pub fn bar_beat_at(&self, position: Position) -> MusicalTime {
        let (span_start, signature, bars_before) = self.bars_before_span(position);
        let offset = position - span_start;
        let bar = bars_before + offset / signature.ticks_per_bar();
        let in_bar = offset % signature.ticks_per_bar();
        MusicalTime {
            bar: (bar + 1).min(u32::MAX as u64) as u32,
            beat: (in_bar / signature.ticks_per_beat() + 1) as u16,
            tick: (in_bar % signature.ticks_per_beat()) as u32,
        }
    }

    fn bars_before_span(&self, position: Position) -> (Position, TimeSignature, u64) {
        let mut bars = 0u64;
        let mut span_start = Position::ZERO;
        let mut signature = TimeSignature::default();
        for change in self.signatures.iter().take_while(|c| c.position <= position) {
            let len = change.position - span_start;
            bars += len.div_ceil(signature.ticks_per_bar());
            span_start = change.position;
            signature = change.signature;
        }
        (span_start, signature, bars)
    }

    /// Position of the first tick of a (1-based) bar
    pub fn position_of_bar(&self, bar: u32) -> Position {
        let target = bar.max(1) as u64 - 1;
        let mut bars = 0u64;
        let mut span_start = Position::ZERO;
        let mut signature = TimeSignature::default();
        for change in &self.signatures {
            let span_bars = (change.position - span_start).div_ceil(signature.ticks_per_bar());
            if bars + span_bars > target {
                break;
            }
            bars += span_bars;
            span_start = change.position;
            signature = change.signature;
        }
        span_start + (target - bars) * signature.ticks_per_bar()
    }
}

impl Default for TempoMap {
    fn default() -> Self {
        let mut map = Self {
            default_tempo: DEFAULT_TEMPO,
            tempos: Vec::new(),
            signatures: Vec::new(),
            segments: Vec::new(),
        };
        map.rebuild();
        map
    }
}
