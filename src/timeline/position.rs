// Position - Musical time coordinates
// Ticks, bar/beat/tick decomposition and time signatures

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// Ticks per quarter note (PPQN)
/// Standard MIDI resolution, divisible by the 24 PPQN of MIDI Clock
pub const TICKS_PER_QUARTER: u64 = 480;

/// Real time measured from Position 0 along the tempo map
pub type Seconds = f64;

/// Position in the timeline, in ticks from the start of the composition
///
/// Positions are tempo independent. Use a [`TempoMap`](super::TempoMap) to
/// turn them into seconds or into bar/beat coordinates.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Position(pub u64);

impl Position {
    pub const ZERO: Position = Position(0);

    pub fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    pub fn from_quarters(quarters: u64) -> Self {
        Self(quarters * TICKS_PER_QUARTER)
    }

    pub fn ticks(&self) -> u64 {
        self.0
    }

    /// Position expressed in (fractional) quarter notes
    pub fn quarters(&self) -> f64 {
        self.0 as f64 / TICKS_PER_QUARTER as f64
    }

    pub fn saturating_sub(self, other: Position) -> Position {
        Position(self.0.saturating_sub(other.0))
    }
}

impl Add<u64> for Position {
    type Output = Position;

    fn add(self, ticks: u64) -> Position {
        Position(self.0.saturating_add(ticks))
    }
}

impl Sub for Position {
    type Output = u64;

    fn sub(self, other: Position) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}t", self.0)
    }
}

/// Time signature (numerator/denominator)
/// Example: 6/8 time = TimeSignature { numerator: 6, denominator: 8 }
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,   // Beats per bar
    pub denominator: u8, // Note value of one beat (4 = quarter, 8 = eighth)
}

impl TimeSignature {
    /// Creates a new time signature, `None` if it is not a valid one
    pub fn new(numerator: u8, denominator: u8) -> Option<Self> {
        if numerator == 0 || denominator == 0 || !denominator.is_power_of_two() || denominator > 64
        {
            return None;
        }
        Some(Self {
            numerator,
            denominator,
        })
    }

    /// Common 4/4 time signature
    pub const fn four_four() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }

    /// Common 3/4 time signature (waltz)
    pub const fn three_four() -> Self {
        Self {
            numerator: 3,
            denominator: 4,
        }
    }

    /// Common 6/8 time signature
    pub const fn six_eight() -> Self {
        Self {
            numerator: 6,
            denominator: 8,
        }
    }

    /// Length of one beat in ticks
    /// Example: 4/4 = 480, 6/8 = 240 (eighth notes)
    pub fn ticks_per_beat(&self) -> u64 {
        TICKS_PER_QUARTER * 4 / self.denominator as u64
    }

    /// Length of one bar in ticks
    pub fn ticks_per_bar(&self) -> u64 {
        self.ticks_per_beat() * self.numerator as u64
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::four_four()
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Bar/beat/tick decomposition of a [`Position`]
/// Bars and beats are 1-based, ticks are 0-based within the beat
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MusicalTime {
    pub bar: u32,
    pub beat: u16,
    pub tick: u32,
}

impl MusicalTime {
    pub fn new(bar: u32, beat: u16, tick: u32) -> Self {
        Self { bar, beat, tick }
    }

    /// Bar 1, beat 1, tick 0
    pub fn zero() -> Self {
        Self::new(1, 1, 0)
    }

    /// True when this is the first tick of a beat
    pub fn is_on_beat(&self) -> bool {
        self.tick == 0
    }

    /// True when this is the first tick of a bar
    pub fn is_downbeat(&self) -> bool {
        self.beat == 1 && self.tick == 0
    }
}

impl Default for MusicalTime {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for MusicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}:{:03}", self.bar, self.beat, self.tick)
    }
}
