// SMPTE/MTC timecode - frame rates, frame counting and drop-frame arithmetic

use crate::timeline::Seconds;
use serde::{Deserialize, Serialize};
use std::fmt;

/// MTC frame rates, with the two rate bits used on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameRate {
    Fps24,
    #[default]
    Fps25,
    /// 30000/1001 fps with drop-frame labels
    Fps2997Drop,
    Fps30,
}

impl FrameRate {
    pub const ALL: [FrameRate; 4] = [
        FrameRate::Fps24,
        FrameRate::Fps25,
        FrameRate::Fps2997Drop,
        FrameRate::Fps30,
    ];

    pub fn rate_bits(self) -> u8 {
        match self {
            FrameRate::Fps24 => 0,
            FrameRate::Fps25 => 1,
            FrameRate::Fps2997Drop => 2,
            FrameRate::Fps30 => 3,
        }
    }

    pub fn from_rate_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => FrameRate::Fps24,
            1 => FrameRate::Fps25,
            2 => FrameRate::Fps2997Drop,
            _ => FrameRate::Fps30,
        }
    }

    /// Frame labels per second (30 for 29.97)
    pub fn nominal_fps(self) -> u32 {
        match self {
            FrameRate::Fps24 => 24,
            FrameRate::Fps25 => 25,
            FrameRate::Fps2997Drop | FrameRate::Fps30 => 30,
        }
    }

    /// Real frames per second
    pub fn fps(self) -> f64 {
        match self {
            FrameRate::Fps2997Drop => 30_000.0 / 1001.0,
            other => other.nominal_fps() as f64,
        }
    }

    pub fn frame_duration(self) -> Seconds {
        1.0 / self.fps()
    }

    pub fn is_drop_frame(self) -> bool {
        self == FrameRate::Fps2997Drop
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameRate::Fps24 => write!(f, "24 fps"),
            FrameRate::Fps25 => write!(f, "25 fps"),
            FrameRate::Fps2997Drop => write!(f, "29.97 fps drop"),
            FrameRate::Fps30 => write!(f, "30 fps"),
        }
    }
}

// 29.97 drop-frame: two labels skipped every minute except every tenth
const DF_FRAMES_PER_10_MIN: u64 = 17_982;
const DF_FRAMES_PER_MIN: u64 = 1_798;

/// hh:mm:ss:ff timecode at a given rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timecode {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
    /// Hundredths of a frame (only carried by MMC locate)
    pub subframes: u8,
    pub rate: FrameRate,
}

impl Timecode {
    pub fn new(hours: u8, minutes: u8, seconds: u8, frames: u8, rate: FrameRate) -> Self {
        Self {
            hours,
            minutes,
            seconds,
            frames,
            subframes: 0,
            rate,
        }
    }

    pub fn zero(rate: FrameRate) -> Self {
        Self::new(0, 0, 0, 0, rate)
    }

    /// Labels are within range for the rate (including dropped drop-frame labels)
    pub fn is_valid(&self) -> bool {
        let fps = self.rate.nominal_fps() as u8;
        if self.hours > 23 || self.minutes > 59 || self.seconds > 59 || self.frames >= fps {
            return false;
        }
        if self.subframes > 99 {
            return false;
        }
        if self.rate.is_drop_frame()
            && self.seconds == 0
            && self.frames < 2
            && self.minutes % 10 != 0
        {
            return false;
        }
        true
    }

    /// Frame count since 00:00:00:00
    pub fn total_frames(&self) -> u64 {
        let fps = self.rate.nominal_fps() as u64;
        let hours = self.hours as u64;
        let minutes = self.minutes as u64;
        let nominal = ((hours * 3600 + minutes * 60 + self.seconds as u64) * fps)
            + self.frames as u64;
        if self.rate.is_drop_frame() {
            let total_minutes = hours * 60 + minutes;
            nominal.saturating_sub(2 * (total_minutes - total_minutes / 10))
        } else {
            nominal
        }
    }

    /// Timecode label of the `frame`-th frame (wraps at 24 hours)
    pub fn from_frames(frame: u64, rate: FrameRate) -> Self {
        let fps = rate.nominal_fps() as u64;
        let mut frame = frame;
        if rate.is_drop_frame() {
            let day = DF_FRAMES_PER_10_MIN * 6 * 24;
            frame %= day;
            let tens = frame / DF_FRAMES_PER_10_MIN;
            let rem = frame % DF_FRAMES_PER_10_MIN;
            frame += 18 * tens;
            if rem >= 2 {
                frame += 2 * ((rem - 2) / DF_FRAMES_PER_MIN);
            }
        } else {
            frame %= fps * 3600 * 24;
        }
        let frames = frame % fps;
        let total_seconds = frame / fps;
        Self {
            hours: (total_seconds / 3600) as u8,
            minutes: ((total_seconds / 60) % 60) as u8,
            seconds: (total_seconds % 60) as u8,
            frames: frames as u8,
            subframes: 0,
            rate,
        }
    }

    /// Real seconds since 00:00:00:00, subframes included
    pub fn to_seconds(&self) -> Seconds {
        (self.total_frames() as f64 + self.subframes as f64 / 100.0) / self.rate.fps()
    }

    /// Timecode of the frame running at `seconds` (negative clamps to zero)
    pub fn from_seconds(seconds: Seconds, rate: FrameRate) -> Self {
        let exact = if seconds.is_finite() && seconds > 0.0 {
            seconds * rate.fps()
        } else {
            0.0
        };
        // Guard against 0.99999 frame artefacts on exact frame boundaries
        let frames = (exact + 1e-6).floor();
        let mut tc = Self::from_frames(frames as u64, rate);
        tc.subframes = (((exact - frames).max(0.0)) * 100.0).floor().min(99.0) as u8;
        tc
    }

    /// Same timecode moved by `delta` frames (clamped at zero)
    pub fn offset_frames(&self, delta: i64) -> Self {
        let frames = self.total_frames() as i64 + delta;
        Self::from_frames(frames.max(0) as u64, self.rate)
    }

    /// Data nibble of quarter-frame piece `piece` (0-7)
    pub fn quarter_frame_nibble(&self, piece: u8) -> u8 {
        match piece & 0x07 {
            0 => self.frames & 0x0F,
            1 => (self.frames >> 4) & 0x01,
            2 => self.seconds & 0x0F,
            3 => (self.seconds >> 4) & 0x03,
            4 => self.minutes & 0x0F,
            5 => (self.minutes >> 4) & 0x03,
            6 => self.hours & 0x0F,
            _ => ((self.hours >> 4) & 0x01) | (self.rate.rate_bits() << 1),
        }
    }

    /// Hours byte with the rate in bits 5-6 (full frame and MMC locate)
    pub fn hours_with_rate(&self) -> u8 {
        (self.rate.rate_bits() << 5) | (self.hours & 0x1F)
    }

    pub fn from_hours_with_rate(byte: u8, minutes: u8, seconds: u8, frames: u8) -> Self {
        Self::new(
            byte & 0x1F,
            minutes & 0x3F,
            seconds & 0x3F,
            frames & 0x1F,
            FrameRate::from_rate_bits(byte >> 5),
        )
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.rate.is_drop_frame() { ';' } else { ':' };
        write!(
            f,
            "{:02}:{:02}:{:02}{}{:02}",
            self.hours, self.minutes, self.seconds, sep, self.frames
        )
    }
}
