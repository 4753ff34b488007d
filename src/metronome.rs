// Metronome - Click events on bars, beats and sub-beats
// Clicks follow the time signature walk, so signature changes restart the grid

use crate::composition::DeviceChannelRoute;
use crate::config::{ClickLevel, MetronomeConfig};
use crate::scheduler::ClickAccent;
use crate::timeline::{Position, TempoMap};
use crate::transport::TransportState;
use std::ops::Range;

/// One click, before it is placed on the real-time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Click {
    pub position: Position,
    pub accent: ClickAccent,
    pub pitch: u8,
    pub velocity: u8,
}

#[derive(Debug, Clone)]
pub struct Metronome {
    config: MetronomeConfig,
}

impl Metronome {
    pub fn new(config: MetronomeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MetronomeConfig {
        &self.config
    }

    pub fn set_enabled_while_playing(&mut self, enabled: bool) {
        self.config.enabled_while_playing = enabled;
    }

    /// Whether clicks are produced in this transport state
    pub fn is_active(&self, state: TransportState) -> bool {
        match state {
            TransportState::Recording => self.config.enabled_while_recording,
            TransportState::Playing => self.config.enabled_while_playing,
            TransportState::Stopped | TransportState::Paused => false,
        }
    }

    pub fn route(&self) -> DeviceChannelRoute {
        self.config.route
    }

    pub fn click_length(&self) -> u64 {
        self.config.click_length_ticks.max(1)
    }

    fn level_for(&self, accent: ClickAccent) -> Option<ClickLevel> {
        let c = &self.config;
        match accent {
            // A disabled bar accent still clicks as a plain beat
            ClickAccent::Bar if c.bar.enabled => Some(c.bar),
            ClickAccent::Bar | ClickAccent::Beat => c.beat.enabled.then_some(c.beat),
            ClickAccent::SubBeat => c.sub_beat.enabled.then_some(c.sub_beat),
        }
    }

    /// Emit every click in `range` (start inclusive, end exclusive), in order
    pub fn clicks_in(&self, map: &TempoMap, range: Range<Position>, mut emit: impl FnMut(Click)) {
        let subdivisions = if self.config.sub_beat.enabled {
            self.config.subdivisions.max(1) as u64
        } else {
            1
        };

        let mut cursor = range.start;
        while cursor < range.end {
            let (span_start, signature, span_end) = map.signature_span_at(cursor);
            let limit = span_end.map_or(range.end, |end| end.min(range.end));
            let beat = signature.ticks_per_beat();
            let bar = signature.ticks_per_bar();

            let mut beat_index = (cursor - span_start) / beat;
            loop {
                let beat_offset = beat_index * beat;
                let beat_start = span_start + beat_offset;
                if beat_start >= limit {
                    break;
                }
                for k in 0..subdivisions {
                    let position = beat_start + k * beat / subdivisions;
                    if position < cursor {
                        continue;
                    }
                    if position >= limit {
                        break;
                    }
                    let accent = if k != 0 {
                        ClickAccent::SubBeat
                    } else if beat_offset % bar == 0 {
                        ClickAccent::Bar
                    } else {
                        ClickAccent::Beat
                    };
                    if let Some(level) = self.level_for(accent) {
                        emit(Click {
                            position,
                            accent,
                            pitch: level.pitch,
                            velocity: level.velocity,
                        });
                    }
                }
                beat_index += 1;
            }
            cursor = limit;
        }
    }
}
