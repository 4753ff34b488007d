// Track - Time-ordered events of one composition track
// Events are kept sorted by position so playback can slice windows lazily

use super::routing::DeviceChannelRoute;
use crate::timeline::Position;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Unique identifier for tracks
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track{}", self.0)
    }
}

/// Identifier of an audio segment (audio file region) placed on a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub u32);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackKind {
    #[default]
    Midi,
    Audio,
}

/// What happens at an event's position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventBody {
    /// A note; duration in ticks
    Note {
        pitch: u8,
        velocity: u8,
        duration: u64,
    },
    Controller {
        controller: u8,
        value: u8,
    },
    ProgramChange {
        program: u8,
    },
    /// An audio segment; duration in ticks
    AudioSegment {
        segment: SegmentId,
        duration: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackEvent {
    pub position: Position,
    pub body: EventBody,
}

impl TrackEvent {
    pub fn note(position: Position, pitch: u8, velocity: u8, duration: u64) -> Self {
        Self {
            position,
            body: EventBody::Note {
                pitch: pitch.min(127),
                velocity: velocity.clamp(1, 127),
                duration: duration.max(1),
            },
        }
    }

    pub fn controller(position: Position, controller: u8, value: u8) -> Self {
        Self {
            position,
            body: EventBody::Controller {
                controller: controller.min(127),
                value: value.min(127),
            },
        }
    }

    pub fn program_change(position: Position, program: u8) -> Self {
        Self {
            position,
            body: EventBody::ProgramChange {
                program: program.min(127),
            },
        }
    }

    pub fn audio_segment(position: Position, segment: SegmentId, duration: u64) -> Self {
        Self {
            position,
            body: EventBody::AudioSegment {
                segment,
                duration: duration.max(1),
            },
        }
    }

    /// Position where the event stops sounding (same as start for instant events)
    pub fn end(&self) -> Position {
        match self.body {
            EventBody::Note { duration, .. } | EventBody::AudioSegment { duration, .. } => {
                self.position + duration
            }
            _ => self.position,
        }
    }
}

/// A composition track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TrackData")]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub kind: TrackKind,
    pub route: DeviceChannelRoute,
    pub muted: bool,
    events: Vec<TrackEvent>,
}

#[derive(Deserialize)]
struct TrackData {
    id: TrackId,
    name: String,
    #[serde(default)]
    kind: TrackKind,
    route: DeviceChannelRoute,
    #[serde(default)]
    muted: bool,
    #[serde(default)]
    events: Vec<TrackEvent>,
}

impl From<TrackData> for Track {
    fn from(data: TrackData) -> Self {
        let mut track = Track::new(data.id, data.name, data.kind, data.route);
        track.muted = data.muted;
        for event in data.events {
            track.add_event(event);
        }
        track
    }
}

impl Track {
    pub fn new(
        id: TrackId,
        name: impl Into<String>,
        kind: TrackKind,
        route: DeviceChannelRoute,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            route,
            muted: false,
            events: Vec::new(),
        }
    }

    pub fn midi(id: TrackId, name: impl Into<String>, route: DeviceChannelRoute) -> Self {
        Self::new(id, name, TrackKind::Midi, route)
    }

    pub fn audio(id: TrackId, name: impl Into<String>, route: DeviceChannelRoute) -> Self {
        Self::new(id, name, TrackKind::Audio, route)
    }

    /// Add an event, after any existing event at the same position
    pub fn add_event(&mut self, event: TrackEvent) {
        let index = self.events.partition_point(|e| e.position <= event.position);
        self.events.insert(index, event);
    }

    pub fn with_events(mut self, events: impl IntoIterator<Item = TrackEvent>) -> Self {
        for event in events {
            self.add_event(event);
        }
        self
    }

    pub fn events(&self) -> &[TrackEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events starting inside `range` (start inclusive, end exclusive)
    pub fn events_in(&self, range: Range<Position>) -> &[TrackEvent] {
        let start = self.events.partition_point(|e| e.position < range.start);
        let end = self.events.partition_point(|e| e.position < range.end);
        &self.events[start..end.max(start)]
    }

    /// Audio segments that started before `position` and are still running there
    pub fn audio_segments_spanning(
        &self,
        position: Position,
    ) -> impl Iterator<Item = &TrackEvent> + '_ {
        let before = self.events.partition_point(|e| e.position < position);
        self.events[..before].iter().filter(move |e| {
            matches!(e.body, EventBody::AudioSegment { .. }) && e.end() > position
        })
    }

    /// Last position at which anything on the track is still sounding
    pub fn end_position(&self) -> Position {
        self.events
            .iter()
            .map(TrackEvent::end)
            .max()
            .unwrap_or(Position::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::routing::DeviceId;

    fn track() -> Track {
        Track::midi(
            TrackId(1),
            "Lead",
            DeviceChannelRoute::new(DeviceId(0), 0),
        )
    }

    #[test]
    fn test_events_stay_sorted() {
        let mut t = track();
        t.add_event(TrackEvent::note(Position(960), 64, 100, 240));
        t.add_event(TrackEvent::note(Position(0), 60, 100, 240));
        t.add_event(TrackEvent::controller(Position(960), 7, 100));
        let positions: Vec<u64> = t.events().iter().map(|e| e.position.ticks()).collect();
        assert_eq!(positions, vec![0, 960, 960]);
        // Insertion order kept for equal positions
        assert!(matches!(t.events()[1].body, EventBody::Note { .. }));
    }

    #[test]
    fn test_events_in_window() {
        let t = track().with_events((0..8).map(|i| TrackEvent::note(Position(i * 480), 60, 90, 100)));
        assert_eq!(t.events_in(Position(0)..Position(960)).len(), 2);
        assert_eq!(t.events_in(Position(481)..Position(960)).len(), 0);
        assert_eq!(t.events_in(Position(960)..Position(960)).len(), 0);
        assert_eq!(t.events_in(Position(3000)..Position(1000)).len(), 0);
    }

    #[test]
    fn test_note_values_are_clamped() {
        let e = TrackEvent::note(Position(0), 200, 0, 0);
        assert_eq!(
            e.body,
            EventBody::Note {
                pitch: 127,
                velocity: 1,
                duration: 1
            }
        );
    }

    #[test]
    fn test_audio_segments_spanning() {
        let t = Track::audio(TrackId(2), "Vox", DeviceChannelRoute::default()).with_events([
            TrackEvent::audio_segment(Position(0), SegmentId(1), 1920),
            TrackEvent::audio_segment(Position(2000), SegmentId(2), 100),
        ]);
        let spanning: Vec<_> = t.audio_segments_spanning(Position(960)).collect();
        assert_eq!(spanning.len(), 1);
        assert_eq!(t.audio_segments_spanning(Position(1920)).count(), 0);
        assert_eq!(t.end_position(), Position(2100));
    }
}
