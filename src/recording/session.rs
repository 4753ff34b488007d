// Recording session - captures input on armed tracks
//
// Input is stored in song seconds as it arrives, into a buffer sized when
// the take opens. Conversion to musical positions waits until the session
// is finalized, so tempo map edits made during the take apply to the whole
// take. Finalizing allocates; the dispatch thread hands the closed take
// over as a `FinishedTake` and the GUI side converts it.

use crate::composition::{Composition, DeviceId, SourceFilter, TrackEvent, TrackId};
use crate::midi::MidiMessage;
use crate::timeline::{Position, Seconds, TempoMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// One input message, timestamped on the song time axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapturedEvent {
    pub seconds: Seconds,
    pub device: DeviceId,
    pub message: MidiMessage,
}

/// Result of a take for one track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedSegment {
    pub track: TrackId,
    pub session: Uuid,
    pub start: Position,
    pub end: Position,
    pub events: Vec<TrackEvent>,
}

#[derive(Debug, Clone)]
pub struct RecordingSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    start_position: Position,
    armed: Vec<(TrackId, SourceFilter)>,
    captured: Vec<CapturedEvent>,
    limit: usize,
    overflowed: u64,
}

impl RecordingSession {
    /// Open a session for every track armed in `composition`
    ///
    /// At most `limit` messages are kept; the buffer is allocated here and
    /// never grows while the take runs.
    pub fn begin(composition: &Composition, start_position: Position, limit: usize) -> Self {
        let armed = composition
            .armed
            .iter()
            .filter(|id| composition.track(**id).is_some())
            .map(|id| (*id, composition.source_filter(*id)))
            .collect();
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            start_position,
            armed,
            captured: Vec::with_capacity(limit),
            limit,
            overflowed: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn start_position(&self) -> Position {
        self.start_position
    }

    pub fn armed_tracks(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.armed.iter().map(|(id, _)| *id)
    }

    pub fn captured(&self) -> &[CapturedEvent] {
        &self.captured
    }

    /// Accepted messages dropped because the buffer was full
    pub fn overflowed(&self) -> u64 {
        self.overflowed
    }

    /// Keep a channel message if at least one armed track accepts it
    pub fn capture(&mut self, device: DeviceId, message: MidiMessage, seconds: Seconds) -> bool {
        if !matches!(
            message,
            MidiMessage::NoteOn { .. }
                | MidiMessage::NoteOff { .. }
                | MidiMessage::ControlChange { .. }
                | MidiMessage::ProgramChange { .. }
        ) {
            return false;
        }
        let channel = message.channel();
        if !self.armed.iter().any(|(_, f)| f.accepts(device, channel)) {
            return false;
        }
        if self.captured.len() >= self.limit {
            self.overflowed += 1;
            return false;
        }
        self.captured.push(CapturedEvent {
            seconds: seconds.max(0.0),
            device,
            message,
        });
        true
    }

    /// Close the take at `end_seconds` and convert through `map`
    ///
    /// Notes still held are cut at the end of the take. Tracks that
    /// captured nothing produce no segment.
    pub fn finalize(self, map: &TempoMap, end_seconds: Seconds) -> Vec<RecordedSegment> {
        let end = map.position_at(end_seconds).max(self.start_position);
        let mut segments = Vec::new();

        for (track, filter) in &self.armed {
            let mut events = Vec::new();
            // (device, channel, pitch) -> (start, velocity)
            let mut held: HashMap<(DeviceId, u8, u8), (Position, u8)> = HashMap::new();

            for captured in &self.captured {
                if !filter.accepts(captured.device, captured.message.channel()) {
                    continue;
                }
                let position = map.position_at(captured.seconds);
                match captured.message {
                    MidiMessage::NoteOn {
                        channel,
                        note,
                        velocity,
                    } => {
                        let key = (captured.device, channel, note);
                        // Retrigger closes the previous note
                        if let Some((start, velocity)) = held.insert(key, (position, velocity)) {
                            events.push(TrackEvent::note(start, note, velocity, position - start));
                        }
                    }
                    MidiMessage::NoteOff { channel, note, .. } => {
                        if let Some((start, velocity)) = held.remove(&(captured.device, channel, note)) {
                            events.push(TrackEvent::note(start, note, velocity, position - start));
                        }
                    }
                    MidiMessage::ControlChange {
                        controller, value, ..
                    } => events.push(TrackEvent::controller(position, controller, value)),
                    MidiMessage::ProgramChange { program, .. } => {
                        events.push(TrackEvent::program_change(position, program))
                    }
                    _ => {}
                }
            }

            for ((_, _, note), (start, velocity)) in held {
                events.push(TrackEvent::note(start, note, velocity, end - start));
            }

            if events.is_empty() {
                continue;
            }
            events.sort_by_key(|e| e.position);
            segments.push(RecordedSegment {
                track: *track,
                session: self.id,
                start: self.start_position,
                end,
                events,
            });
        }

        log::info!(
            "Recording session {} finalized: {} segment(s), {} captured events, {} dropped",
            self.id,
            segments.len(),
            self.captured.len(),
            self.overflowed
        );
        segments
    }
}

/// A closed take on its way from the dispatch thread to the GUI side
///
/// Carries the composition snapshot that was live when the take closed,
/// so finalizing later converts through the same tempo map.
#[derive(Debug)]
pub struct FinishedTake {
    pub session: RecordingSession,
    pub composition: Arc<Composition>,
    pub end_seconds: Seconds,
}

impl FinishedTake {
    pub fn id(&self) -> Uuid {
        self.session.id()
    }

    pub fn finalize(self) -> Vec<RecordedSegment> {
        self.session
            .finalize(&self.composition.tempo_map, self.end_seconds)
    }
}
