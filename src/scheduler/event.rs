// Scheduled events - what the scheduler hands to a backend

use crate::composition::{DeviceChannelRoute, SegmentId};
use crate::midi::MidiMessage;
use crate::timeline::{Position, Seconds};
use std::cmp::Ordering;

/// Where an event came from; tracks sort before the metronome
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventSource {
    Track(usize),
    Metronome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickAccent {
    Bar,
    Beat,
    SubBeat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentBoundary {
    /// Start playing, `offset` seconds into the segment
    Start { offset: Seconds },
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NoteOn,
    NoteOff,
    Controller,
    ProgramChange,
    AudioSegmentBoundary,
    MetronomeClick,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventPayload {
    NoteOn { pitch: u8, velocity: u8 },
    NoteOff { pitch: u8 },
    Controller { controller: u8, value: u8 },
    ProgramChange { program: u8 },
    AudioSegment {
        segment: SegmentId,
        boundary: SegmentBoundary,
    },
    MetronomeClick {
        pitch: u8,
        velocity: u8,
        accent: ClickAccent,
    },
}

/// A materialized event waiting for (or handed to) a backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledEvent {
    /// Song seconds at which the event must sound
    pub dispatch_time: Seconds,
    pub position: Position,
    /// Where a sounding event (note, click, segment) gets released
    pub end: Position,
    pub payload: EventPayload,
    pub route: DeviceChannelRoute,
    pub source: EventSource,
    /// Materialization order, last tie-breaker
    pub seq: u64,
}

impl ScheduledEvent {
    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::NoteOn { .. } => EventKind::NoteOn,
            EventPayload::NoteOff { .. } => EventKind::NoteOff,
            EventPayload::Controller { .. } => EventKind::Controller,
            EventPayload::ProgramChange { .. } => EventKind::ProgramChange,
            EventPayload::AudioSegment { .. } => EventKind::AudioSegmentBoundary,
            EventPayload::MetronomeClick { .. } => EventKind::MetronomeClick,
        }
    }

    /// Order among events due at the same instant: releases first, onsets last
    pub fn rank(&self) -> u8 {
        match self.payload {
            EventPayload::NoteOff { .. } => 0,
            EventPayload::AudioSegment {
                boundary: SegmentBoundary::End,
                ..
            } => 1,
            EventPayload::Controller { .. } => 2,
            EventPayload::ProgramChange { .. } => 3,
            EventPayload::AudioSegment {
                boundary: SegmentBoundary::Start { .. },
                ..
            } => 4,
            EventPayload::NoteOn { .. } | EventPayload::MetronomeClick { .. } => 5,
        }
    }

    /// Events that start something sounding
    pub fn is_onset(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::NoteOn { .. }
                | EventPayload::MetronomeClick { .. }
                | EventPayload::AudioSegment {
                    boundary: SegmentBoundary::Start { .. },
                    ..
                }
        )
    }

    /// MIDI rendering; audio segment boundaries have none
    pub fn to_midi(&self) -> Option<MidiMessage> {
        let channel = self.route.channel & 0x0F;
        match self.payload {
            EventPayload::NoteOn { pitch, velocity }
            | EventPayload::MetronomeClick {
                pitch, velocity, ..
            } => Some(MidiMessage::NoteOn {
                channel,
                note: pitch,
                velocity,
            }),
            EventPayload::NoteOff { pitch } => Some(MidiMessage::NoteOff {
                channel,
                note: pitch,
                velocity: 0,
            }),
            EventPayload::Controller { controller, value } => Some(MidiMessage::ControlChange {
                channel,
                controller,
                value,
            }),
            EventPayload::ProgramChange { program } => {
                Some(MidiMessage::ProgramChange { channel, program })
            }
            EventPayload::AudioSegment { .. } => None,
        }
    }

    /// Total dispatch order
    pub fn dispatch_cmp(&self, other: &Self) -> Ordering {
        self.dispatch_time
            .total_cmp(&other.dispatch_time)
            .then_with(|| self.rank().cmp(&other.rank()))
            .then_with(|| self.source.cmp(&other.source))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}
