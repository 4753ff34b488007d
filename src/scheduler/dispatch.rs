// Scheduler - Look-ahead materialization and dispatch
//
// Each tick the window end is recomputed from the song clock (ramps make a
// fixed real-time window cover a varying musical span). Only events that
// start inside [cursor, window_end) are materialized. Releases (note-offs,
// segment ends) are derived from what is actually sounding, so cancelling
// the queue can never leave a note without a way to end it.

use super::clock::SongClock;
use super::event::{EventPayload, EventSource, ScheduledEvent, SegmentBoundary};
use super::queue::EventQueue;
use crate::backend::Backend;
use crate::composition::{Composition, DeviceChannelRoute, EventBody, SegmentId};
use crate::error::BackendError;
use crate::metronome::Metronome;
use crate::midi::message::ALL_NOTES_OFF;
use crate::timeline::{Position, TempoMap};
use std::ops::Range;
use std::time::{Duration, Instant};

/// What a sounding voice is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Voice {
    Note(u8),
    Click(u8),
    Segment(SegmentId),
}

/// Something handed to a backend that still needs a release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundingVoice {
    pub route: DeviceChannelRoute,
    pub voice: Voice,
    pub source: EventSource,
    /// Musical position of the release
    pub end: Position,
    /// Instant the onset was stamped with; a release never goes out before it
    pub onset_at: Instant,
    release_queued: bool,
}

/// Inputs of one scheduler tick
pub struct TickWindow<'a> {
    pub now: Instant,
    pub clock: &'a SongClock,
    pub composition: &'a Composition,
    pub latency: Duration,
    pub lookahead: Duration,
    /// Events due before the next tick are handed off in this one
    pub horizon: Duration,
    /// Materialization never goes past this position (loop end)
    pub limit: Option<Position>,
    pub metronome: Option<&'a Metronome>,
}

/// Read-only snapshot returned by every tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStatus {
    pub cursor: Position,
    pub window_end: Position,
    pub materialized: usize,
    pub dispatched: usize,
    pub pending: usize,
    pub sounding: usize,
    /// Events handed off after their dispatch time had already passed
    pub late: usize,
    pub send_errors: usize,
    pub last_error: Option<BackendError>,
}

pub struct Scheduler {
    queue: EventQueue,
    sounding: Vec<SoundingVoice>,
    cursor: Position,
    window_end: Position,
    fresh_window: bool,
    dispatched_through: Option<Position>,
    next_seq: u64,
    release_routes: Vec<(DeviceChannelRoute, EventSource, Instant)>,
}

impl Scheduler {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: EventQueue::with_capacity(capacity),
            sounding: Vec::with_capacity(256),
            cursor: Position::ZERO,
            window_end: Position::ZERO,
            fresh_window: true,
            dispatched_through: None,
            next_seq: 0,
            release_routes: Vec::with_capacity(32),
        }
    }

    pub fn cursor(&self) -> Position {
        self.cursor
    }

    pub fn window_end(&self) -> Position {
        self.window_end
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_events(&self) -> impl Iterator<Item = &ScheduledEvent> {
        self.queue.iter()
    }

    pub fn sounding(&self) -> &[SoundingVoice] {
        &self.sounding
    }

    pub fn sounding_count(&self) -> usize {
        self.sounding.len()
    }

    /// Furthest position of an onset already handed to the backend
    pub fn dispatched_through(&self) -> Option<Position> {
        self.dispatched_through
    }

    /// Start a fresh window at `position` (play, seek, loop wrap)
    pub fn reset_window(&mut self, position: Position) {
        self.cursor = position;
        self.window_end = position;
        self.fresh_window = true;
        self.dispatched_through = None;
    }

    /// Continue after a pause without replaying what was already dispatched
    pub fn resume_window(&mut self, position: Position) {
        self.cursor = match self.dispatched_through {
            Some(done) if done >= position => done + 1,
            _ => position,
        };
        self.window_end = self.cursor;
        self.fresh_window = true;
    }

    /// Drop every materialized, undispatched event
    ///
    /// Sounding voices are kept; their releases are queued again as their
    /// end enters a later window.
    pub fn cancel_pending(&mut self) -> usize {
        for voice in &mut self.sounding {
            voice.release_queued = false;
        }
        let dropped = self.queue.clear();
        if dropped > 0 {
            log::debug!("Cancelled {} pending events", dropped);
        }
        dropped
    }

    /// Release everything that sounds right now, then All Notes Off on
    /// every channel that had notes. Returns the number of messages sent.
    ///
    /// Onsets already handed over may be stamped ahead of `now` (latency,
    /// dispatch horizon), so each release is stamped no earlier than its
    /// onset and the All Notes Off no earlier than the channel's last one.
    pub fn release_all(
        &mut self,
        now: Instant,
        clock: &SongClock,
        backend: &mut dyn Backend,
    ) -> usize {
        let mut voices = std::mem::take(&mut self.sounding);
        self.release_routes.clear();
        let mut sent = 0;

        for voice in voices.drain(..) {
            let at = voice.onset_at.max(now);
            let event = release_event(&voice, clock.seconds_at(at), self.next_seq);
            self.next_seq += 1;
            if backend.schedule_event(&event, at).is_ok() {
                sent += 1;
            }
            if !matches!(voice.voice, Voice::Note(_) | Voice::Click(_)) {
                continue;
            }
            match self.release_routes.iter_mut().find(|(r, _, _)| *r == voice.route) {
                Some(entry) => entry.2 = entry.2.max(at),
                None => self.release_routes.push((voice.route, voice.source, at)),
            }
        }

        for (route, source, at) in self.release_routes.drain(..) {
            let event = ScheduledEvent {
                dispatch_time: clock.seconds_at(at),
                position: Position::ZERO,
                end: Position::ZERO,
                payload: EventPayload::Controller {
                    controller: ALL_NOTES_OFF,
                    value: 0,
                },
                route,
                source,
                seq: self.next_seq,
            };
            self.next_seq += 1;
            if backend.schedule_event(&event, at).is_ok() {
                sent += 1;
            }
        }

        // Keep the allocation
        self.sounding = voices;
        if sent > 0 {
            log::debug!("Released sounding voices ({} messages)", sent);
        }
        sent
    }

    pub fn tick(&mut self, w: &TickWindow<'_>, backend: &mut dyn Backend) -> SchedulerStatus {
        let map = &w.composition.tempo_map;
        let mut status = SchedulerStatus::default();

        let ahead = w.now.checked_add(w.lookahead).unwrap_or(w.now);
        let mut window_end = map.position_at_or_after(w.clock.seconds_at(ahead));
        if let Some(limit) = w.limit {
            window_end = window_end.min(limit);
        }
        let window_end = window_end.max(self.cursor);

        if self.fresh_window {
            status.materialized += self.start_overlapping_segments(w.composition);
            self.fresh_window = false;
        }
        if window_end > self.cursor {
            status.materialized += self.materialize(w, self.cursor..window_end);
            self.cursor = window_end;
        }
        self.window_end = window_end;
        self.queue_releases(map);

        let now_seconds = w.clock.seconds_at(w.now);
        let due_at = w
            .now
            .checked_add(w.latency + w.horizon)
            .unwrap_or(w.now);
        let due = w.clock.seconds_at(due_at);
        let late_before = now_seconds - w.horizon.as_secs_f64();

        while let Some(event) = self.queue.pop_due(due) {
            let at = w.clock.target_instant(event.dispatch_time, w.latency, w.now);
            if event.dispatch_time < late_before {
                status.late += 1;
            }
            match backend.schedule_event(&event, at) {
                Ok(()) => {
                    status.dispatched += 1;
                    self.on_dispatched(&event, at, map);
                }
                Err(e) => {
                    status.send_errors += 1;
                    // A failed release still ends the voice on our side
                    if !event.is_onset() {
                        self.on_dispatched(&event, at, map);
                    }
                    status.last_error = Some(e);
                }
            }
        }

        if status.late > 0 {
            log::debug!("{} events dispatched late", status.late);
        }

        status.cursor = self.cursor;
        status.window_end = self.window_end;
        status.pending = self.queue.len();
        status.sounding = self.sounding.len();
        status
    }

    fn push(
        &mut self,
        map: &TempoMap,
        position: Position,
        end: Position,
        payload: EventPayload,
        route: DeviceChannelRoute,
        source: EventSource,
    ) {
        self.queue.push(ScheduledEvent {
            dispatch_time: map.time_at(position),
            position,
            end,
            payload,
            route,
            source,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }

    fn materialize(&mut self, w: &TickWindow<'_>, range: Range<Position>) -> usize {
        let map = &w.composition.tempo_map;
        let before = self.queue.len();

        for (index, track) in w.composition.tracks.iter().enumerate() {
            if track.muted {
                continue;
            }
            for event in track.events_in(range.clone()) {
                let payload = match event.body {
                    EventBody::Note {
                        pitch, velocity, ..
                    } => EventPayload::NoteOn { pitch, velocity },
                    EventBody::Controller { controller, value } => {
                        EventPayload::Controller { controller, value }
                    }
                    EventBody::ProgramChange { program } => EventPayload::ProgramChange { program },
                    EventBody::AudioSegment { segment, .. } => EventPayload::AudioSegment {
                        segment,
                        boundary: SegmentBoundary::Start { offset: 0.0 },
                    },
                };
                self.push(
                    map,
                    event.position,
                    event.end(),
                    payload,
                    track.route,
                    EventSource::Track(index),
                );
            }
        }

        if let Some(metronome) = w.metronome {
            let length = metronome.click_length();
            let route = metronome.route();
            metronome.clicks_in(map, range, |click| {
                self.push(
                    map,
                    click.position,
                    click.position + length,
                    EventPayload::MetronomeClick {
                        pitch: click.pitch,
                        velocity: click.velocity,
                        accent: click.accent,
                    },
                    route,
                    EventSource::Metronome,
                );
            });
        }

        self.queue.len() - before
    }

    /// Audio segments already running at the window start play from an offset
    fn start_overlapping_segments(&mut self, composition: &Composition) -> usize {
        let map = &composition.tempo_map;
        let start = self.cursor;
        let start_seconds = map.time_at(start);
        let mut count = 0;

        for (index, track) in composition.tracks.iter().enumerate() {
            if track.muted {
                continue;
            }
            let source = EventSource::Track(index);
            for event in track.audio_segments_spanning(start) {
                let EventBody::AudioSegment { segment, .. } = event.body else {
                    continue;
                };
                let already = self
                    .sounding
                    .iter()
                    .any(|v| v.source == source && v.voice == Voice::Segment(segment));
                if already {
                    continue;
                }
                let offset = (start_seconds - map.time_at(event.position)).max(0.0);
                self.push(
                    map,
                    start,
                    event.end(),
                    EventPayload::AudioSegment {
                        segment,
                        boundary: SegmentBoundary::Start { offset },
                    },
                    track.route,
                    source,
                );
                count += 1;
            }
        }
        count
    }

    fn queue_releases(&mut self, map: &TempoMap) {
        let window_end = self.window_end;
        for voice in self.sounding.iter_mut() {
            if voice.release_queued || voice.end >= window_end {
                continue;
            }
            let event = release_event(voice, map.time_at(voice.end), self.next_seq);
            self.next_seq += 1;
            self.queue.push(event);
            voice.release_queued = true;
        }
    }

    fn on_dispatched(&mut self, event: &ScheduledEvent, at: Instant, map: &TempoMap) {
        let voice = match event.payload {
            EventPayload::NoteOn { pitch, .. } => Some(Voice::Note(pitch)),
            EventPayload::MetronomeClick { pitch, .. } => Some(Voice::Click(pitch)),
            EventPayload::AudioSegment {
                segment,
                boundary: SegmentBoundary::Start { .. },
            } => Some(Voice::Segment(segment)),
            EventPayload::NoteOff { pitch } => {
                self.remove_voice(event, |v| matches!(v, Voice::Note(p) | Voice::Click(p) if p == pitch));
                return;
            }
            EventPayload::AudioSegment {
                segment,
                boundary: SegmentBoundary::End,
            } => {
                self.remove_voice(event, |v| v == Voice::Segment(segment));
                return;
            }
            EventPayload::Controller { .. } | EventPayload::ProgramChange { .. } => None,
        };

        if self.dispatched_through.is_none_or(|d| event.position > d) {
            self.dispatched_through = Some(event.position);
        }

        if let Some(voice) = voice {
            self.sounding.push(SoundingVoice {
                route: event.route,
                voice,
                source: event.source,
                end: event.end,
                onset_at: at,
                release_queued: false,
            });
            // Short notes: release already inside the window
            if event.end < self.window_end {
                self.queue_releases(map);
            }
        }
    }

    fn remove_voice(&mut self, event: &ScheduledEvent, matches: impl Fn(Voice) -> bool) {
        let found = self.sounding.iter().position(|v| {
            v.release_queued && v.route == event.route && v.source == event.source && matches(v.voice)
        });
        if let Some(index) = found {
            self.sounding.swap_remove(index);
        }
    }
}

fn release_event(voice: &SoundingVoice, dispatch_time: f64, seq: u64) -> ScheduledEvent {
    let payload = match voice.voice {
        Voice::Note(pitch) | Voice::Click(pitch) => EventPayload::NoteOff { pitch },
        Voice::Segment(segment) => EventPayload::AudioSegment {
            segment,
            boundary: SegmentBoundary::End,
        },
    };
    ScheduledEvent {
        dispatch_time,
        position: voice.end,
        end: voice.end,
        payload,
        route: voice.route,
        source: voice.source,
        seq,
    }
}
