// Integration test: end-to-end transport scenarios on the virtual backend
//
// Drives `Transport::on_tick` with synthetic instants 2 ms apart, so every
// run is deterministic and independent of the machine's timer.

use seqsync::backend::InputEvent;
use seqsync::composition::{DeviceChannelRoute, SourceFilter, TrackId};
use seqsync::config::EngineConfig;
use seqsync::messaging::Notification;
use seqsync::midi::MidiMessage;
use seqsync::scheduler::{EventKind, EventSource};
use seqsync::sync::{FrameRate, SyncLockState, SyncMode, Timecode};
use seqsync::timeline::{TICKS_PER_QUARTER, TempoChange};
use seqsync::{
    Composition, DeviceId, LoopRange, Position, SharedComposition, TempoMap, Track, TrackEvent,
    Transport, TransportHandle, TransportState, VirtualBackend, VirtualProbe,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(2);
const KEYS: TrackId = TrackId(1);

fn q(quarters: u64) -> Position {
    Position(quarters * TICKS_PER_QUARTER)
}

/// One eighth-long note per beat at 120 BPM, `count` beats long
fn composition(count: u64) -> Composition {
    composition_with(count, TICKS_PER_QUARTER / 2)
}

fn composition_with(count: u64, note_length: u64) -> Composition {
    let mut comp = Composition::new(TempoMap::constant(120.0).unwrap());
    comp.routing.add_device(DeviceId(0), "Virtual Out");
    comp.tracks.push(
        Track::midi(KEYS, "Keys", DeviceChannelRoute::new(DeviceId(0), 0)).with_events(
            (0..count).map(|i| TrackEvent::note(q(i), 60 + (i % 12) as u8, 100, note_length)),
        ),
    );
    comp
}

fn transport(
    config: EngineConfig,
    comp: Composition,
) -> (Transport, TransportHandle, VirtualProbe, Instant) {
    let backend = VirtualBackend::new([DeviceId(0)]);
    let probe = backend.probe();
    let t0 = Instant::now();
    let (transport, handle) =
        Transport::new(config, SharedComposition::new(comp), Box::new(backend), t0).unwrap();
    (transport, handle, probe, t0)
}

/// Tick for `duration`, calling `each` after every tick
fn run(
    transport: &mut Transport,
    from: Instant,
    duration: Duration,
    mut each: impl FnMut(&mut Transport, Instant),
) -> Instant {
    let mut now = from;
    let end = from + duration;
    while now < end {
        now += TICK;
        transport.on_tick(now);
        each(transport, now);
    }
    now
}

/// NoteOn count per (source, position)
fn note_ons(probe: &VirtualProbe) -> HashMap<(EventSource, Position), usize> {
    let mut counts = HashMap::new();
    for sent in probe.sent_events() {
        if sent.event.kind() == EventKind::NoteOn {
            *counts.entry((sent.event.source, sent.event.position)).or_insert(0) += 1;
        }
    }
    counts
}

#[test]
fn test_loop_wraps_once_per_pass() {
    let (mut transport, _handle, probe, t0) = transport(EngineConfig::default(), composition(16));
    transport.set_loop(LoopRange::new(Position::ZERO, q(4))).unwrap();
    transport.play(t0).unwrap();

    // Loop is 2 s long; 5 s covers two full passes and the start of a third
    run(&mut transport, t0, Duration::from_secs(5), |t, _| {
        assert!(t.seconds() < 2.0, "clock at {} s, past the loop end", t.seconds());
    });

    let counts = note_ons(&probe);
    let track = EventSource::Track(0);
    assert_eq!(counts.get(&(track, q(0))), Some(&3));
    assert_eq!(counts.get(&(track, q(3))), Some(&2));
    assert!(
        counts.keys().all(|(_, position)| *position < q(4)),
        "notes after the loop end were dispatched"
    );

    transport.stop(t0 + Duration::from_secs(5)).unwrap();
    assert_eq!(probe.hanging_notes(), 0);
}

#[test]
fn test_loop_behind_playhead_or_after_seek_past_end() {
    let (mut transport, _handle, probe, t0) = transport(EngineConfig::default(), composition(16));
    transport.play(t0).unwrap();
    let now = run(&mut transport, t0, Duration::from_millis(200), |_, _| {});

    // Loop enabled while the playhead is already beyond its end
    transport.seek(q(6), now).unwrap();
    transport.set_loop(LoopRange::new(Position::ZERO, q(4))).unwrap();
    let now = run(&mut transport, now, Duration::from_secs(3), |t, _| {
        assert!(t.seconds() < 2.0, "clock at {} s, past the loop end", t.seconds());
    });
    assert!(transport.position() < q(4));

    // Seeking past the end of an active loop comes straight back
    probe.clear();
    transport.seek(q(10), now).unwrap();
    run(&mut transport, now, Duration::from_secs(1), |t, _| {
        assert!(t.seconds() < 2.0, "clock at {} s, past the loop end", t.seconds());
    });
    assert!(probe.sent_events().iter().all(|s| s.event.position < q(4)));
    assert_eq!(transport.state(), TransportState::Playing);
}

#[test]
fn test_pause_resume_plays_every_note_once() {
    let (mut transport, mut handle, probe, t0) = transport(EngineConfig::default(), composition(8));
    handle.play().unwrap();
    let now = run(&mut transport, t0, Duration::from_millis(1_130), |_, _| {});
    assert_eq!(transport.state(), TransportState::Playing);

    handle.pause().unwrap();
    let now = run(&mut transport, now, Duration::from_millis(700), |_, _| {});
    assert_eq!(transport.state(), TransportState::Paused);
    let paused_at = transport.position();
    assert!(paused_at > q(2));

    handle.resume().unwrap();
    let now = run(&mut transport, now, Duration::from_secs(4), |_, _| {});
    transport.stop(now).unwrap();

    let counts = note_ons(&probe);
    assert_eq!(counts.len(), 8);
    assert!(counts.values().all(|&n| n == 1), "duplicate notes: {:?}", counts);
    assert_eq!(probe.hanging_notes(), 0);
}

#[test]
fn test_seek_leaves_nothing_earlier_pending() {
    let (mut transport, _handle, probe, t0) = transport(EngineConfig::default(), composition(32));
    transport.play(t0).unwrap();
    let now = run(&mut transport, t0, Duration::from_millis(600), |_, _| {});

    transport.seek(q(16), now).unwrap();
    assert_eq!(transport.sounding_count(), 0);
    assert_eq!(probe.hanging_notes(), 0);
    assert!(
        transport
            .scheduler()
            .pending_events()
            .all(|e| e.position >= q(16))
    );

    probe.clear();
    run(&mut transport, now, Duration::from_millis(600), |t, _| {
        assert!(t.scheduler().pending_events().all(|e| e.position >= q(16)));
    });
    let sent = probe.sent_events();
    assert!(!sent.is_empty());
    assert!(sent.iter().all(|s| s.event.position >= q(16)));
}

#[test]
fn test_stop_leaves_nothing_sounding() {
    let comp = composition_with(8, 2 * TICKS_PER_QUARTER);
    let (mut transport, mut handle, probe, t0) = transport(EngineConfig::default(), comp);
    transport.play(t0).unwrap();
    // Stop mid-note: the note at 1.0 s is held until 2.0 s
    let now = run(&mut transport, t0, Duration::from_millis(1_100), |_, _| {});
    assert!(transport.sounding_count() > 0);

    transport.stop(now).unwrap();
    assert_eq!(transport.sounding_count(), 0);
    assert_eq!(transport.scheduler().pending_count(), 0);
    assert_eq!(probe.hanging_notes(), 0);
    assert_eq!(handle.state(), TransportState::Stopped);
    assert!(handle.poll_notifications().iter().any(|n| matches!(
        n,
        Notification::StateChanged {
            to: TransportState::Stopped,
            ..
        }
    )));
}

#[test]
fn test_stop_just_before_handed_over_onset() {
    // Onsets are handed over ahead of time (latency plus one tick), so the
    // note at 0.5 s is already with the backend when stop arrives
    let backend = VirtualBackend::new([DeviceId(0)]).with_latency(Duration::from_millis(20));
    let probe = backend.probe();
    let t0 = Instant::now();
    let (mut transport, _handle) = Transport::new(
        EngineConfig::default(),
        SharedComposition::new(composition(8)),
        Box::new(backend),
        t0,
    )
    .unwrap();
    transport.play(t0).unwrap();
    let now = run(&mut transport, t0, Duration::from_millis(490), |_, _| {});
    assert!(
        probe
            .sent_events()
            .iter()
            .any(|s| s.event.kind() == EventKind::NoteOn && s.event.position == q(1)),
        "the onset at q1 should already be handed over"
    );

    transport.stop(now + Duration::from_millis(1)).unwrap();
    assert_eq!(transport.sounding_count(), 0);
    assert_eq!(probe.hanging_notes(), 0);
}

#[test]
fn test_mtc_jump_converges_at_bounded_rate() {
    let mut config = EngineConfig::default();
    config.sync.settings.apply(SyncMode::MtcSlave);
    config.sync.max_correction_rate = 0.5;
    let rate = config.sync.max_correction_rate;
    let (mut transport, _handle, probe, t0) = transport(config, composition(96));
    transport.play(t0).unwrap();

    // Master time code: one full frame every 40 ms (one frame at 25 fps).
    // The master jumps 10 s ahead after 2 s.
    let frame = Duration::from_millis(40);
    let jump_frames = 10 * 25;
    let mut frames_sent = 1u64;
    let mut next_frame = t0 + frame;
    let mut previous = transport.seconds();
    let mut master_seconds = 0.0;

    run(&mut transport, t0, Duration::from_secs(26), |t, now| {
        let seconds = t.seconds();
        let step = seconds - previous;
        // Never backwards, never faster than nominal plus the correction bound
        assert!(step >= 0.0, "clock ran backwards");
        assert!(
            step <= TICK.as_secs_f64() * (1.0 + rate) + 1e-9,
            "step {} exceeds the correction bound",
            step
        );
        previous = seconds;

        if now >= next_frame {
            let elapsed = frames_sent;
            let master = if now >= t0 + Duration::from_secs(2) {
                elapsed + jump_frames
            } else {
                elapsed
            };
            let tc = Timecode::from_frames(master, FrameRate::Fps25);
            master_seconds = tc.to_seconds();
            probe.inject(InputEvent {
                device: DeviceId(0),
                timestamp: now,
                message: MidiMessage::MtcFullFrame(tc),
            });
            frames_sent += 1;
            next_frame += frame;
        }
    });

    assert_eq!(transport.state(), TransportState::Playing);
    assert_eq!(transport.sync_lock_state(), SyncLockState::Locked);
    // The last frame was injected at most one frame before the end
    let error = (transport.seconds() - master_seconds).abs();
    assert!(error < 0.05, "still {} s away from the master", error);

    let counts = note_ons(&probe);
    assert!(counts.values().all(|&n| n == 1), "duplicate notes: {:?}", counts);
}

#[test]
fn test_recording_stores_positions_from_tempo_map() {
    let mut comp = composition(0);
    let mut map = TempoMap::constant(120.0).unwrap();
    map.insert_tempo(TempoChange::constant(q(2), 90.0)).unwrap();
    comp.tempo_map = map.clone();
    comp.armed.insert(KEYS);
    comp.source_filters.insert(KEYS, SourceFilter::any());
    let (mut transport, mut handle, probe, t0) = transport(EngineConfig::default(), comp);

    transport.record(t0).unwrap();
    assert_eq!(transport.state(), TransportState::Recording);

    let t1 = t0 + Duration::from_millis(750);
    let t2 = t0 + Duration::from_millis(1_500);
    let now = run(&mut transport, t0, Duration::from_millis(760), |_, _| {});
    probe.inject(InputEvent {
        device: DeviceId(0),
        timestamp: t1,
        message: MidiMessage::NoteOn {
            channel: 0,
            note: 64,
            velocity: 90,
        },
    });
    let now = run(&mut transport, now, Duration::from_millis(760), |_, _| {});
    probe.inject(InputEvent {
        device: DeviceId(0),
        timestamp: t2,
        message: MidiMessage::NoteOff {
            channel: 0,
            note: 64,
            velocity: 0,
        },
    });
    let now = run(&mut transport, now, Duration::from_millis(200), |_, _| {});
    transport.stop(now).unwrap();

    // The take is finalized on the handle side
    let notifications = handle.poll_notifications();
    assert!(notifications.iter().any(|n| matches!(
        n,
        Notification::RecordingFinished { segments, .. } if segments.len() == 1
    )));
    let segments = handle.recorded_segments();
    assert_eq!(segments.len(), 1);
    let segment = &segments[0];
    assert_eq!(segment.track, KEYS);
    assert_eq!(segment.start, Position::ZERO);
    assert_eq!(segment.events.len(), 1);

    let p1 = map.position_at(0.75);
    let p2 = map.position_at(1.5);
    // 1.5 s is past the tempo change at 1.0 s
    assert_eq!(p2, q(2) + TICKS_PER_QUARTER * 3 / 4);
    let event = segment.events[0];
    assert_eq!(event.position, p1);
    assert_eq!(event.end(), p2);
}
