// Integration test: MIDI Clock, MTC and MMC through the transport
//
// Masters are checked on the raw messages the virtual backend received,
// slaves by injecting input and watching the transport react.

use seqsync::backend::{InputEvent, SentRaw};
use seqsync::composition::{DeviceChannelRoute, TrackId};
use seqsync::config::EngineConfig;
use seqsync::messaging::{Notification, NotificationLevel};
use seqsync::midi::{MidiMessage, MmcCommand};
use seqsync::sync::{FrameRate, Role, SyncLockState, SyncMode, Timecode};
use seqsync::timeline::TICKS_PER_QUARTER;
use seqsync::{
    Composition, DeviceId, Position, SharedComposition, TempoMap, Track, TrackEvent, Transport,
    TransportHandle, TransportState, VirtualBackend, VirtualProbe,
};
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(2);

fn composition() -> Composition {
    let mut comp = Composition::new(TempoMap::constant(120.0).unwrap());
    comp.routing.add_device(DeviceId(0), "Virtual Out");
    comp.tracks.push(
        Track::midi(TrackId(1), "Bass", DeviceChannelRoute::new(DeviceId(0), 1)).with_events(
            (0..64).map(|i| TrackEvent::note(Position(i * TICKS_PER_QUARTER), 36, 110, 120)),
        ),
    );
    comp
}

fn transport_with(modes: &[SyncMode]) -> (Transport, TransportHandle, VirtualProbe, Instant) {
    let mut config = EngineConfig::default();
    config.sync.mmc_device_id = 0x10;
    for mode in modes {
        config.sync.settings.apply(*mode);
    }
    let backend = VirtualBackend::new([DeviceId(0)]);
    let probe = backend.probe();
    let t0 = Instant::now();
    let (transport, handle) =
        Transport::new(config, SharedComposition::new(composition()), Box::new(backend), t0)
            .unwrap();
    (transport, handle, probe, t0)
}

fn run(transport: &mut Transport, from: Instant, duration: Duration) -> Instant {
    let mut now = from;
    let end = from + duration;
    while now < end {
        now += TICK;
        transport.on_tick(now);
    }
    now
}

fn input(at: Instant, message: MidiMessage) -> InputEvent {
    InputEvent {
        device: DeviceId(0),
        timestamp: at,
        message,
    }
}

fn mmc(device_id: u8, command: MmcCommand) -> MidiMessage {
    MidiMessage::Mmc { device_id, command }
}

fn count_before(raw: &[SentRaw], limit: Instant, wanted: impl Fn(&MidiMessage) -> bool) -> usize {
    raw.iter()
        .filter(|r| r.at < limit && r.message.as_ref().is_some_and(&wanted))
        .count()
}

#[test]
fn test_clock_master_pulse_rate() {
    let (mut transport, _handle, probe, t0) = transport_with(&[SyncMode::InternalClockMaster]);
    transport.play(t0).unwrap();
    run(&mut transport, t0, Duration::from_millis(1_500));

    let raw = probe.sent_raw();
    assert_eq!(raw[0].message, Some(MidiMessage::Start));
    // 24 pulses per quarter at 120 BPM: pulses 0..=48 fall in the first second
    let pulses = count_before(&raw, t0 + Duration::from_millis(1_010), |m| {
        *m == MidiMessage::TimingClock
    });
    assert_eq!(pulses, 49);

    let instants: Vec<Instant> = raw
        .iter()
        .filter(|r| r.message == Some(MidiMessage::TimingClock))
        .map(|r| r.at)
        .collect();
    for pair in instants.windows(2).skip(1).take(40) {
        let gap = (pair[1] - pair[0]).as_secs_f64();
        assert!((gap - 1.0 / 48.0).abs() < 1e-3, "pulse gap {}", gap);
    }
}

#[test]
fn test_clock_master_seek_and_stop() {
    let (mut transport, _handle, probe, t0) = transport_with(&[SyncMode::InternalClockMaster]);
    transport.play(t0).unwrap();
    let now = run(&mut transport, t0, Duration::from_millis(300));
    probe.clear();

    transport.seek(Position(8 * TICKS_PER_QUARTER), now).unwrap();
    let messages = probe.sent_messages();
    // Running locate: stop, pointer at sixteenth 32, continue
    assert_eq!(
        &messages[..3],
        &[
            MidiMessage::Stop,
            MidiMessage::SongPosition(32),
            MidiMessage::Continue
        ]
    );

    let now = run(&mut transport, now, Duration::from_millis(100));
    transport.stop(now).unwrap();
    assert_eq!(probe.sent_messages().last(), Some(&MidiMessage::Stop));

    // Nothing more once stopped
    probe.clear();
    run(&mut transport, now, Duration::from_millis(200));
    assert!(probe.sent_messages().is_empty());
}

#[test]
fn test_mtc_master_sends_full_frame_then_quarter_frames() {
    let (mut transport, _handle, probe, t0) = transport_with(&[SyncMode::MtcMaster]);
    transport.play(t0).unwrap();
    run(&mut transport, t0, Duration::from_millis(1_500));

    let raw = probe.sent_raw();
    assert_eq!(
        raw[0].message,
        Some(MidiMessage::MtcFullFrame(Timecode::zero(FrameRate::Fps25)))
    );
    // Four quarter frames per frame, 25 frames per second
    let quarter_frames = count_before(&raw, t0 + Duration::from_millis(995), |m| {
        matches!(m, MidiMessage::QuarterFrame { .. })
    });
    assert_eq!(quarter_frames, 100);
}

#[test]
fn test_mmc_slave_follows_commands() {
    let (mut transport, mut handle, probe, t0) = transport_with(&[SyncMode::MmcSlave]);

    probe.inject(input(t0, mmc(0x10, MmcCommand::Play)));
    let now = run(&mut transport, t0, Duration::from_millis(100));
    assert_eq!(transport.state(), TransportState::Playing);

    let target = Timecode::new(0, 0, 4, 0, FrameRate::Fps25);
    probe.inject(input(now, mmc(0x10, MmcCommand::Locate(target))));
    let now = run(&mut transport, now, Duration::from_millis(10));
    assert!((transport.seconds() - 4.0).abs() < 0.02);
    assert_eq!(transport.state(), TransportState::Playing);

    probe.inject(input(now, mmc(0x10, MmcCommand::Pause)));
    let now = run(&mut transport, now, Duration::from_millis(10));
    assert_eq!(transport.state(), TransportState::Paused);

    // Play resumes from pause
    probe.inject(input(now, mmc(0x10, MmcCommand::Play)));
    let now = run(&mut transport, now, Duration::from_millis(10));
    assert_eq!(transport.state(), TransportState::Playing);

    // Addressed to another device
    probe.inject(input(now, mmc(0x11, MmcCommand::Stop)));
    let now = run(&mut transport, now, Duration::from_millis(10));
    assert_eq!(transport.state(), TransportState::Playing);

    // All-call
    probe.inject(input(now, mmc(0x7F, MmcCommand::Stop)));
    run(&mut transport, now, Duration::from_millis(10));
    assert_eq!(transport.state(), TransportState::Stopped);
    assert_eq!(probe.hanging_notes(), 0);

    let notifications = handle.poll_notifications();
    let stops = notifications
        .iter()
        .filter(|n| {
            matches!(
                n,
                Notification::StateChanged {
                    to: TransportState::Stopped,
                    ..
                }
            )
        })
        .count();
    assert_eq!(stops, 1);
}

#[test]
fn test_mtc_slave_chases_running_time_code() {
    let (mut transport, _handle, probe, t0) = transport_with(&[SyncMode::MtcSlave]);
    assert_eq!(transport.sync_lock_state(), SyncLockState::Waiting);

    let tc = Timecode::new(0, 0, 20, 0, FrameRate::Fps25);
    for piece in 0..8u8 {
        let at = t0 + Duration::from_millis(10 * piece as u64);
        probe.inject(input(at, MidiMessage::quarter_frame(&tc, piece)));
    }
    run(&mut transport, t0 + Duration::from_millis(70), Duration::from_millis(2));

    assert_eq!(transport.state(), TransportState::Playing);
    // Seven quarter frames of assembly delay plus the 2 ms since the last piece
    assert!(
        (transport.seconds() - 20.072).abs() < 0.005,
        "chased to {}",
        transport.seconds()
    );
}

#[test]
fn test_mtc_slave_pauses_on_signal_loss() {
    let (mut transport, mut handle, probe, t0) = transport_with(&[SyncMode::MtcSlave]);
    transport.play(t0).unwrap();

    // Time code in step with the transport for one second
    let mut now = t0;
    for frame in 1..=25u64 {
        let at = t0 + Duration::from_millis(40 * frame);
        now = run(&mut transport, now, at.saturating_duration_since(now));
        let tc = Timecode::from_frames(frame, FrameRate::Fps25);
        probe.inject(input(now, MidiMessage::MtcFullFrame(tc)));
    }
    let now = run(&mut transport, now, Duration::from_millis(10));
    assert_eq!(transport.sync_lock_state(), SyncLockState::Locked);

    // Then silence past the 3 s timeout
    run(&mut transport, now, Duration::from_millis(3_200));
    assert_eq!(transport.state(), TransportState::Paused);
    assert_eq!(transport.sync_lock_state(), SyncLockState::Lost);
    assert!(handle.poll_notifications().iter().any(|n| {
        n.message()
            .is_some_and(|m| m.level == NotificationLevel::Warning && m.text.contains("Sync lost"))
    }));
}

#[test]
fn test_only_one_slave_class() {
    let (mut transport, _handle, _probe, t0) = transport_with(&[SyncMode::MtcSlave]);
    transport.set_sync_mode(SyncMode::MmcSlave, t0).unwrap();
    let settings = transport.sync_settings();
    assert_eq!(settings.mmc, Role::Slave);
    assert_eq!(settings.mtc, Role::Off);

    transport.set_sync_mode(SyncMode::MtcMaster, t0).unwrap();
    transport.set_sync_mode(SyncMode::InternalClockMaster, t0).unwrap();
    let settings = transport.sync_settings();
    assert_eq!(settings.mtc, Role::Master);
    assert_eq!(settings.mmc, Role::Slave);
    assert!(settings.midi_clock_master);
}
