use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use seqsync::composition::{DeviceChannelRoute, TrackId};
use seqsync::config::EngineConfig;
use seqsync::midi::{MidiMessage, MmcCommand};
use seqsync::sync::{FrameRate, Timecode};
use seqsync::timeline::{TICKS_PER_QUARTER, TempoChange};
use seqsync::{
    Composition, DeviceId, Position, SharedComposition, TempoMap, Track, TrackEvent, Transport,
    VirtualBackend,
};
use std::time::{Duration, Instant};

/// Map with `changes` tempo changes, every other one a ramp
fn ramped_map(changes: u64) -> TempoMap {
    let mut map = TempoMap::constant(120.0).unwrap();
    for i in 1..=changes {
        let at = Position(i * 8 * TICKS_PER_QUARTER);
        let tempo = 80.0 + (i % 7) as f64 * 20.0;
        let change = if i % 2 == 0 {
            TempoChange::ramp(at, tempo, tempo + 30.0)
        } else {
            TempoChange::constant(at, tempo)
        };
        map.insert_tempo(change).unwrap();
    }
    map
}

/// Tempo map conversions (called for every scheduled event)
fn bench_tempo_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("tempo_map");

    for changes in [1u64, 16, 256] {
        let map = ramped_map(changes);
        let end = Position((changes + 1) * 8 * TICKS_PER_QUARTER);
        let total = map.time_at(end);

        group.bench_with_input(BenchmarkId::new("time_at", changes), &end, |b, &end| {
            b.iter(|| {
                for step in 0..64u64 {
                    black_box(map.time_at(Position(end.ticks() * step / 64)));
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("position_at", changes), &total, |b, &total| {
            b.iter(|| {
                for step in 0..64u32 {
                    black_box(map.position_at(total * step as f64 / 64.0));
                }
            });
        });
    }
    group.finish();
}

/// One dispatch tick over a dense composition
fn bench_transport_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("transport_tick");

    for tracks in [1u32, 8, 32] {
        let mut comp = Composition::new(ramped_map(16));
        comp.routing.add_device(DeviceId(0), "Virtual Out");
        for t in 0..tracks {
            let route = DeviceChannelRoute::new(DeviceId(0), (t % 16) as u8);
            // Sixteenth notes for 128 bars
            let events = (0..2048u64).map(|i| {
                TrackEvent::note(
                    Position(i * TICKS_PER_QUARTER / 4),
                    36 + (i % 48) as u8,
                    100,
                    TICKS_PER_QUARTER / 8,
                )
            });
            comp.tracks.push(
                Track::midi(TrackId(t + 1), format!("Track {}", t), route)
                    .with_events(events),
            );
        }

        let backend = VirtualBackend::new([DeviceId(0)]);
        let probe = backend.probe();
        let t0 = Instant::now();
        let (mut transport, _handle) = Transport::new(
            EngineConfig::default(),
            SharedComposition::new(comp),
            Box::new(backend),
            t0,
        )
        .unwrap();
        transport.play(t0).unwrap();

        let mut now = t0;
        group.bench_with_input(BenchmarkId::from_parameter(tracks), &tracks, |b, _| {
            b.iter(|| {
                now += Duration::from_millis(2);
                transport.on_tick(black_box(now));
                probe.clear();
            });
        });
    }
    group.finish();
}

/// Wire encoding and parsing of channel and sync messages
fn bench_midi_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("midi_codec");
    let tc = Timecode::new(1, 2, 3, 4, FrameRate::Fps25);
    let messages = [
        MidiMessage::NoteOn {
            channel: 3,
            note: 60,
            velocity: 100,
        },
        MidiMessage::TimingClock,
        MidiMessage::song_position(1024),
        MidiMessage::quarter_frame(&tc, 5),
        MidiMessage::MtcFullFrame(tc),
        MidiMessage::Mmc {
            device_id: 0x7F,
            command: MmcCommand::Locate(tc),
        },
    ];

    group.bench_function("encode", |b| {
        b.iter(|| {
            for message in &messages {
                black_box(message.encode());
            }
        });
    });

    let encoded: Vec<_> = messages.iter().map(|m| m.encode()).collect();
    group.bench_function("parse", |b| {
        b.iter(|| {
            for raw in &encoded {
                black_box(MidiMessage::parse(raw.as_slice()));
            }
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_tempo_map,
    bench_transport_tick,
    bench_midi_codec
);
criterion_main!(benches);
