use seqsync::composition::{DeviceChannelRoute, TrackId};
use seqsync::messaging::{Notification, NotificationLevel};
use seqsync::timeline::TICKS_PER_QUARTER;
use seqsync::{
    Composition, DeviceId, DriverKind, Engine, EngineConfig, LoopRange, Position,
    SharedComposition, TempoMap, Track, TrackEvent, VirtualBackend,
};
use std::time::{Duration, Instant};

/// How long the headless demo plays
const RUN_TIME: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Two bars of quarter notes on a virtual device
fn demo_composition(tempo: f64) -> Result<Composition, seqsync::EngineError> {
    let mut composition = Composition::new(TempoMap::constant(tempo)?);
    let device = DeviceId(0);
    composition.routing.add_device(device, "Virtual Out");

    let pitches = [60u8, 64, 67, 72, 67, 64, 60, 55];
    let events = pitches.iter().enumerate().map(|(i, &pitch)| {
        TrackEvent::note(
            Position(i as u64 * TICKS_PER_QUARTER),
            pitch,
            100,
            TICKS_PER_QUARTER / 2,
        )
    });
    composition.tracks.push(
        Track::midi(TrackId(1), "Arpeggio", DeviceChannelRoute::new(device, 0)).with_events(events),
    );
    Ok(composition)
}

fn log_notification(notification: &Notification) {
    match notification {
        Notification::StateChanged { from, to } => log::info!("Transport: {} -> {}", from, to),
        Notification::LoopChanged(range) => log::info!("Loop: {}..{}", range.start, range.end),
        Notification::SyncLock(state) => log::info!("Sync: {:?}", state),
        Notification::Health(diagnostic) => log::warn!("Health: {}", diagnostic),
        Notification::RecordingFinished { session, segments } => {
            log::info!("Recording {} finished: {} segment(s)", session, segments.len())
        }
        Notification::Message(message) => match message.level {
            NotificationLevel::Error => log::error!("{}", message.text),
            NotificationLevel::Warning => log::warn!("{}", message.text),
            NotificationLevel::Info => log::info!("{}", message.text),
        },
        Notification::Position(report) => {
            log::trace!("{} ({:.3}s, {:.1} BPM)", report.musical, report.seconds, report.tempo)
        }
        other => log::debug!("{:?}", other),
    }
}

fn run() -> Result<(), seqsync::EngineError> {
    let config = EngineConfig::load_or_default().unwrap_or_else(|e| {
        log::warn!("Config not loaded ({}), using defaults", e);
        EngineConfig::default()
    });
    let composition = SharedComposition::new(demo_composition(config.timing.default_tempo)?);
    let backend = Box::new(VirtualBackend::new([DeviceId(0)]));
    let probe = backend.probe();

    let (mut engine, mut handle) =
        Engine::start(config, composition, backend, DriverKind::Timer)?;

    handle.set_loop(LoopRange::new(Position::ZERO, Position(8 * TICKS_PER_QUARTER)))?;
    handle.set_metronome(true)?;
    handle.play()?;

    let started = Instant::now();
    while started.elapsed() < RUN_TIME {
        for notification in handle.poll_notifications() {
            log_notification(&notification);
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    handle.stop()?;
    std::thread::sleep(POLL_INTERVAL * 2);
    engine.shutdown()?;
    for notification in handle.poll_notifications() {
        log_notification(&notification);
    }

    log::info!(
        "Sent {} events, {} notes left sounding",
        probe.sent_events().len(),
        probe.hanging_notes()
    );
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    println!("=== seqsync ===");
    println!("Version {} - headless demo\n", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
