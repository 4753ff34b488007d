// Integration test: engine configuration files

use seqsync::EngineConfig;
use seqsync::EngineError;
use seqsync::sync::{FrameRate, Role, SyncMode};
use std::fs;

#[test]
fn test_load_partial_ron_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.ron");
    fs::write(
        &path,
        r#"(
    timing: (lookahead_ms: 150, tick_interval_us: 1000),
    sync: (
        settings: (midi_clock_master: true, mtc: Slave),
        frame_rate: Fps30,
        max_correction_rate: 0.02,
    ),
    health: (xrun_threshold: 5),
)"#,
    )
    .unwrap();

    let config = EngineConfig::load(&path).unwrap();
    assert_eq!(config.timing.lookahead_ms, 150);
    assert_eq!(config.timing.tick_interval_us, 1_000);
    assert!(config.sync.settings.midi_clock_master);
    assert_eq!(config.sync.settings.mtc, Role::Slave);
    assert_eq!(config.sync.frame_rate, FrameRate::Fps30);
    assert_eq!(config.health.xrun_threshold, 5);
    // Untouched sections keep their defaults
    assert_eq!(config.metronome, EngineConfig::default().metronome);
    assert_eq!(config.health.watchdog_timeout_ms, 5_000);
}

#[test]
fn test_save_and_reload_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("engine.json");
    let mut config = EngineConfig::default();
    config.sync.settings.apply(SyncMode::MmcSlave);
    config.sync.settings.apply(SyncMode::MtcMaster);
    config.metronome.enabled_while_playing = true;
    config.save(&path).unwrap();

    let loaded = EngineConfig::load(&path).unwrap();
    assert_eq!(loaded.sync.settings, config.sync.settings);
    assert_eq!(loaded.sync.settings.mmc, Role::Slave);
    assert_eq!(loaded.sync.settings.mtc, Role::Master);
    assert!(loaded.metronome.enabled_while_playing);
    assert_eq!(loaded.health, config.health);
    assert_eq!(loaded.capacity, config.capacity);
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.ron");
    fs::write(&path, "(sync: (settings: (mtc: Slave, mmc: Slave)))").unwrap();
    assert!(matches!(
        EngineConfig::load(&path),
        Err(EngineError::InvalidConfig(_))
    ));

    fs::write(&path, "(timing: (lookahead_ms: 1, tick_interval_us: 5000))").unwrap();
    assert!(matches!(
        EngineConfig::load(&path),
        Err(EngineError::InvalidConfig(_))
    ));
}

#[test]
fn test_malformed_and_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.ron");
    fs::write(&path, "(timing: (lookahead_ms: \"soon\"))").unwrap();
    assert!(matches!(EngineConfig::load(&path), Err(EngineError::Parse(_))));

    let missing = dir.path().join("absent.json");
    assert!(matches!(EngineConfig::load(&missing), Err(EngineError::Io { .. })));

    let toml = dir.path().join("engine.toml");
    fs::write(&toml, "").unwrap();
    assert!(matches!(
        EngineConfig::load(&toml),
        Err(EngineError::UnsupportedFormat(_))
    ));
}
