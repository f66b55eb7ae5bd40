//! Engine lifecycle tests
//!
//! Drive complete sessions against the simulated backend.
//!
//! Tests verify:
//! - create → silence → start → tone → stop → delete → teardown
//! - the stream is closed exactly once and never written after close
//! - sequencing misuse is reported as status, never a panic
//! - tuning and write failures are contained to the session

use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use toneplay_ap::stream::{SimConfig, SimHandle, SimStreams, SimulatedPlatform, StreamCall};
use toneplay_ap::tuning::TuningOutcome;
use toneplay_ap::{Engine, EngineConfig, Error};

const TEARDOWN: Duration = Duration::from_secs(3);

/// Engine on a paced simulated platform
fn sim_engine(config: EngineConfig, sim: SimConfig) -> (Engine, SimStreams) {
    let platform = SimulatedPlatform::new(SimConfig {
        pace_writes: true,
        ..sim
    });
    let streams = platform.streams();
    (Engine::new(config, Box::new(platform)), streams)
}

fn wait_for_writes(handle: &SimHandle, count: usize) {
    let deadline = Instant::now() + TEARDOWN;
    while handle.successful_writes() < count {
        assert!(Instant::now() < deadline, "render loop stalled");
        thread::sleep(Duration::from_millis(2));
    }
}

fn peak(samples: &[i16]) -> i32 {
    samples.iter().map(|&s| (s as i32).abs()).max().unwrap_or(0)
}

#[test]
fn test_full_session() {
    let (mut engine, streams) = sim_engine(EngineConfig::default(), SimConfig::default());

    assert!(engine.create_engine());
    let handle = streams.latest().unwrap();

    // Silence lead-in
    let before_start = handle.successful_writes() + 5;
    wait_for_writes(&handle, before_start);
    assert!(engine.start());

    wait_for_writes(&handle, before_start + 10);
    assert!(engine.stop());
    engine.delete_engine();

    let summary = engine.wait_for_teardown(TEARDOWN).unwrap().unwrap();
    assert!(summary.tone_bursts > 0);
    assert!(summary.silence_bursts >= 5);

    assert_eq!(handle.close_count(), 1);
    assert!(!handle.wrote_after_close());
    assert_eq!(handle.calls().last(), Some(&StreamCall::Close));
    assert!(!engine.state().is_stream_open());

    let captured = handle.captured_writes();
    assert_eq!(peak(&captured[0]), 0, "first write must be silence");

    let full_scale = (0.25 * i16::MAX as f64).round() as i32;
    let loudest = captured.iter().map(|w| peak(w)).max().unwrap();
    assert!(loudest > 0, "tone never reached the stream");
    assert!(loudest <= full_scale + 1);
}

#[test]
fn test_calls_in_lifecycle_order() {
    let (mut engine, streams) = sim_engine(EngineConfig::default(), SimConfig::default());

    assert!(engine.create_engine());
    let handle = streams.latest().unwrap();
    wait_for_writes(&handle, 3);
    engine.delete_engine();
    engine.wait_for_teardown(TEARDOWN).unwrap();

    let calls = handle.calls();
    let start = calls.iter().position(|c| *c == StreamCall::RequestStart).unwrap();
    let stop = calls.iter().position(|c| *c == StreamCall::RequestStop).unwrap();
    let close = calls.iter().position(|c| *c == StreamCall::Close).unwrap();

    assert!(calls[..start].iter().all(|c| !matches!(c, StreamCall::Write(_))));
    assert!(start < stop && stop < close);
    assert_eq!(close, calls.len() - 1);
}

#[test]
fn test_misuse_without_engine() {
    let (mut engine, streams) = sim_engine(EngineConfig::default(), SimConfig::default());

    assert!(!engine.start());
    assert!(engine.stop());
    engine.delete_engine();
    engine.delete_engine();
    assert!(engine.wait_for_teardown(Duration::ZERO).unwrap().is_none());
    assert_eq!(streams.count(), 0);
}

#[test]
fn test_stop_and_delete_are_idempotent() {
    let (mut engine, streams) = sim_engine(EngineConfig::default(), SimConfig::default());

    assert!(engine.create_engine());
    assert!(engine.stop());
    assert!(engine.stop());
    assert!(!engine.state().is_audio_enabled());

    engine.delete_engine();
    engine.delete_engine();
    engine.wait_for_teardown(TEARDOWN).unwrap();

    engine.delete_engine();
    assert!(engine.stop());
    assert!(!engine.start());
    assert_eq!(streams.latest().unwrap().close_count(), 1);
}

#[test]
fn test_recreate_refused_while_teardown_in_flight() {
    let mut config = EngineConfig::default();
    config.tuning.enabled = false;
    // 100ms bursts keep the render thread inside a write when teardown is requested
    let (mut engine, streams) = sim_engine(
        config,
        SimConfig {
            frames_per_burst: 4800,
            ..SimConfig::default()
        },
    );

    assert!(engine.create_engine());
    wait_for_writes(&streams.latest().unwrap(), 1);
    engine.delete_engine();

    assert!(engine.is_teardown_in_flight());
    assert!(!engine.create_engine());
    assert_eq!(streams.count(), 1);

    engine.wait_for_teardown(TEARDOWN).unwrap();
    assert!(!engine.is_teardown_in_flight());
    assert!(engine.create_engine());
    assert_eq!(streams.count(), 2);
}

#[test]
fn test_unsupported_and_open_failure() {
    let (mut engine, _) = sim_engine(
        EngineConfig::default(),
        SimConfig {
            supported: false,
            ..SimConfig::default()
        },
    );
    assert!(!engine.create_engine());
    assert!(!engine.start());

    let (mut engine, _) = sim_engine(
        EngineConfig::default(),
        SimConfig {
            fail_open: true,
            ..SimConfig::default()
        },
    );
    assert!(matches!(engine.try_create_engine(), Err(Error::StreamOpen(_))));
    assert!(!engine.is_render_thread_running());
}

#[test]
fn test_tuning_converges() {
    let (mut engine, streams) = sim_engine(
        EngineConfig::default(),
        SimConfig {
            underrun_free_size: Some(3 * 192),
            ..SimConfig::default()
        },
    );

    assert!(engine.create_engine());
    let report = engine.last_tuning_report().unwrap();
    assert_eq!(report.outcome, TuningOutcome::Converged);
    assert_eq!(report.final_size, 3 * 192);
    assert_eq!(streams.latest().unwrap().buffer_size(), 3 * 192);
}

#[test]
fn test_tuning_failure_is_not_fatal() {
    let (mut engine, streams) = sim_engine(
        EngineConfig::default(),
        SimConfig {
            reject_buffer_size: true,
            ..SimConfig::default()
        },
    );

    assert!(engine.create_engine());
    let report = engine.last_tuning_report().unwrap();
    assert!(!report.succeeded());
    assert_eq!(report.final_size, report.original_size);

    let handle = streams.latest().unwrap();
    wait_for_writes(&handle, 3);
    assert!(engine.start());

    engine.delete_engine();
    assert!(engine.wait_for_teardown(TEARDOWN).unwrap().is_some());
}

#[test]
fn test_write_failure_surfaces_at_teardown() {
    let (mut engine, streams) = sim_engine(
        EngineConfig::default(),
        SimConfig {
            fail_write_after: Some(8),
            ..SimConfig::default()
        },
    );

    assert!(engine.create_engine());
    let result = engine.wait_for_teardown(TEARDOWN);
    assert!(matches!(result, Err(Error::Write(_))));

    let handle = streams.latest().unwrap();
    assert_eq!(handle.close_count(), 1);
    assert!(!engine.state().is_stream_open());
    assert!(!engine.start());

    // A failed session does not block the next one
    assert!(engine.create_engine());
}

#[test]
fn test_mono_session_from_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[audio]
channel_count = 1

[tone]
amplitude = 0.5

[tuning]
enabled = false
"#
    )
    .unwrap();

    let config = EngineConfig::load(Some(file.path())).unwrap();
    let (mut engine, streams) = sim_engine(config, SimConfig::default());

    assert!(engine.create_engine());
    assert_eq!(engine.state().channel_count(), 1);
    assert!(engine.start());

    let handle = streams.latest().unwrap();
    wait_for_writes(&handle, 20);
    engine.delete_engine();
    engine.wait_for_teardown(TEARDOWN).unwrap();

    let captured = handle.captured_writes();
    assert!(captured.iter().all(|w| w.len() == 192));
    let loudest = captured.iter().map(|w| peak(w)).max().unwrap();
    assert!(loudest > (0.25 * i16::MAX as f64) as i32);
    assert!(loudest <= (0.5 * i16::MAX as f64).round() as i32 + 1);
}
