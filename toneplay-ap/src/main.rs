//! Toneplay Audio Player (toneplay-ap) - Main entry point
//!
//! Runs one playback session: create the engine, play a silence lead-in,
//! switch to the tone, then stop and tear down. Ctrl+C skips straight to
//! teardown.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::task::block_in_place;
use tracing::{debug, info, warn};

use toneplay_ap::stream::{AudioPlatform, CpalPlatform, SimConfig, SimulatedPlatform};
use toneplay_ap::{Engine, EngineConfig};
use toneplay_common::config::ConfigPathResolver;

/// Command-line arguments for toneplay-ap
#[derive(Parser, Debug)]
#[command(name = "toneplay-ap")]
#[command(about = "Low-latency stereo tone player")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "TONEPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Use the simulated audio backend instead of a real device
    #[arg(long)]
    simulate: bool,

    /// Seconds of silence before the tone starts
    #[arg(long, default_value_t = 1.0)]
    silence_secs: f64,

    /// Seconds of tone
    #[arg(long, default_value_t = 3.0)]
    tone_secs: f64,

    /// Write the buffer tuning report to this file (JSON)
    #[arg(long)]
    report: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = ConfigPathResolver::new("toneplay").resolve(args.config.as_deref());
    let config = EngineConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    toneplay_common::logging::init(&config.logging.level);

    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    if args.list_devices {
        for name in CpalPlatform::list_devices().context("Failed to enumerate output devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let durations = SessionDurations {
        silence: session_duration("--silence-secs", args.silence_secs)?,
        tone: session_duration("--tone-secs", args.tone_secs)?,
    };

    let platform: Box<dyn AudioPlatform> = if args.simulate {
        Box::new(SimulatedPlatform::new(SimConfig {
            pace_writes: true,
            ..SimConfig::default()
        }))
    } else {
        Box::new(CpalPlatform::new())
    };
    info!("Starting toneplay-ap ({} backend)", platform.name());

    let mut engine = Engine::new(config, platform);
    let result = run_session(&mut engine, &args, durations).await;
    release_engine(engine);
    result
}

/// Lengths of the silence lead-in and the tone
#[derive(Debug, Clone, Copy)]
struct SessionDurations {
    silence: Duration,
    tone: Duration,
}

/// Convert a seconds argument, rejecting negative, non-finite, or huge values
fn session_duration(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .with_context(|| format!("{} must be a non-negative number of seconds, got {}", name, secs))
}

/// Drop the engine outside the async worker; `Drop` may wait for teardown
fn release_engine(engine: Engine) {
    block_in_place(move || drop(engine));
}

/// Drive one create → silence → tone → stop → delete session
async fn run_session(engine: &mut Engine, args: &Args, durations: SessionDurations) -> Result<()> {
    if !block_in_place(|| engine.create_engine()) {
        bail!("Engine could not be created");
    }

    if let Some(path) = &args.report {
        match engine.last_tuning_report() {
            Some(report) => report
                .export_json(path)
                .with_context(|| format!("Failed to write tuning report to {}", path.display()))?,
            None => warn!("No tuning report to export (tuning disabled)"),
        }
    }

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut interrupted = false;
    tokio::select! {
        _ = tokio::time::sleep(durations.silence) => {}
        _ = &mut ctrl_c => {
            info!("Received Ctrl+C, shutting down");
            interrupted = true;
        }
    }

    if !interrupted {
        if engine.start() {
            tokio::select! {
                _ = tokio::time::sleep(durations.tone) => {}
                _ = &mut ctrl_c => info!("Received Ctrl+C, shutting down"),
            }
        } else {
            warn!("Render loop ended before the tone could start");
        }
    }

    engine.stop();
    if let Ok(status) = serde_json::to_string(&engine.status()) {
        debug!("Engine status: {}", status);
    }

    engine.delete_engine();
    let timeout = engine.config().teardown_timeout();
    let summary = block_in_place(|| engine.wait_for_teardown(timeout))
        .context("Playback session ended abnormally")?;

    if let Some(summary) = summary {
        info!(
            "Session complete: {} bursts ({} tone, {} silence), {} frames, {} xruns",
            summary.bursts_written,
            summary.tone_bursts,
            summary.silence_bursts,
            summary.frames_written,
            summary.final_xrun_count
        );
    }
    Ok(())
}
