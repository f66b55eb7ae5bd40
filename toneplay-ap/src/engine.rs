//! Engine controller
//!
//! **Purpose:** Owns one playback session: opens and starts the stream, tunes
//! it, hands it to a dedicated render thread, and toggles tone/silence.
//!
//! **Lifecycle:**
//! - [`Engine::create_engine`]: open + start + tune + spawn render thread
//! - [`Engine::start`] / [`Engine::stop`]: switch between tone and silence
//! - [`Engine::delete_engine`]: ask the render thread to stop (non-blocking)
//! - [`Engine::wait_for_teardown`]: bounded join of the render thread
//!
//! The render thread owns the stream once spawned and is the only place it is
//! closed. A new session cannot be created until the previous render thread
//! has exited.

use crate::audio::StreamInfo;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::playback::state::EngineStateSnapshot;
use crate::playback::{EngineState, RenderLoop, RenderSummary};
use crate::stream::{log_stream_info, AudioPlatform, PlaybackStream};
use crate::tuning::{BufferTuner, TuningReport};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::Serialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Render thread handle plus its completion signal
struct RenderTask {
    handle: JoinHandle<Result<RenderSummary>>,
    done: Receiver<()>,
}

impl RenderTask {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Engine status for logs and JSON dumps
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub platform: String,
    pub state: EngineStateSnapshot,
    pub render_thread_running: bool,
    /// Stream configuration once started (after tuning, if enabled)
    pub stream: Option<StreamInfo>,
    pub last_tuning: Option<TuningReport>,
}

/// Single-session tone playback engine
pub struct Engine {
    config: EngineConfig,
    platform: Box<dyn AudioPlatform>,
    state: Arc<EngineState>,
    render_task: Option<RenderTask>,
    stream_info: Option<StreamInfo>,
    last_tuning: Option<TuningReport>,
}

impl Engine {
    pub fn new(config: EngineConfig, platform: Box<dyn AudioPlatform>) -> Self {
        Self {
            config,
            platform,
            state: Arc::new(EngineState::new()),
            render_task: None,
            stream_info: None,
            last_tuning: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared state (read-only use; the engine owns all transitions)
    pub fn state(&self) -> Arc<EngineState> {
        Arc::clone(&self.state)
    }

    /// Create a session, reporting failures as a plain status
    ///
    /// Returns false if the platform is unsupported, the stream cannot be
    /// opened or started, or the previous session is still tearing down.
    pub fn create_engine(&mut self) -> bool {
        match self.try_create_engine() {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to create engine: {}", e);
                false
            }
        }
    }

    /// Create a session
    ///
    /// Opens a stream with the fixed engine format, starts it, tunes its
    /// buffer size for low latency (failure is logged and ignored), and spawns
    /// the render thread. Playback begins with silence until [`start`](Self::start).
    pub fn try_create_engine(&mut self) -> Result<()> {
        if self.is_render_thread_running() {
            let reason = if self.state.is_stop_requested() || !self.state.is_stream_open() {
                "previous session is still tearing down"
            } else {
                "engine is already running"
            };
            return Err(Error::InvalidState(reason.to_string()));
        }
        self.reap_render_task();

        self.state.reset();
        self.stream_info = None;
        self.last_tuning = None;

        if !self.platform.is_supported() {
            return Err(Error::Unsupported(format!(
                "{} backend has no usable output device",
                self.platform.name()
            )));
        }

        let request = self.config.stream_request();
        self.state.set_channel_count(request.channel_count);
        self.state.set_bits_per_sample(request.format.bits_per_sample());

        let mut stream = self.platform.open_stream(&request).map_err(|e| match e {
            Error::StreamOpen(_) => e,
            other => Error::StreamOpen(other.to_string()),
        })?;

        log_stream_info(stream.as_ref());
        self.state.set_sample_rate(stream.sample_rate());

        if let Err(e) = stream.request_start() {
            if let Err(close_err) = stream.close() {
                warn!("Failed to close stream after start failure: {}", close_err);
            }
            return Err(e);
        }
        self.state.set_stream_open(true);

        if self.config.tuning.enabled {
            self.tune(stream.as_mut());
            // Log again to show the tuned buffer size
            self.stream_info = Some(log_stream_info(stream.as_ref()));
        } else {
            debug!("Buffer tuning disabled");
            self.stream_info = Some(stream.info());
        }

        self.spawn_render_thread(stream)
    }

    fn tune(&mut self, stream: &mut dyn PlaybackStream) {
        let report = BufferTuner::new(self.config.tuning_write_timeout()).run(stream);
        if report.succeeded() {
            info!("Buffer tuning: {}", report.summary());
        } else {
            warn!("Buffer tuning failed, continuing: {}", report.summary());
        }
        self.last_tuning = Some(report);
    }

    fn spawn_render_thread(&mut self, stream: Box<dyn PlaybackStream>) -> Result<()> {
        let render = RenderLoop::new(
            stream,
            Arc::clone(&self.state),
            self.config.tone,
            self.config.render_write_timeout(),
        );
        let (done_tx, done_rx) = bounded(1);

        let spawned = thread::Builder::new()
            .name("toneplay-render".to_string())
            .spawn(move || {
                let result = render.run();
                let _ = done_tx.send(());
                result
            });

        match spawned {
            Ok(handle) => {
                self.render_task = Some(RenderTask {
                    handle,
                    done: done_rx,
                });
                info!("Engine created");
                Ok(())
            }
            Err(e) => {
                // The closure (and with it the stream) was dropped by the failed spawn
                self.state.set_stream_open(false);
                Err(Error::Internal(format!("failed to spawn render thread: {}", e)))
            }
        }
    }

    /// Switch the render loop to the tone
    ///
    /// Returns false if no stream is open.
    pub fn start(&self) -> bool {
        if !self.state.is_stream_open() {
            warn!("start() called without an open stream");
            return false;
        }
        self.state.set_audio_enabled(true);
        info!("Tone started");
        true
    }

    /// Switch the render loop to silence; always succeeds
    pub fn stop(&self) -> bool {
        if self.state.is_stream_open() {
            self.state.set_audio_enabled(false);
            info!("Tone stopped");
        }
        true
    }

    /// Ask the render thread to stop and close the stream
    ///
    /// Returns immediately. Use [`wait_for_teardown`](Self::wait_for_teardown)
    /// to wait for the stream to be closed.
    pub fn delete_engine(&self) {
        if self.state.request_stop_if_open() {
            info!("Engine teardown requested");
        } else {
            debug!("delete_engine() without an open stream, nothing to do");
        }
    }

    /// Wait up to `timeout` for the render thread to exit
    ///
    /// Returns `Ok(None)` if there is no render thread, the render summary if
    /// it exited cleanly, and the render error if a write failed. On timeout
    /// the thread is kept and `Error::InvalidState` is returned.
    pub fn wait_for_teardown(&mut self, timeout: Duration) -> Result<Option<RenderSummary>> {
        let Some(task) = self.render_task.take() else {
            return Ok(None);
        };

        match task.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                self.render_task = Some(task);
                return Err(Error::InvalidState(format!(
                    "render thread still running after {:?}",
                    timeout
                )));
            }
        }

        match task.handle.join() {
            Ok(result) => result.map(Some),
            Err(_) => {
                self.state.set_stream_open(false);
                Err(Error::Internal("render thread panicked".to_string()))
            }
        }
    }

    /// Whether a render thread exists and has not exited yet
    pub fn is_render_thread_running(&self) -> bool {
        self.render_task.as_ref().is_some_and(RenderTask::is_running)
    }

    /// Whether teardown was requested but the render thread has not exited
    pub fn is_teardown_in_flight(&self) -> bool {
        self.is_render_thread_running()
            && (self.state.is_stop_requested() || !self.state.is_stream_open())
    }

    pub fn last_tuning_report(&self) -> Option<&TuningReport> {
        self.last_tuning.as_ref()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            platform: self.platform.name().to_string(),
            state: self.state.snapshot(),
            render_thread_running: self.is_render_thread_running(),
            stream: self.stream_info.clone(),
            last_tuning: self.last_tuning.clone(),
        }
    }

    /// Join a render thread that already exited and log how it ended
    fn reap_render_task(&mut self) {
        let Some(task) = self.render_task.take() else {
            return;
        };
        match task.handle.join() {
            Ok(Ok(summary)) => debug!("Previous session ended: {:?}", summary),
            Ok(Err(e)) => warn!("Previous session ended with error: {}", e),
            Err(_) => error!("Previous render thread panicked"),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.render_task.is_none() {
            return;
        }
        self.delete_engine();
        let timeout = self.config.teardown_timeout();
        match self.wait_for_teardown(timeout) {
            Ok(_) => debug!("Engine dropped, render thread joined"),
            Err(e) => warn!("Engine dropped before teardown completed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{SimConfig, SimulatedPlatform};
    use std::time::Instant;

    const TEARDOWN: Duration = Duration::from_secs(2);

    fn engine(sim: SimConfig) -> (Engine, crate::stream::SimStreams) {
        let platform = SimulatedPlatform::new(SimConfig {
            pace_writes: true,
            ..sim
        });
        let streams = platform.streams();
        (Engine::new(EngineConfig::default(), Box::new(platform)), streams)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + TEARDOWN;
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_create_sets_state_from_stream() {
        let (mut engine, _streams) = engine(SimConfig {
            sample_rate: 44100,
            ..SimConfig::default()
        });

        assert!(engine.create_engine());
        let snapshot = engine.state().snapshot();
        assert_eq!(snapshot.sample_rate, 44100);
        assert_eq!(snapshot.channel_count, 2);
        assert_eq!(snapshot.bits_per_sample, 16);
        assert!(snapshot.stream_open);
        assert!(!snapshot.audio_enabled);

        engine.delete_engine();
        engine.wait_for_teardown(TEARDOWN).unwrap();
    }

    #[test]
    fn test_start_requires_open_stream() {
        let (engine, _streams) = engine(SimConfig::default());
        assert!(!engine.start());
        assert!(engine.stop());
    }

    #[test]
    fn test_unsupported_platform() {
        let (mut engine, streams) = engine(SimConfig {
            supported: false,
            ..SimConfig::default()
        });
        assert!(matches!(engine.try_create_engine(), Err(Error::Unsupported(_))));
        assert_eq!(streams.count(), 0);
        assert!(!engine.state().is_stream_open());
    }

    #[test]
    fn test_open_failure_returns_false() {
        let (mut engine, _streams) = engine(SimConfig {
            fail_open: true,
            ..SimConfig::default()
        });
        assert!(!engine.create_engine());
        assert!(!engine.state().is_stream_open());
        assert!(!engine.is_render_thread_running());
    }

    #[test]
    fn test_start_failure_closes_stream() {
        let (mut engine, streams) = engine(SimConfig {
            fail_start: true,
            ..SimConfig::default()
        });
        assert!(!engine.create_engine());
        let handle = streams.latest().unwrap();
        assert_eq!(handle.close_count(), 1);
        assert!(!engine.state().is_stream_open());
    }

    #[test]
    fn test_second_create_refused_while_running() {
        let (mut engine, streams) = engine(SimConfig::default());
        assert!(engine.create_engine());
        assert!(!engine.create_engine());
        assert_eq!(streams.count(), 1);

        engine.delete_engine();
        engine.wait_for_teardown(TEARDOWN).unwrap();
        assert!(engine.create_engine());
        assert_eq!(streams.count(), 2);
    }

    #[test]
    fn test_tuning_report_recorded() {
        let (mut engine, _streams) = engine(SimConfig::default());
        assert!(engine.last_tuning_report().is_none());
        assert!(engine.create_engine());

        let report = engine.last_tuning_report().unwrap();
        assert!(report.succeeded());
        assert_ne!(report.final_size, report.original_size);

        let status = engine.status();
        assert!(status.last_tuning.is_some());
        let stream = status.stream.unwrap();
        assert_eq!(stream.buffer_size_in_frames, report.final_size);
        assert_eq!(stream.state, crate::audio::StreamState::Started);
    }

    #[test]
    fn test_tuning_disabled() {
        let platform = SimulatedPlatform::new(SimConfig {
            pace_writes: true,
            ..SimConfig::default()
        });
        let mut config = EngineConfig::default();
        config.tuning.enabled = false;
        let mut engine = Engine::new(config, Box::new(platform));

        assert!(engine.create_engine());
        assert!(engine.last_tuning_report().is_none());
    }

    #[test]
    fn test_wait_without_render_thread() {
        let (mut engine, _streams) = engine(SimConfig::default());
        assert!(engine.wait_for_teardown(Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_write_failure_ends_session() {
        let (mut engine, streams) = engine(SimConfig::default());
        assert!(engine.create_engine());
        assert!(engine.start());

        streams.latest().unwrap().fail_writes();
        wait_until(|| !engine.state().is_stream_open());

        assert!(!engine.start());
        assert!(matches!(engine.wait_for_teardown(TEARDOWN), Err(Error::Write(_))));
        assert_eq!(streams.latest().unwrap().close_count(), 1);
    }

    #[test]
    fn test_drop_closes_stream() {
        let (mut engine, streams) = engine(SimConfig::default());
        assert!(engine.create_engine());
        drop(engine);

        let handle = streams.latest().unwrap();
        assert_eq!(handle.close_count(), 1);
        assert!(!handle.wrote_after_close());
    }

    #[test]
    fn test_status_serializes() {
        let (mut engine, _streams) = engine(SimConfig::default());
        assert!(engine.create_engine());

        let json = serde_json::to_value(engine.status()).unwrap();
        assert_eq!(json["platform"], "simulated");
        assert_eq!(json["state"]["stream_open"], true);
        assert_eq!(json["render_thread_running"], true);
    }
}
