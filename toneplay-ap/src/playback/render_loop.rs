//! Real-time render loop
//!
//! Runs on the dedicated render thread. Each iteration renders one burst
//! (sine tone or silence, chosen by the `audio_enabled` flag read fresh every
//! time) and writes it to the stream, blocking up to the write timeout. The
//! blocking write is the only suspension point, so stop requests are noticed
//! within one burst plus one write timeout.
//!
//! The loop owns the stream handle. On exit, whether because a stop was
//! requested or because a write failed, it stops and closes the stream and
//! clears `stream_open`. Nothing else closes the stream.

use crate::audio::SineGenerator;
use crate::error::{Error, Result};
use crate::playback::state::EngineState;
use crate::stream::PlaybackStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Timeout for each burst write
pub const DEFAULT_RENDER_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// Tone parameters
///
/// The primary channel (interleaved slot 0) is always rendered; the secondary
/// channel (slot 1) only for stereo streams. Different frequencies per channel
/// make the stereo image audible.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneSettings {
    pub primary_hz: f64,
    pub secondary_hz: f64,
    /// Peak amplitude relative to full scale (0.0-1.0]
    pub amplitude: f64,
}

impl Default for ToneSettings {
    fn default() -> Self {
        Self {
            primary_hz: 660.0,
            secondary_hz: 440.0,
            amplitude: 0.25,
        }
    }
}

/// What the render loop did before it exited
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderSummary {
    pub bursts_written: u64,
    pub tone_bursts: u64,
    pub silence_bursts: u64,
    pub frames_written: u64,
    /// Stream xrun counter just before close
    pub final_xrun_count: u32,
}

/// Render loop state: stream, oscillators, and the reusable burst buffer
pub struct RenderLoop {
    stream: Box<dyn PlaybackStream>,
    state: Arc<EngineState>,
    primary: SineGenerator,
    secondary: SineGenerator,
    buffer: Vec<i16>,
    frames_per_burst: usize,
    samples_per_frame: usize,
    write_timeout: Duration,
}

impl RenderLoop {
    pub fn new(
        stream: Box<dyn PlaybackStream>,
        state: Arc<EngineState>,
        tone: ToneSettings,
        write_timeout: Duration,
    ) -> Self {
        let sample_rate = stream.sample_rate();
        let frames_per_burst = stream.frames_per_burst().max(1) as usize;
        let samples_per_frame = stream.samples_per_frame().max(1) as usize;

        Self {
            primary: SineGenerator::new(tone.primary_hz, sample_rate, tone.amplitude),
            secondary: SineGenerator::new(tone.secondary_hz, sample_rate, tone.amplitude),
            buffer: vec![0; frames_per_burst * samples_per_frame],
            stream,
            state,
            frames_per_burst,
            samples_per_frame,
            write_timeout,
        }
    }

    /// Render and write bursts until a stop is requested or a write fails
    ///
    /// Always closes the stream before returning.
    pub fn run(mut self) -> Result<RenderSummary> {
        info!(
            "Render loop started: {} frames/burst, {} ch, {} Hz, timeout {:?}",
            self.frames_per_burst,
            self.samples_per_frame,
            self.stream.sample_rate(),
            self.write_timeout
        );

        let mut summary = RenderSummary::default();
        let result = self.render_until_stopped(&mut summary);

        summary.final_xrun_count = self.stream.xrun_count();
        self.shutdown();

        match result {
            Ok(()) => {
                info!(
                    "Render loop finished: {} bursts ({} tone, {} silence), {} xruns",
                    summary.bursts_written,
                    summary.tone_bursts,
                    summary.silence_bursts,
                    summary.final_xrun_count
                );
                Ok(summary)
            }
            Err(e) => {
                error!(
                    "Render loop terminated after {} bursts: {}",
                    summary.bursts_written, e
                );
                Err(e)
            }
        }
    }

    fn render_until_stopped(&mut self, summary: &mut RenderSummary) -> Result<()> {
        while !self.state.is_stop_requested() {
            let tone = self.state.is_audio_enabled();
            self.render_burst(tone);

            let written = self
                .stream
                .write(&self.buffer, self.frames_per_burst, self.write_timeout)
                .map_err(|e| Error::Write(e.to_string()))?;
            if written == 0 {
                return Err(Error::Write(format!(
                    "no frames written within {:?}",
                    self.write_timeout
                )));
            }

            summary.bursts_written += 1;
            summary.frames_written += written as u64;
            if tone {
                summary.tone_bursts += 1;
            } else {
                summary.silence_bursts += 1;
            }
        }

        debug!("Stop requested, leaving render loop");
        Ok(())
    }

    /// Fill the burst buffer with tone or silence
    pub(crate) fn render_burst(&mut self, tone: bool) {
        if tone {
            self.primary
                .render(&mut self.buffer, self.samples_per_frame, self.frames_per_burst);
            if self.samples_per_frame == 2 {
                self.secondary
                    .render(&mut self.buffer[1..], self.samples_per_frame, self.frames_per_burst);
            }
        } else {
            self.buffer.fill(0);
        }
    }

    pub(crate) fn buffer(&self) -> &[i16] {
        &self.buffer
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.stream.request_stop() {
            warn!("Failed to stop stream: {}", e);
        }
        if let Err(e) = self.stream.close() {
            error!("Failed to close stream: {}", e);
        }

        self.state.finish_stream();
        info!("Player is done, stream closed");
    }
}
