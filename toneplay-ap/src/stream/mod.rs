//! Playback stream abstraction
//!
//! **Purpose:** Blocking-write playback stream with a tunable buffer size and an
//! underrun (xrun) counter, independent of the audio backend.
//!
//! The engine only talks to [`AudioPlatform`] and [`PlaybackStream`]. Two
//! backends implement them:
//! - [`cpal_stream`]: real device output through cpal
//! - [`sim`]: deterministic in-process stream for tests and dry runs

pub mod cpal_stream;
pub mod sim;

pub use cpal_stream::{CpalPlatform, CpalStream};
pub use sim::{SimConfig, SimHandle, SimStreams, SimulatedPlatform, SimulatedStream, StreamCall};

use crate::audio::{SampleFormat, SharingMode, StreamInfo, StreamState};
use crate::error::Result;
use std::time::Duration;
use tracing::info;

/// Parameters for opening a playback stream
///
/// The sample rate is deliberately absent: it is chosen by the device and
/// read back from the opened stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub format: SampleFormat,
    pub channel_count: u16,
    pub sharing_mode: SharingMode,
    /// Output device name (None = default device)
    pub device_name: Option<String>,
    /// Preferred frames per burst; backends may round or ignore it
    pub frames_per_burst_hint: Option<u32>,
    /// Buffer capacity expressed in bursts
    pub capacity_bursts: u32,
}

impl StreamRequest {
    /// Request with the fixed engine format: i16 PCM, shared mode
    pub fn new(channel_count: u16) -> Self {
        Self {
            format: SampleFormat::PcmI16,
            channel_count,
            sharing_mode: SharingMode::Shared,
            device_name: None,
            frames_per_burst_hint: None,
            capacity_bursts: 16,
        }
    }
}

/// Audio backend able to open playback streams
pub trait AudioPlatform: Send {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Whether this backend can be used on the current system
    fn is_supported(&self) -> bool;

    /// Open (but do not start) a playback stream
    fn open_stream(&mut self, request: &StreamRequest) -> Result<Box<dyn PlaybackStream>>;
}

/// Handle to an open playback stream
///
/// Mirrors a blocking-write low-latency API: the application writes bursts,
/// the device drains them at a fixed rate, and every time the device finds the
/// buffer short it bumps [`xrun_count`](Self::xrun_count).
pub trait PlaybackStream: Send {
    fn state(&self) -> StreamState;
    fn format(&self) -> SampleFormat;
    fn sharing_mode(&self) -> SharingMode;
    fn sample_rate(&self) -> u32;
    fn samples_per_frame(&self) -> u16;
    fn frames_per_burst(&self) -> u32;
    fn buffer_capacity_in_frames(&self) -> u32;
    fn buffer_size_in_frames(&self) -> u32;
    fn xrun_count(&self) -> u32;

    /// Request a new active buffer size
    ///
    /// Returns the size actually applied, which may differ from `frames`.
    /// `Ok(0)` and `Err` both mean the request was rejected.
    fn set_buffer_size_in_frames(&mut self, frames: u32) -> Result<u32>;

    /// Write `frame_count` interleaved frames from `buffer`
    ///
    /// Blocks until all frames are queued or `timeout` elapses, and returns
    /// the number of frames queued (possibly fewer than requested).
    fn write(&mut self, buffer: &[i16], frame_count: usize, timeout: Duration) -> Result<usize>;

    fn request_start(&mut self) -> Result<()>;
    fn request_stop(&mut self) -> Result<()>;

    /// Release the stream; every later call fails or is a no-op
    fn close(&mut self) -> Result<()>;

    /// Snapshot of configuration and counters
    fn info(&self) -> StreamInfo {
        StreamInfo {
            state: self.state(),
            format: self.format(),
            sharing_mode: self.sharing_mode(),
            sample_rate: self.sample_rate(),
            samples_per_frame: self.samples_per_frame(),
            frames_per_burst: self.frames_per_burst(),
            buffer_capacity_in_frames: self.buffer_capacity_in_frames(),
            buffer_size_in_frames: self.buffer_size_in_frames(),
            xrun_count: self.xrun_count(),
        }
    }
}

/// Log the stream's configuration and counters, returning what was logged
pub fn log_stream_info(stream: &dyn PlaybackStream) -> StreamInfo {
    let info = stream.info();
    info!(
        "Stream info: state={}, format={:?}, sharing={:?}, sample_rate={}, channels={}",
        info.state, info.format, info.sharing_mode, info.sample_rate, info.samples_per_frame
    );
    info!(
        "Stream buffer: burst={} frames, capacity={} frames, size={} frames ({:.2}ms), xruns={}",
        info.frames_per_burst,
        info.buffer_capacity_in_frames,
        info.buffer_size_in_frames,
        info.buffer_latency_ms(),
        info.xrun_count
    );
    info
}
