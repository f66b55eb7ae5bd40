//! Simulated playback stream
//!
//! **Purpose:** Deterministic stand-in for an audio device, used by the test
//! suite and by `toneplay-ap --simulate` on machines without audio hardware.
//!
//! Underruns follow a threshold model: every write issued while the buffer
//! size is below [`SimConfig::underrun_free_size`] adds one xrun. Faults
//! (rejected buffer sizes, failing writes, failing open/start) can be injected
//! through [`SimConfig`] or at runtime through [`SimHandle`].
//!
//! Each opened stream shares its state with a [`SimHandle`], so tests can
//! inspect calls and written audio after the stream has been moved onto the
//! render thread.

use crate::audio::{SampleFormat, SharingMode, StreamState};
use crate::error::{Error, Result};
use crate::stream::{AudioPlatform, PlaybackStream, StreamRequest};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Behaviour of simulated streams
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Reported by [`AudioPlatform::is_supported`]
    pub supported: bool,
    /// Device sample rate reported by opened streams
    pub sample_rate: u32,
    /// Frames per burst reported by opened streams
    pub frames_per_burst: u32,
    /// Buffer capacity override (default: burst × requested capacity bursts)
    pub capacity_frames: Option<u32>,
    /// Buffer size right after open (default: half the capacity)
    pub initial_buffer_size: Option<u32>,
    /// Largest buffer size the platform will apply
    pub max_buffer_size: Option<u32>,
    /// Writes issued below this buffer size cause one xrun each
    pub underrun_free_size: Option<u32>,
    /// Xrun count right after open
    pub initial_xruns: u32,
    /// Reject every buffer size change
    pub reject_buffer_size: bool,
    /// Fail every write once this many writes have succeeded
    pub fail_write_after: Option<usize>,
    /// Writes return `Ok(0)` without queueing anything
    pub zero_length_writes: bool,
    /// Buffer size changes return `Ok(0)` and leave the size unchanged
    pub zero_buffer_size_result: bool,
    /// Fail `open_stream`
    pub fail_open: bool,
    /// Fail `request_start`
    pub fail_start: bool,
    /// Sleep for the playback duration of each write, like a real device
    pub pace_writes: bool,
    /// Number of written buffers retained for inspection
    pub capture_limit: usize,
    /// Number of most recent calls retained in the call log
    pub call_log_limit: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            supported: true,
            sample_rate: 48000,
            frames_per_burst: 192,
            capacity_frames: None,
            initial_buffer_size: None,
            max_buffer_size: None,
            underrun_free_size: None,
            initial_xruns: 0,
            reject_buffer_size: false,
            fail_write_after: None,
            zero_length_writes: false,
            zero_buffer_size_result: false,
            fail_open: false,
            fail_start: false,
            pace_writes: false,
            capture_limit: 256,
            call_log_limit: 1024,
        }
    }
}

/// Operation issued against a simulated stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCall {
    SetBufferSize(u32),
    Write(usize),
    RequestStart,
    RequestStop,
    Close,
}

#[derive(Debug)]
struct SimState {
    config: SimConfig,
    state: StreamState,
    format: SampleFormat,
    sharing_mode: SharingMode,
    channels: u16,
    capacity: u32,
    buffer_size: u32,
    xruns: u32,
    calls: VecDeque<StreamCall>,
    captured: Vec<Vec<i16>>,
    successful_writes: usize,
    frames_written: u64,
    close_count: u32,
    wrote_after_close: bool,
    fail_writes: bool,
}

impl SimState {
    fn record(&mut self, call: StreamCall) {
        if self.calls.len() >= self.config.call_log_limit {
            self.calls.pop_front();
        }
        if self.config.call_log_limit > 0 {
            self.calls.push_back(call);
        }
    }
}

/// Inspection and fault-injection handle for one simulated stream
#[derive(Debug, Clone)]
pub struct SimHandle {
    inner: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panicking test thread must not hide the state from the others
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Most recent operations (up to `call_log_limit`), oldest first
    pub fn calls(&self) -> Vec<StreamCall> {
        self.lock().calls.iter().copied().collect()
    }

    /// Number of writes that queued audio
    pub fn successful_writes(&self) -> usize {
        self.lock().successful_writes
    }

    /// Total frames queued by successful writes
    pub fn frames_written(&self) -> u64 {
        self.lock().frames_written
    }

    /// Retained copies of written buffers (first `capture_limit` writes)
    pub fn captured_writes(&self) -> Vec<Vec<i16>> {
        self.lock().captured.clone()
    }

    pub fn state(&self) -> StreamState {
        self.lock().state
    }

    pub fn buffer_size(&self) -> u32 {
        self.lock().buffer_size
    }

    pub fn xrun_count(&self) -> u32 {
        self.lock().xruns
    }

    /// How many times `close` succeeded
    pub fn close_count(&self) -> u32 {
        self.lock().close_count
    }

    /// Whether a write was attempted on the closed stream
    pub fn wrote_after_close(&self) -> bool {
        self.lock().wrote_after_close
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self) {
        self.lock().fail_writes = true;
    }
}

/// Registry of the streams a [`SimulatedPlatform`] has opened
#[derive(Debug, Clone, Default)]
pub struct SimStreams {
    handles: Arc<Mutex<Vec<SimHandle>>>,
}

impl SimStreams {
    fn push(&self, handle: SimHandle) {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }

    /// Number of streams opened so far
    pub fn count(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Handle of the most recently opened stream
    pub fn latest(&self) -> Option<SimHandle> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .cloned()
    }
}

/// Audio platform producing [`SimulatedStream`]s
#[derive(Debug, Clone, Default)]
pub struct SimulatedPlatform {
    config: SimConfig,
    streams: SimStreams,
}

impl SimulatedPlatform {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            streams: SimStreams::default(),
        }
    }

    /// Registry shared with the platform; stays valid after the platform is moved
    pub fn streams(&self) -> SimStreams {
        self.streams.clone()
    }
}

impl AudioPlatform for SimulatedPlatform {
    fn name(&self) -> &str {
        "simulated"
    }

    fn is_supported(&self) -> bool {
        self.config.supported
    }

    fn open_stream(&mut self, request: &StreamRequest) -> Result<Box<dyn PlaybackStream>> {
        if self.config.fail_open {
            return Err(Error::StreamOpen("simulated open failure".to_string()));
        }
        if !(1..=2).contains(&request.channel_count) {
            return Err(Error::StreamOpen(format!(
                "unsupported channel count {}",
                request.channel_count
            )));
        }

        let stream = SimulatedStream::open(self.config.clone(), request);
        self.streams.push(stream.handle());
        debug!("Opened simulated stream: {:?}", stream.info());
        Ok(Box::new(stream))
    }
}

/// Simulated playback stream
#[derive(Debug)]
pub struct SimulatedStream {
    handle: SimHandle,
    sample_rate: u32,
    frames_per_burst: u32,
}

impl SimulatedStream {
    /// Open a stream directly, bypassing the platform
    pub fn open(config: SimConfig, request: &StreamRequest) -> Self {
        let burst = config.frames_per_burst.max(1);
        let capacity = config
            .capacity_frames
            .unwrap_or(burst * request.capacity_bursts.max(1));
        let buffer_size = config
            .initial_buffer_size
            .unwrap_or(capacity / 2)
            .clamp(1, capacity.max(1));

        let state = SimState {
            state: StreamState::Open,
            format: request.format,
            sharing_mode: request.sharing_mode,
            channels: request.channel_count,
            capacity,
            buffer_size,
            xruns: config.initial_xruns,
            calls: VecDeque::new(),
            captured: Vec::new(),
            successful_writes: 0,
            frames_written: 0,
            close_count: 0,
            wrote_after_close: false,
            fail_writes: false,
            config: config.clone(),
        };

        Self {
            handle: SimHandle {
                inner: Arc::new(Mutex::new(state)),
            },
            sample_rate: config.sample_rate,
            frames_per_burst: burst,
        }
    }

    /// Inspection handle sharing this stream's state
    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }
}

impl PlaybackStream for SimulatedStream {
    fn state(&self) -> StreamState {
        self.handle.lock().state
    }

    fn format(&self) -> SampleFormat {
        self.handle.lock().format
    }

    fn sharing_mode(&self) -> SharingMode {
        self.handle.lock().sharing_mode
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn samples_per_frame(&self) -> u16 {
        self.handle.lock().channels
    }

    fn frames_per_burst(&self) -> u32 {
        self.frames_per_burst
    }

    fn buffer_capacity_in_frames(&self) -> u32 {
        self.handle.lock().capacity
    }

    fn buffer_size_in_frames(&self) -> u32 {
        self.handle.lock().buffer_size
    }

    fn xrun_count(&self) -> u32 {
        self.handle.lock().xruns
    }

    fn set_buffer_size_in_frames(&mut self, frames: u32) -> Result<u32> {
        let mut sim = self.handle.lock();
        sim.record(StreamCall::SetBufferSize(frames));

        if sim.state == StreamState::Closed {
            return Err(Error::InvalidState("stream is closed".to_string()));
        }
        if sim.config.reject_buffer_size {
            return Err(Error::InvalidArgument(format!(
                "buffer size {} rejected",
                frames
            )));
        }
        if frames == 0 {
            return Err(Error::InvalidArgument("buffer size must be positive".to_string()));
        }
        if sim.config.zero_buffer_size_result {
            return Ok(0);
        }

        let mut applied = frames.min(sim.capacity);
        if let Some(max) = sim.config.max_buffer_size {
            applied = applied.min(max);
        }
        sim.buffer_size = applied;
        Ok(applied)
    }

    fn write(&mut self, buffer: &[i16], frame_count: usize, _timeout: Duration) -> Result<usize> {
        let pace = {
            let mut sim = self.handle.lock();
            sim.record(StreamCall::Write(frame_count));

            match sim.state {
                StreamState::Closed => {
                    sim.wrote_after_close = true;
                    return Err(Error::InvalidState("write on closed stream".to_string()));
                }
                StreamState::Started => {}
                other => {
                    return Err(Error::InvalidState(format!("write while {}", other)));
                }
            }

            let limit_reached = sim
                .config
                .fail_write_after
                .is_some_and(|limit| sim.successful_writes >= limit);
            if sim.fail_writes || limit_reached {
                return Err(Error::Write("simulated device error".to_string()));
            }
            if sim.config.zero_length_writes {
                return Ok(0);
            }

            let samples = frame_count * sim.channels as usize;
            if buffer.len() < samples {
                return Err(Error::InvalidArgument(format!(
                    "buffer holds {} samples, {} frames need {}",
                    buffer.len(),
                    frame_count,
                    samples
                )));
            }

            if let Some(threshold) = sim.config.underrun_free_size {
                if sim.buffer_size < threshold {
                    sim.xruns += 1;
                }
            }

            if sim.captured.len() < sim.config.capture_limit {
                sim.captured.push(buffer[..samples].to_vec());
            }
            sim.successful_writes += 1;
            sim.frames_written += frame_count as u64;

            sim.config.pace_writes.then(|| {
                Duration::from_secs_f64(frame_count as f64 / self.sample_rate.max(1) as f64)
            })
        };

        if let Some(duration) = pace {
            std::thread::sleep(duration);
        }
        Ok(frame_count)
    }

    fn request_start(&mut self) -> Result<()> {
        let mut sim = self.handle.lock();
        sim.record(StreamCall::RequestStart);
        if sim.state == StreamState::Closed {
            return Err(Error::InvalidState("stream is closed".to_string()));
        }
        if sim.config.fail_start {
            return Err(Error::AudioOutput("simulated start failure".to_string()));
        }
        sim.state = StreamState::Started;
        Ok(())
    }

    fn request_stop(&mut self) -> Result<()> {
        let mut sim = self.handle.lock();
        sim.record(StreamCall::RequestStop);
        if sim.state == StreamState::Closed {
            return Err(Error::InvalidState("stream is closed".to_string()));
        }
        sim.state = StreamState::Stopped;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut sim = self.handle.lock();
        sim.record(StreamCall::Close);
        if sim.state == StreamState::Closed {
            return Err(Error::InvalidState("stream already closed".to_string()));
        }
        sim.state = StreamState::Closed;
        sim.close_count += 1;
        Ok(())
    }
}
