//! Blocking-write playback stream using cpal
//!
//! cpal is callback driven while the engine writes bursts, so a lock-free ring
//! buffer sits between them:
//! - Writer ([`CpalStream::write`]): pushes i16 frames, never letting the ring
//!   hold more than `buffer_size_in_frames` frames, and waits for room up to
//!   the write timeout
//! - Device callback: pops frames and converts them to the device sample
//!   format; a short read after the first write counts as one xrun
//!
//! The ring capacity is `frames_per_burst × capacity_bursts`; the active
//! buffer size is the tunable fill limit inside it.
//!
//! `cpal::Stream` is not `Send`, so it is built and owned by a dedicated device
//! thread which takes play/pause/close commands over a channel. The
//! [`CpalStream`] handle itself can move freely between threads.

use crate::audio::{SampleFormat, SharingMode, StreamState};
use crate::error::{Error, Result};
use crate::stream::{AudioPlatform, PlaybackStream, StreamRequest};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SizedSample, StreamConfig, SupportedBufferSize};
use crossbeam_channel::{bounded, Receiver, Sender};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Burst size requested when the caller gives no hint (4ms @ 48kHz)
const DEFAULT_FRAMES_PER_BURST: u32 = 192;

/// How long to wait for the device thread to build the stream
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for play/pause acknowledgements
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Shortest sleep while waiting for ring space
const MIN_POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Audio platform backed by the default cpal host
#[derive(Debug, Default, Clone)]
pub struct CpalPlatform;

impl CpalPlatform {
    pub fn new() -> Self {
        Self
    }

    /// List available audio output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }
}

impl AudioPlatform for CpalPlatform {
    fn name(&self) -> &str {
        "cpal"
    }

    fn is_supported(&self) -> bool {
        let host = cpal::default_host();
        let supported = host.default_output_device().is_some();
        if !supported {
            warn!("cpal host {:?} has no default output device", host.id());
        }
        supported
    }

    fn open_stream(&mut self, request: &StreamRequest) -> Result<Box<dyn PlaybackStream>> {
        Ok(Box::new(CpalStream::open(request)?))
    }
}

/// Counters shared between the writer, the device thread, and the callback
#[derive(Debug, Default)]
struct DeviceShared {
    /// Short reads by the device callback since the stream was primed
    xruns: AtomicU32,
    /// Set by the first write that queued audio
    primed: AtomicBool,
    /// Set by cpal's error callback
    device_error: AtomicBool,
}

enum DeviceCommand {
    Play(Sender<Result<()>>),
    Pause(Sender<Result<()>>),
    Close,
}

/// What the device thread reports once the stream is built
struct OpenedDevice {
    producer: HeapProd<i16>,
    device_name: String,
    device_format: cpal::SampleFormat,
    sample_rate: u32,
    frames_per_burst: u32,
    capacity: u32,
}

/// Playback stream on a cpal output device
pub struct CpalStream {
    producer: HeapProd<i16>,
    shared: Arc<DeviceShared>,
    commands: Sender<DeviceCommand>,
    device_thread: Option<JoinHandle<()>>,
    state: StreamState,
    sharing_mode: SharingMode,
    sample_rate: u32,
    channels: u16,
    frames_per_burst: u32,
    capacity: u32,
    buffer_size: u32,
}

impl CpalStream {
    /// Open an output stream on the requested (or default) device
    ///
    /// The stream is built paused; call `request_start` to begin playback.
    pub fn open(request: &StreamRequest) -> Result<Self> {
        if request.format != SampleFormat::PcmI16 {
            return Err(Error::StreamOpen(format!(
                "unsupported sample format {:?}",
                request.format
            )));
        }
        if request.sharing_mode == SharingMode::Exclusive {
            warn!("cpal has no exclusive mode, opening a shared stream");
        }

        let shared = Arc::new(DeviceShared::default());
        let (command_tx, command_rx) = bounded::<DeviceCommand>(4);
        let (ready_tx, ready_rx) = bounded::<Result<OpenedDevice>>(1);

        let thread_request = request.clone();
        let thread_shared = Arc::clone(&shared);
        let device_thread = std::thread::Builder::new()
            .name("toneplay-device".to_string())
            .spawn(move || run_device_thread(thread_request, thread_shared, command_rx, ready_tx))
            .map_err(|e| Error::Internal(format!("Failed to spawn device thread: {}", e)))?;

        let opened = ready_rx
            .recv_timeout(OPEN_TIMEOUT)
            .map_err(|e| Error::StreamOpen(format!("device thread did not report: {}", e)))??;

        info!(
            "Opened cpal stream on '{}': {} Hz, {} ch, device format {:?}, burst {} frames",
            opened.device_name,
            opened.sample_rate,
            request.channel_count,
            opened.device_format,
            opened.frames_per_burst
        );

        Ok(Self {
            producer: opened.producer,
            shared,
            commands: command_tx,
            device_thread: Some(device_thread),
            state: StreamState::Open,
            sharing_mode: SharingMode::Shared,
            sample_rate: opened.sample_rate,
            channels: request.channel_count,
            frames_per_burst: opened.frames_per_burst,
            capacity: opened.capacity,
            // Start with two bursts queued at most
            buffer_size: (opened.frames_per_burst * 2).min(opened.capacity),
        })
    }

    fn send_command(&self, make: impl FnOnce(Sender<Result<()>>) -> DeviceCommand) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(make(reply_tx))
            .map_err(|_| Error::AudioOutput("device thread has exited".to_string()))?;
        reply_rx
            .recv_timeout(COMMAND_TIMEOUT)
            .map_err(|e| Error::AudioOutput(format!("device thread did not reply: {}", e)))?
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if self.state == StreamState::Closed {
            return Err(Error::InvalidState("stream is closed".to_string()));
        }
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        let burst_secs = self.frames_per_burst as f64 / self.sample_rate.max(1) as f64;
        Duration::from_secs_f64(burst_secs / 4.0).max(MIN_POLL_INTERVAL)
    }

    fn shutdown_device_thread(&mut self) {
        let _ = self.commands.send(DeviceCommand::Close);
        if let Some(handle) = self.device_thread.take() {
            if handle.join().is_err() {
                error!("Device thread panicked during shutdown");
            }
        }
    }
}

impl PlaybackStream for CpalStream {
    fn state(&self) -> StreamState {
        self.state
    }

    fn format(&self) -> SampleFormat {
        SampleFormat::PcmI16
    }

    fn sharing_mode(&self) -> SharingMode {
        self.sharing_mode
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn samples_per_frame(&self) -> u16 {
        self.channels
    }

    fn frames_per_burst(&self) -> u32 {
        self.frames_per_burst
    }

    fn buffer_capacity_in_frames(&self) -> u32 {
        self.capacity
    }

    fn buffer_size_in_frames(&self) -> u32 {
        self.buffer_size
    }

    fn xrun_count(&self) -> u32 {
        self.shared.xruns.load(Ordering::Relaxed)
    }

    fn set_buffer_size_in_frames(&mut self, frames: u32) -> Result<u32> {
        self.ensure_not_closed()?;
        if frames == 0 {
            return Err(Error::InvalidArgument("buffer size must be positive".to_string()));
        }
        self.buffer_size = frames.min(self.capacity);
        debug!("Buffer size set to {} frames (requested {})", self.buffer_size, frames);
        Ok(self.buffer_size)
    }

    fn write(&mut self, buffer: &[i16], frame_count: usize, timeout: Duration) -> Result<usize> {
        self.ensure_not_closed()?;
        if self.state != StreamState::Started {
            return Err(Error::InvalidState(format!("write while {}", self.state)));
        }
        if self.shared.device_error.load(Ordering::Acquire) {
            return Err(Error::AudioOutput("device reported a stream error".to_string()));
        }

        let channels = self.channels as usize;
        let total = frame_count * channels;
        if buffer.len() < total {
            return Err(Error::InvalidArgument(format!(
                "buffer holds {} samples, {} frames need {}",
                buffer.len(),
                frame_count,
                total
            )));
        }

        let fill_limit = self.buffer_size as usize * channels;
        let deadline = Instant::now() + timeout;
        let poll = self.poll_interval();
        let mut written = 0;

        loop {
            let room = fill_limit.saturating_sub(self.producer.occupied_len());
            let room = room - room % channels;
            if room > 0 {
                let end = total.min(written + room);
                let pushed = self.producer.push_slice(&buffer[written..end]);
                if pushed > 0 {
                    written += pushed;
                    self.shared.primed.store(true, Ordering::Release);
                }
            }

            if written >= total {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(poll.min(deadline - now));
        }

        Ok(written / channels)
    }

    fn request_start(&mut self) -> Result<()> {
        self.ensure_not_closed()?;
        self.send_command(DeviceCommand::Play)?;
        self.state = StreamState::Started;
        Ok(())
    }

    fn request_stop(&mut self) -> Result<()> {
        self.ensure_not_closed()?;
        self.send_command(DeviceCommand::Pause)?;
        self.state = StreamState::Stopped;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_not_closed()?;
        self.shutdown_device_thread();
        self.state = StreamState::Closed;
        info!("cpal stream closed");
        Ok(())
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        if self.state != StreamState::Closed {
            warn!("cpal stream dropped without close");
            self.shutdown_device_thread();
        }
    }
}

/// Device thread body: build the stream, report, then serve commands
fn run_device_thread(
    request: StreamRequest,
    shared: Arc<DeviceShared>,
    commands: Receiver<DeviceCommand>,
    ready: Sender<Result<OpenedDevice>>,
) {
    let (stream, opened) = match build_output(&request, &shared) {
        Ok(built) => built,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if ready.send(Ok(opened)).is_err() {
        return;
    }

    for command in commands.iter() {
        match command {
            DeviceCommand::Play(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)));
                let _ = reply.send(result);
            }
            DeviceCommand::Pause(reply) => {
                let result = stream
                    .pause()
                    .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)));
                let _ = reply.send(result);
            }
            DeviceCommand::Close => break,
        }
    }

    drop(stream);
    debug!("Device thread exiting");
}

fn build_output(
    request: &StreamRequest,
    shared: &Arc<DeviceShared>,
) -> Result<(cpal::Stream, OpenedDevice)> {
    let host = cpal::default_host();
    let device = find_device(&host, request.device_name.as_deref())?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let (config, device_format, frames_per_burst) = select_config(&device, request)?;
    let capacity = frames_per_burst * request.capacity_bursts.max(1);
    let ring = HeapRb::<i16>::new(capacity as usize * request.channel_count as usize);
    let (producer, consumer) = ring.split();

    let stream = match device_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, consumer, shared)?,
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, consumer, shared)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, consumer, shared)?,
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, consumer, shared)?,
        other => {
            return Err(Error::StreamOpen(format!(
                "unsupported device sample format {:?}",
                other
            )));
        }
    };

    // cpal streams may start running as soon as they are built
    if let Err(e) = stream.pause() {
        debug!("Could not pause freshly built stream: {}", e);
    }

    let opened = OpenedDevice {
        producer,
        device_name,
        device_format,
        sample_rate: config.sample_rate.0,
        frames_per_burst,
        capacity,
    };
    Ok((stream, opened))
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<Device> {
    if let Some(name) = name {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::StreamOpen(format!("Failed to enumerate devices: {}", e)))?;

        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            return Ok(device);
        }
        warn!("Requested device '{}' not found, falling back to default device", name);
    }

    host.default_output_device()
        .ok_or_else(|| Error::StreamOpen("No default output device found".to_string()))
}

/// Pick a device config with the requested channel count at the device's
/// preferred sample rate, favouring i16 then f32 device formats
fn select_config(
    device: &Device,
    request: &StreamRequest,
) -> Result<(StreamConfig, cpal::SampleFormat, u32)> {
    let default_config = device
        .default_output_config()
        .map_err(|e| Error::StreamOpen(format!("Failed to get default config: {}", e)))?;
    let sample_rate = default_config.sample_rate();

    let candidates: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::StreamOpen(format!("Failed to get device configs: {}", e)))?
        .filter(|c| {
            c.channels() == request.channel_count
                && c.min_sample_rate() <= sample_rate
                && c.max_sample_rate() >= sample_rate
        })
        .collect();

    let chosen = candidates
        .iter()
        .find(|c| c.sample_format() == cpal::SampleFormat::I16)
        .or_else(|| {
            candidates
                .iter()
                .find(|c| c.sample_format() == cpal::SampleFormat::F32)
        })
        .or_else(|| candidates.first())
        .cloned()
        .ok_or_else(|| {
            Error::StreamOpen(format!(
                "device has no {}-channel config at {} Hz",
                request.channel_count, sample_rate.0
            ))
        })?
        .with_sample_rate(sample_rate);

    let device_format = chosen.sample_format();
    let hint = request
        .frames_per_burst_hint
        .unwrap_or(DEFAULT_FRAMES_PER_BURST)
        .max(1);

    let mut config = chosen.config();
    let frames_per_burst = match *chosen.buffer_size() {
        SupportedBufferSize::Range { min, max } => {
            let burst = hint.clamp(min.max(1), max.max(1));
            config.buffer_size = cpal::BufferSize::Fixed(burst);
            burst
        }
        SupportedBufferSize::Unknown => {
            config.buffer_size = cpal::BufferSize::Default;
            hint
        }
    };

    Ok((config, device_format, frames_per_burst))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut consumer: HeapCons<i16>,
    shared: &Arc<DeviceShared>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<i16> + Send + 'static,
{
    let callback_shared = Arc::clone(shared);
    let error_shared = Arc::clone(shared);
    // Scratch sized to the whole ring so the callback never allocates
    let mut scratch = vec![0i16; consumer.capacity().get()];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut filled = 0;
                while filled < data.len() {
                    let chunk = (data.len() - filled).min(scratch.len());
                    let got = consumer.pop_slice(&mut scratch[..chunk]);

                    for (out, &sample) in data[filled..filled + got].iter_mut().zip(&scratch[..got]) {
                        *out = T::from_sample(sample);
                    }
                    filled += got;

                    if got < chunk {
                        for out in &mut data[filled..] {
                            *out = T::EQUILIBRIUM;
                        }
                        if callback_shared.primed.load(Ordering::Acquire) {
                            callback_shared.xruns.fetch_add(1, Ordering::Relaxed);
                        }
                        break;
                    }
                }
            },
            move |err| {
                error!("Audio stream error: {}", err);
                error_shared.device_error.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(|e| Error::StreamOpen(format!("Failed to build stream: {}", e)))
}
