//! Shared engine state
//!
//! Thread-safe flags and stream parameters shared between the controller
//! (caller thread) and the render thread.
//!
//! The stream handle itself is not stored here: it is owned by whoever is
//! using it (controller while tuning, render loop afterwards). `stream_open`
//! is the engine-visible "handle present" bit, set by the controller once the
//! stream is started and cleared by the render loop after it closes the stream.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};

/// Engine state shared via `Arc<EngineState>`
#[derive(Debug, Default)]
pub struct EngineState {
    sample_rate: AtomicU32,
    channel_count: AtomicU16,
    bits_per_sample: AtomicU16,

    /// Stream handle present (render loop running or shutting down)
    stream_open: AtomicBool,

    /// Teardown requested; cleared by the render loop when it acts on it
    stop_requested: AtomicBool,

    /// Render tone (true) or silence (false); read fresh every burst
    audio_enabled: AtomicBool,
}

/// Point-in-time copy of [`EngineState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStateSnapshot {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub bits_per_sample: u16,
    pub stream_open: bool,
    pub stop_requested: bool,
    pub audio_enabled: bool,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return every field to its initial value
    pub fn reset(&self) {
        self.sample_rate.store(0, Ordering::Relaxed);
        self.channel_count.store(0, Ordering::Relaxed);
        self.bits_per_sample.store(0, Ordering::Relaxed);
        self.audio_enabled.store(false, Ordering::Release);
        self.stop_requested.store(false, Ordering::Release);
        self.stream_open.store(false, Ordering::Release);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub fn set_sample_rate(&self, rate: u32) {
        self.sample_rate.store(rate, Ordering::Relaxed);
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count.load(Ordering::Relaxed)
    }

    pub fn set_channel_count(&self, channels: u16) {
        self.channel_count.store(channels, Ordering::Relaxed);
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample.load(Ordering::Relaxed)
    }

    pub fn set_bits_per_sample(&self, bits: u16) {
        self.bits_per_sample.store(bits, Ordering::Relaxed);
    }

    pub fn is_stream_open(&self) -> bool {
        self.stream_open.load(Ordering::Acquire)
    }

    pub fn set_stream_open(&self, open: bool) {
        self.stream_open.store(open, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Request teardown if the stream is open
    ///
    /// Returns false and leaves no request behind when the stream is closed,
    /// including when the render loop closes it during this call.
    pub fn request_stop_if_open(&self) -> bool {
        if !self.stream_open.load(Ordering::SeqCst) {
            return false;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        if self.stream_open.load(Ordering::SeqCst) {
            return true;
        }
        // Closed in between; the render loop may have consumed the flag already
        self.stop_requested.store(false, Ordering::SeqCst);
        false
    }

    /// Mark the stream closed, then drop any pending stop request
    ///
    /// Pairs with [`request_stop_if_open`](Self::request_stop_if_open): a
    /// request that observed the stream open is always cleared here.
    pub fn finish_stream(&self) {
        self.stream_open.store(false, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::Acquire)
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.audio_enabled.store(enabled, Ordering::Release);
    }

    pub fn snapshot(&self) -> EngineStateSnapshot {
        EngineStateSnapshot {
            sample_rate: self.sample_rate(),
            channel_count: self.channel_count(),
            bits_per_sample: self.bits_per_sample(),
            stream_open: self.is_stream_open(),
            stop_requested: self.is_stop_requested(),
            audio_enabled: self.is_audio_enabled(),
        }
    }
}
