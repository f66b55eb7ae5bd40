//! Audio stream types
//!
//! Format, sharing mode, and lifecycle state of a playback stream, plus the
//! [`StreamInfo`] snapshot used for logging and status reports.

use serde::{Deserialize, Serialize};
use std::fmt;

/// PCM sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// 16-bit signed integer PCM
    PcmI16,
    /// 32-bit float PCM
    PcmF32,
}

impl SampleFormat {
    /// Bits per sample for this format
    pub fn bits_per_sample(self) -> u16 {
        match self {
            SampleFormat::PcmI16 => 16,
            SampleFormat::PcmF32 => 32,
        }
    }
}

/// Device sharing mode requested for a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingMode {
    /// Stream mixed with other clients by the platform
    #[default]
    Shared,
    /// Stream has the device to itself
    Exclusive,
}

/// Stream lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Open,
    Started,
    Stopped,
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Open => "open",
            StreamState::Started => "started",
            StreamState::Stopped => "stopped",
            StreamState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Snapshot of a stream's configuration and counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub state: StreamState,
    pub format: SampleFormat,
    pub sharing_mode: SharingMode,
    pub sample_rate: u32,
    pub samples_per_frame: u16,
    pub frames_per_burst: u32,
    pub buffer_capacity_in_frames: u32,
    pub buffer_size_in_frames: u32,
    pub xrun_count: u32,
}

impl StreamInfo {
    /// Latency of the active buffer portion in milliseconds
    pub fn buffer_latency_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.buffer_size_in_frames as f64 * 1000.0 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_per_sample() {
        assert_eq!(SampleFormat::PcmI16.bits_per_sample(), 16);
        assert_eq!(SampleFormat::PcmF32.bits_per_sample(), 32);
    }

    #[test]
    fn test_buffer_latency() {
        let info = StreamInfo {
            state: StreamState::Started,
            format: SampleFormat::PcmI16,
            sharing_mode: SharingMode::Shared,
            sample_rate: 48000,
            samples_per_frame: 2,
            frames_per_burst: 192,
            buffer_capacity_in_frames: 3072,
            buffer_size_in_frames: 480,
            xrun_count: 0,
        };
        assert!((info.buffer_latency_ms() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_sharing_mode_serde_name() {
        let mode: SharingMode = toml::Value::String("exclusive".into()).try_into().unwrap();
        assert_eq!(mode, SharingMode::Exclusive);
    }
}
