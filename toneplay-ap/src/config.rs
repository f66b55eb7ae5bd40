//! Configuration for toneplay-ap
//!
//! Loaded from an optional TOML file (see `toneplay_common::config` for path
//! resolution). Every field has a built-in default, so an empty or missing
//! file yields a working configuration:
//!
//! ```toml
//! [audio]
//! channel_count = 2          # 1 or 2
//! sharing_mode = "shared"
//! # device = "Speakers"      # default output device when omitted
//! # frames_per_burst = 192   # backend hint
//! capacity_bursts = 16
//!
//! [tone]
//! primary_hz = 660.0
//! secondary_hz = 440.0
//! amplitude = 0.25
//!
//! [timing]
//! render_write_timeout_ms = 100
//! tuning_write_timeout_ms = 1000
//! teardown_timeout_ms = 2000
//!
//! [tuning]
//! enabled = true
//!
//! [logging]
//! level = "info"
//! ```

use crate::audio::{SampleFormat, SharingMode};
use crate::error::{Error, Result};
use crate::playback::ToneSettings;
use crate::stream::StreamRequest;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use toneplay_common::config::{load_toml_or_default, parse_toml, LoggingConfig};

/// Stream parameters
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub channel_count: u16,
    pub sharing_mode: SharingMode,
    /// Output device name (None = default device)
    pub device: Option<String>,
    /// Preferred frames per burst
    pub frames_per_burst: Option<u32>,
    /// Buffer capacity in bursts
    pub capacity_bursts: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            channel_count: 2,
            sharing_mode: SharingMode::Shared,
            device: None,
            frames_per_burst: None,
            capacity_bursts: 16,
        }
    }
}

/// Timeouts, in milliseconds
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimingConfig {
    pub render_write_timeout_ms: u64,
    pub tuning_write_timeout_ms: u64,
    /// How long teardown waits for the render thread to close the stream
    pub teardown_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            render_write_timeout_ms: 100,
            tuning_write_timeout_ms: 1000,
            teardown_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TuningConfig {
    /// Run the low-latency buffer tuner after the stream starts
    pub enabled: bool,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub tone: ToneSettings,
    pub timing: TimingConfig,
    pub tuning: TuningConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load from `path` (None = defaults) and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = load_toml_or_default(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string and validate
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = parse_toml(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(1..=2).contains(&self.audio.channel_count) {
            return Err(Error::Config(format!(
                "audio.channel_count must be 1 or 2, got {}",
                self.audio.channel_count
            )));
        }
        if self.audio.capacity_bursts < 2 {
            return Err(Error::Config(format!(
                "audio.capacity_bursts must be at least 2, got {}",
                self.audio.capacity_bursts
            )));
        }
        if self.audio.frames_per_burst == Some(0) {
            return Err(Error::Config("audio.frames_per_burst must be positive".to_string()));
        }
        for (name, hz) in [
            ("tone.primary_hz", self.tone.primary_hz),
            ("tone.secondary_hz", self.tone.secondary_hz),
        ] {
            if !hz.is_finite() || hz <= 0.0 {
                return Err(Error::Config(format!("{} must be positive, got {}", name, hz)));
            }
        }
        if !(self.tone.amplitude > 0.0 && self.tone.amplitude <= 1.0) {
            return Err(Error::Config(format!(
                "tone.amplitude must be in (0, 1], got {}",
                self.tone.amplitude
            )));
        }
        if self.timing.render_write_timeout_ms == 0 || self.timing.tuning_write_timeout_ms == 0 {
            return Err(Error::Config("write timeouts must be positive".to_string()));
        }
        Ok(())
    }

    /// Stream request for the fixed engine format (i16 PCM)
    pub fn stream_request(&self) -> StreamRequest {
        StreamRequest {
            format: SampleFormat::PcmI16,
            channel_count: self.audio.channel_count,
            sharing_mode: self.audio.sharing_mode,
            device_name: self.audio.device.clone(),
            frames_per_burst_hint: self.audio.frames_per_burst,
            capacity_bursts: self.audio.capacity_bursts,
        }
    }

    pub fn render_write_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.render_write_timeout_ms)
    }

    pub fn tuning_write_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.tuning_write_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.teardown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.audio.channel_count, 2);
        assert_eq!(config.audio.sharing_mode, SharingMode::Shared);
        assert_eq!(config.tone.primary_hz, 660.0);
        assert_eq!(config.tone.secondary_hz, 440.0);
        assert_eq!(config.render_write_timeout(), Duration::from_millis(100));
        assert_eq!(config.tuning_write_timeout(), Duration::from_secs(1));
        assert!(config.tuning.enabled);
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            [audio]
            channel_count = 1
            device = "USB DAC"

            [tone]
            amplitude = 0.5

            [tuning]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.audio.channel_count, 1);
        assert_eq!(config.audio.device.as_deref(), Some("USB DAC"));
        assert_eq!(config.audio.capacity_bursts, 16);
        assert_eq!(config.tone.amplitude, 0.5);
        assert_eq!(config.tone.primary_hz, 660.0);
        assert!(!config.tuning.enabled);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(EngineConfig::from_toml_str("[audio]\nchannel_count = 3").is_err());
        assert!(EngineConfig::from_toml_str("[audio]\ncapacity_bursts = 1").is_err());
        assert!(EngineConfig::from_toml_str("[tone]\namplitude = 1.5").is_err());
        assert!(EngineConfig::from_toml_str("[tone]\nprimary_hz = -1.0").is_err());
        assert!(EngineConfig::from_toml_str("[timing]\nrender_write_timeout_ms = 0").is_err());
    }

    #[test]
    fn test_stream_request_uses_fixed_format() {
        let request = EngineConfig::default().stream_request();
        assert_eq!(request.format, SampleFormat::PcmI16);
        assert_eq!(request.channel_count, 2);
        assert_eq!(request.sharing_mode, SharingMode::Shared);
        assert_eq!(request.capacity_bursts, 16);
    }
}
