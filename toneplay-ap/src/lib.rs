//! # Toneplay Audio Player Library (toneplay-ap)
//!
//! Low-latency tone output engine.
//!
//! **Purpose:** Open a blocking-write playback stream, tune its buffer size to
//! the smallest value that stops underrunning, and stream a stereo sine tone
//! (or silence) from a dedicated render thread.
//!
//! **Architecture:** [`engine::Engine`] controller → [`playback::RenderLoop`] on
//! its own thread → [`stream::PlaybackStream`] (cpal device or simulated).

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod playback;
pub mod stream;
pub mod tuning;

pub use config::EngineConfig;
pub use engine::{Engine, EngineStatus};
pub use error::{Error, Result};
