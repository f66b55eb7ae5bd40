//! Error types for toneplay-ap
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for toneplay-ap module
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors surfaced by the shared toneplay-common crate
    #[error(transparent)]
    Common(#[from] toneplay_common::Error),

    /// Audio platform is not available on this system
    #[error("Audio platform unsupported: {0}")]
    Unsupported(String),

    /// Platform rejected the requested stream configuration
    #[error("Failed to open stream: {0}")]
    StreamOpen(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Stream write failed or timed out without progress
    #[error("Stream write failed: {0}")]
    Write(String),

    /// Invalid argument passed to a stream operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Render thread or device thread errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using toneplay-ap Error
pub type Result<T> = std::result::Result<T, Error>;
