//! # Toneplay Common Library
//!
//! Shared code for the toneplay workspace including:
//! - Common error type
//! - TOML configuration file resolution and loading
//! - Tracing subscriber initialisation

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
