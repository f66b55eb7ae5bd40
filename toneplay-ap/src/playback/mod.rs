//! Playback: shared engine state and the real-time render loop

pub mod render_loop;
pub mod state;

pub use render_loop::{RenderLoop, RenderSummary, ToneSettings, DEFAULT_RENDER_WRITE_TIMEOUT};
pub use state::EngineState;
