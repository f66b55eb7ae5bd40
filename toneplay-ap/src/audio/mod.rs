//! Audio primitives: sample/stream types and the sine waveform source

pub mod sine;
pub mod types;

pub use sine::SineGenerator;
pub use types::{SampleFormat, SharingMode, StreamInfo, StreamState};
