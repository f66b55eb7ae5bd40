//! # Buffer Auto-Tuning Module
//!
//! Finds the smallest stream buffer size that stops producing underruns on the
//! current device and load.
//!
//! **Algorithm:** Smallest-size-first probing in burst-sized steps. At each
//! candidate size a full capacity of silence is written; the first size at
//! which the xrun counter stops increasing is kept. Any stream error rolls the
//! buffer size back to the value it had when tuning started.

pub mod report;
pub mod tuner;

pub use report::{TuningOutcome, TuningProbe, TuningReport};
pub use tuner::{tune_for_low_latency, BufferTuner, DEFAULT_TUNING_WRITE_TIMEOUT};
