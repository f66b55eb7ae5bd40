//! Tuning results
//!
//! **Purpose:** Record what a tuning run did so it can be logged, shown in the
//! engine status, and exported as JSON.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// How a tuning run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TuningOutcome {
    /// Xrun count stopped increasing at the final size
    Converged,
    /// Platform kept returning the same size; it will not grow further
    PlatformLimit,
    /// Every step up to the capacity still underran; left at the largest size
    CapacityReached,
    /// Stream was not started; nothing was touched
    NotStarted,
    /// A stream operation failed; buffer size restored
    Failed { reason: String },
}

impl TuningOutcome {
    /// Whether the run counts as a completed tune-up
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TuningOutcome::Converged | TuningOutcome::PlatformLimit | TuningOutcome::CapacityReached
        )
    }
}

/// One candidate buffer size tried during tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningProbe {
    /// Size passed to `set_buffer_size_in_frames`
    pub requested_frames: u32,
    /// Size the platform reported afterwards
    pub applied_frames: u32,
    /// Xrun counter after the silence write (None if the probe stopped earlier)
    pub xrun_count: Option<u32>,
}

/// Complete tuning run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningReport {
    pub outcome: TuningOutcome,
    /// Buffer size when tuning started
    pub original_size: u32,
    /// Buffer size when tuning finished
    pub final_size: u32,
    pub frames_per_burst: u32,
    pub capacity: u32,
    pub xruns_before: u32,
    pub xruns_after: u32,
    pub probes: Vec<TuningProbe>,
}

impl TuningReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_success()
    }

    /// Write the report as pretty-printed JSON
    pub fn export_json<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()
    }

    /// One-line summary for logs and CLI output
    pub fn summary(&self) -> String {
        format!(
            "{}: {} -> {} frames ({} probes, burst {}, capacity {}, xruns {} -> {})",
            match &self.outcome {
                TuningOutcome::Converged => "converged".to_string(),
                TuningOutcome::PlatformLimit => "platform limit".to_string(),
                TuningOutcome::CapacityReached => "capacity reached".to_string(),
                TuningOutcome::NotStarted => "stream not started".to_string(),
                TuningOutcome::Failed { reason } => format!("failed ({})", reason),
            },
            self.original_size,
            self.final_size,
            self.probes.len(),
            self.frames_per_burst,
            self.capacity,
            self.xruns_before,
            self.xruns_after
        )
    }
}
