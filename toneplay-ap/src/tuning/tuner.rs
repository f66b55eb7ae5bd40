//! Low-latency buffer size search
//!
//! **Algorithm:**
//! 1. Remember the current buffer size for rollback
//! 2. Start at one burst; for each candidate size:
//!    - apply it and read back what the platform actually set
//!    - stop (complete) if the platform would not grow the buffer further
//!    - write a full capacity of silence
//!    - stop (complete) if the xrun counter did not increase
//!    - otherwise grow by one burst
//! 3. On any stream error restore the remembered size and report failure
//!
//! Running past the capacity without converging is still a completed
//! tune-up: the stream is left at the largest size tried.

use crate::audio::StreamState;
use crate::stream::PlaybackStream;
use crate::tuning::report::{TuningOutcome, TuningProbe, TuningReport};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Timeout for each full-capacity silence write
pub const DEFAULT_TUNING_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Buffer size tuner for a started playback stream
#[derive(Debug, Clone)]
pub struct BufferTuner {
    write_timeout: Duration,
}

impl Default for BufferTuner {
    fn default() -> Self {
        Self {
            write_timeout: DEFAULT_TUNING_WRITE_TIMEOUT,
        }
    }
}

impl BufferTuner {
    pub fn new(write_timeout: Duration) -> Self {
        Self { write_timeout }
    }

    /// Run one tuning session against `stream`
    ///
    /// The stream must already be started. If it is not, the report says so
    /// and the stream has not been modified.
    pub fn run(&self, stream: &mut dyn PlaybackStream) -> TuningReport {
        let step = stream.frames_per_burst();
        let capacity = stream.buffer_capacity_in_frames();
        let original_size = stream.buffer_size_in_frames();
        let xruns_before = stream.xrun_count();

        let mut report = TuningReport {
            outcome: TuningOutcome::CapacityReached,
            original_size,
            final_size: original_size,
            frames_per_burst: step,
            capacity,
            xruns_before,
            xruns_after: xruns_before,
            probes: Vec::new(),
        };

        let state = stream.state();
        if state != StreamState::Started {
            error!("Stream is {} when tuning, expected started", state);
            report.outcome = TuningOutcome::NotStarted;
            return report;
        }

        debug!(
            "Tuning buffer: burst={}, capacity={}, original={}, xruns={}",
            step, capacity, original_size, xruns_before
        );

        let failure = if step == 0 {
            Some("stream reports zero frames per burst".to_string())
        } else {
            self.probe_sizes(stream, step, capacity, &mut report)
        };

        if let Some(reason) = failure {
            warn!("Buffer tuning failed: {}, restoring {} frames", reason, original_size);
            if let Err(e) = stream.set_buffer_size_in_frames(original_size) {
                error!("Failed to restore buffer size {}: {}", original_size, e);
            }
            report.outcome = TuningOutcome::Failed { reason };
        }

        report.final_size = stream.buffer_size_in_frames();
        report.xruns_after = stream.xrun_count();
        info!("Buffer tuning {}", report.summary());
        report
    }

    /// Probe loop; returns the failure reason if a stream operation failed
    fn probe_sizes(
        &self,
        stream: &mut dyn PlaybackStream,
        step: u32,
        capacity: u32,
        report: &mut TuningReport,
    ) -> Option<String> {
        let samples_per_frame = stream.samples_per_frame() as usize;
        let silence = vec![0i16; capacity as usize * samples_per_frame];

        let mut candidate = step;
        let mut prev_accepted = 0;
        let mut prev_xruns = report.xruns_before;

        while candidate <= capacity {
            let mut probe = TuningProbe {
                requested_frames: candidate,
                applied_frames: 0,
                xrun_count: None,
            };

            match stream.set_buffer_size_in_frames(candidate) {
                Ok(applied) if applied > 0 => {}
                Ok(_) => {
                    report.probes.push(probe);
                    return Some(format!("buffer size {} rejected", candidate));
                }
                Err(e) => {
                    report.probes.push(probe);
                    return Some(format!("buffer size {} rejected: {}", candidate, e));
                }
            }

            // Set-get-compare: the platform may already be at its limit
            let applied = stream.buffer_size_in_frames();
            probe.applied_frames = applied;
            if applied == prev_accepted {
                report.probes.push(probe);
                report.outcome = TuningOutcome::PlatformLimit;
                return None;
            }
            prev_accepted = applied;

            if let Err(e) = stream.write(&silence, capacity as usize, self.write_timeout) {
                report.probes.push(probe);
                return Some(format!("silence write failed: {}", e));
            }

            let xruns = stream.xrun_count();
            probe.xrun_count = Some(xruns);
            report.probes.push(probe);
            debug!("Probe {} frames: xruns {} -> {}", applied, prev_xruns, xruns);

            if xruns <= prev_xruns {
                report.outcome = TuningOutcome::Converged;
                return None;
            }
            prev_xruns = xruns;
            candidate = applied + step;
        }

        report.outcome = TuningOutcome::CapacityReached;
        None
    }
}

/// Tune `stream` for low latency with default settings
///
/// Returns true when tuning completed and false when the stream was not
/// started or a stream error forced a rollback to the original size.
pub fn tune_for_low_latency(stream: &mut dyn PlaybackStream) -> bool {
    BufferTuner::default().run(stream).succeeded()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{SimConfig, SimHandle, SimulatedStream, StreamCall, StreamRequest};

    const BURST: u32 = 192;

    fn started(config: SimConfig) -> (SimulatedStream, SimHandle) {
        let mut stream = SimulatedStream::open(config, &StreamRequest::new(2));
        stream.request_start().unwrap();
        let handle = stream.handle();
        (stream, handle)
    }

    #[test]
    fn test_converges_at_underrun_free_size() {
        let (mut stream, handle) = started(SimConfig {
            underrun_free_size: Some(3 * BURST),
            ..SimConfig::default()
        });

        let report = BufferTuner::default().run(&mut stream);

        assert_eq!(report.outcome, TuningOutcome::Converged);
        assert_eq!(report.final_size, 3 * BURST);
        assert_eq!(handle.buffer_size(), 3 * BURST);
        assert_eq!(report.probes.len(), 3);
        assert_eq!(report.xruns_after, 2);
    }

    #[test]
    fn test_no_underruns_keeps_single_burst() {
        let (mut stream, _) = started(SimConfig::default());
        assert!(tune_for_low_latency(&mut stream));
        assert_eq!(stream.buffer_size_in_frames(), BURST);
    }

    #[test]
    fn test_zero_length_writes_do_not_fail_tuning() {
        let (mut stream, handle) = started(SimConfig {
            zero_length_writes: true,
            ..SimConfig::default()
        });

        assert!(tune_for_low_latency(&mut stream));
        assert_eq!(handle.buffer_size(), BURST);
    }

    #[test]
    fn test_zero_size_result_is_rejection() {
        let (mut stream, handle) = started(SimConfig {
            zero_buffer_size_result: true,
            ..SimConfig::default()
        });
        let original = stream.buffer_size_in_frames();

        let report = BufferTuner::default().run(&mut stream);

        assert!(!report.succeeded());
        assert!(matches!(report.outcome, TuningOutcome::Failed { .. }));
        assert_eq!(report.final_size, original);
        assert_eq!(handle.buffer_size(), original);
        assert_eq!(
            handle.calls().last(),
            Some(&StreamCall::SetBufferSize(original))
        );
        assert!(!handle
            .calls()
            .iter()
            .any(|c| matches!(c, StreamCall::Write(_))));
    }

    #[test]
    fn test_platform_refusing_to_grow_completes() {
        let (mut stream, _) = started(SimConfig {
            underrun_free_size: Some(1000),
            max_buffer_size: Some(400),
            ..SimConfig::default()
        });

        let report = BufferTuner::default().run(&mut stream);

        assert_eq!(report.outcome, TuningOutcome::PlatformLimit);
        assert!(report.succeeded());
        assert_eq!(report.final_size, 400);
        let applied: Vec<u32> = report.probes.iter().map(|p| p.applied_frames).collect();
        assert_eq!(applied, vec![192, 384, 400, 400]);
    }

    #[test]
    fn test_capacity_exhausted_is_success() {
        let capacity = 8 * BURST;
        let (mut stream, _) = started(SimConfig {
            capacity_frames: Some(capacity),
            underrun_free_size: Some(capacity + 1),
            ..SimConfig::default()
        });

        let report = BufferTuner::default().run(&mut stream);

        assert_eq!(report.outcome, TuningOutcome::CapacityReached);
        assert!(report.succeeded());
        assert_eq!(report.final_size, capacity);
        assert_eq!(report.probes.len(), 8);
    }

    #[test]
    fn test_rejected_sizes_restore_original() {
        let (mut stream, handle) = started(SimConfig {
            initial_buffer_size: Some(1000),
            reject_buffer_size: true,
            ..SimConfig::default()
        });

        assert!(!tune_for_low_latency(&mut stream));
        assert_eq!(stream.buffer_size_in_frames(), 1000);

        // One probe, then the rollback attempt
        let sets: Vec<StreamCall> = handle
            .calls()
            .into_iter()
            .filter(|c| matches!(c, StreamCall::SetBufferSize(_)))
            .collect();
        assert_eq!(
            sets,
            vec![StreamCall::SetBufferSize(BURST), StreamCall::SetBufferSize(1000)]
        );
    }

    #[test]
    fn test_write_failure_restores_original() {
        let (mut stream, _) = started(SimConfig {
            initial_buffer_size: Some(1200),
            underrun_free_size: Some(10 * BURST),
            fail_write_after: Some(1),
            ..SimConfig::default()
        });

        let report = BufferTuner::default().run(&mut stream);

        assert!(matches!(report.outcome, TuningOutcome::Failed { .. }));
        assert_eq!(report.final_size, 1200);
        assert_eq!(report.probes.len(), 2);
        assert_eq!(report.probes[1].xrun_count, None);
    }

    #[test]
    fn test_not_started_leaves_stream_untouched() {
        let mut stream = SimulatedStream::open(SimConfig::default(), &StreamRequest::new(2));
        let handle = stream.handle();
        let before = stream.buffer_size_in_frames();

        let report = BufferTuner::default().run(&mut stream);

        assert_eq!(report.outcome, TuningOutcome::NotStarted);
        assert!(!report.succeeded());
        assert!(handle.calls().is_empty());
        assert_eq!(stream.buffer_size_in_frames(), before);
    }

    #[test]
    fn test_silence_write_covers_capacity() {
        let (mut stream, handle) = started(SimConfig {
            capture_limit: 1,
            ..SimConfig::default()
        });
        let capacity = stream.buffer_capacity_in_frames();

        BufferTuner::default().run(&mut stream);

        assert!(handle.calls().contains(&StreamCall::Write(capacity as usize)));
        let captured = handle.captured_writes();
        assert_eq!(captured[0].len(), capacity as usize * 2);
        assert!(captured[0].iter().all(|&s| s == 0));
    }
}
