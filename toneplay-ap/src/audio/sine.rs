//! Sine waveform source
//!
//! Stateful oscillator producing one sample per call. Phase advances by
//! `2π · frequency / sample_rate` per sample and wraps at 2π, so the sequence
//! is infinite; calling [`SineGenerator::setup`] restarts it from phase 0.

use std::f64::consts::TAU;

/// Sine wave generator
#[derive(Debug, Clone, Default)]
pub struct SineGenerator {
    /// Current phase in radians, always in `[0, 2π)`
    phase: f64,

    /// Phase increment per sample (frequency / sample_rate * 2π)
    phase_increment: f64,

    /// Peak amplitude relative to full scale (0.0-1.0)
    amplitude: f64,
}

impl SineGenerator {
    /// Create a generator already configured via [`setup`](Self::setup)
    pub fn new(frequency_hz: f64, sample_rate: u32, amplitude: f64) -> Self {
        let mut generator = Self::default();
        generator.setup(frequency_hz, sample_rate, amplitude);
        generator
    }

    /// (Re)configure the oscillator and reset its phase
    pub fn setup(&mut self, frequency_hz: f64, sample_rate: u32, amplitude: f64) {
        self.phase = 0.0;
        self.phase_increment = if sample_rate > 0 {
            frequency_hz * TAU / sample_rate as f64
        } else {
            0.0
        };
        self.amplitude = amplitude;
    }

    /// Current phase in radians
    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Produce the next sample in `[-amplitude, amplitude]`
    pub fn next_sample(&mut self) -> f64 {
        let sample = self.phase.sin() * self.amplitude;
        self.advance_phase();
        sample
    }

    /// Render `frame_count` frames into `buffer` as 16-bit PCM
    ///
    /// One sample is written every `stride` samples starting at `buffer[0]`,
    /// which lets two generators share an interleaved stereo buffer by passing
    /// `&mut buffer[1..]` to the second one. Frames that do not fit in the
    /// buffer are skipped.
    pub fn render(&mut self, buffer: &mut [i16], stride: usize, frame_count: usize) {
        let stride = stride.max(1);
        for slot in buffer.iter_mut().step_by(stride).take(frame_count) {
            *slot = (self.next_sample() * i16::MAX as f64) as i16;
        }
    }

    fn advance_phase(&mut self) {
        self.phase += self.phase_increment;
        if self.phase >= TAU {
            self.phase -= TAU;
        }
    }
}
