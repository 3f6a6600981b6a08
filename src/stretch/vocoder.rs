//! Per-channel phase-vocoder synthesis.
//!
//! Each channel owns one of these. For every analysis chunk the stretcher
//! hands over the magnitude/phase spectra, the scheduled output increment
//! and the transient decision; the vocoder advances its synthesis phases,
//! inverse-transforms, overlap-adds, and emits exactly the scheduled
//! number of samples.

use crate::core::fft::RealFft;
use crate::core::window::Window;

const TWO_PI: f64 = 2.0 * std::f64::consts::PI;
/// Minimum magnitude for a bin to count as a spectral peak.
const MIN_PEAK_MAGNITUDE: f32 = 1e-8;
/// Window-sum floor as a fraction of the block maximum, against
/// amplification in low-overlap regions.
const WINDOW_SUM_FLOOR_RATIO: f32 = 0.1;
/// Absolute window-sum floor against division by zero.
const WINDOW_SUM_EPSILON: f32 = 1e-6;

/// How synthesis phases are coupled across bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseMode {
    /// Peak locking between the mid and high cutoff bins only.
    Adaptive,
    /// Peak locking everywhere above the rigid band.
    PeakLocked,
    /// Every bin advances independently.
    Independent,
}

/// Phase-coupling policy resolved from the option bits and the frequency
/// cutoffs, in bin units for the current window size.
#[derive(Debug, Clone, Copy)]
pub struct PhasePolicy {
    pub mode: PhaseMode,
    /// Bins below this index always advance by instantaneous frequency.
    pub rigid_bin: usize,
    /// Lower bound of the locking band in `Adaptive` mode.
    pub lock_lo_bin: usize,
    /// Upper bound of the locking band in `Adaptive` mode.
    pub lock_hi_bin: usize,
}

/// Phase-vocoder synthesis state for one channel.
pub struct ChannelVocoder {
    window_size: usize,
    increment: usize,
    /// Previous chunk's analysis phases.
    prev_phase: Vec<f64>,
    /// Synthesis phase accumulators (f64 against drift over long signals).
    phase_accum: Vec<f64>,
    /// f32 copy of the accumulators handed to the inverse transform.
    synth_phase: Vec<f32>,
    /// Overlap-add accumulator, `window_size` samples.
    accumulator: Vec<f32>,
    /// Matching window-product accumulator for normalisation.
    window_accum: Vec<f32>,
    /// Inverse-FFT scratch.
    time_scratch: Vec<f32>,
    /// Reusable peak-bin list.
    peaks: Vec<usize>,
    /// Next chunk seeds phases directly from analysis.
    pending_reset: bool,
}

impl ChannelVocoder {
    pub fn new(window_size: usize, increment: usize) -> Self {
        let num_bins = window_size / 2 + 1;
        Self {
            window_size,
            increment: increment.max(1),
            prev_phase: vec![0.0; num_bins],
            phase_accum: vec![0.0; num_bins],
            synth_phase: vec![0.0; num_bins],
            accumulator: vec![0.0; window_size],
            window_accum: vec![0.0; window_size],
            time_scratch: vec![0.0; window_size],
            peaks: Vec::with_capacity(num_bins / 4),
            pending_reset: true,
        }
    }

    #[inline]
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Switches to a new analysis window size.
    ///
    /// Phase continuity cannot survive a bin-count change; the next chunk
    /// behaves as a phase reset.
    pub fn set_window_size(&mut self, window_size: usize) {
        let num_bins = window_size / 2 + 1;
        self.window_size = window_size;
        self.prev_phase.resize(num_bins, 0.0);
        self.phase_accum.resize(num_bins, 0.0);
        self.synth_phase.resize(num_bins, 0.0);
        self.accumulator.resize(window_size, 0.0);
        self.window_accum.resize(window_size, 0.0);
        self.time_scratch.resize(window_size, 0.0);
        self.reset();
    }

    pub fn set_increment(&mut self, increment: usize) {
        self.increment = increment.max(1);
    }

    /// Clears all synthesis state.
    pub fn reset(&mut self) {
        self.prev_phase.fill(0.0);
        self.phase_accum.fill(0.0);
        self.accumulator.fill(0.0);
        self.window_accum.fill(0.0);
        self.pending_reset = true;
    }

    /// Synthesises one chunk and appends `output_increment` samples to
    /// `out`. Returns the number of samples emitted.
    #[allow(clippy::too_many_arguments)]
    pub fn synthesise_chunk(
        &mut self,
        mag: &[f32],
        phase: &[f32],
        output_increment: usize,
        phase_reset: bool,
        policy: PhasePolicy,
        fft: &mut RealFft,
        window: &Window,
        out: &mut Vec<f32>,
    ) -> usize {
        let num_bins = self.window_size / 2 + 1;
        debug_assert_eq!(mag.len(), num_bins);

        self.advance_phases(mag, phase, output_increment, phase_reset, policy);

        for bin in 0..num_bins {
            self.synth_phase[bin] = self.phase_accum[bin] as f32;
        }
        fft.inverse_polar(mag, &self.synth_phase, &mut self.time_scratch);

        // Overlap-add with the synthesis window; the analysis window was
        // applied before the forward transform, so the normaliser tracks
        // the window product.
        let w = window.samples();
        for i in 0..self.window_size {
            self.accumulator[i] += self.time_scratch[i] * w[i];
            self.window_accum[i] += w[i] * w[i];
        }

        let emit = output_increment.min(self.window_size);
        let max_ws = self.window_accum[..emit.max(1)]
            .iter()
            .copied()
            .fold(0.0f32, f32::max);
        let floor = (max_ws * WINDOW_SUM_FLOOR_RATIO).max(WINDOW_SUM_EPSILON);
        for i in 0..emit {
            out.push(self.accumulator[i] / self.window_accum[i].max(floor));
        }
        // A scheduled increment beyond the window (never produced by the
        // sizing rules) pads with silence so the schedule sum still holds.
        for _ in emit..output_increment {
            out.push(0.0);
        }

        self.accumulator.copy_within(emit.., 0);
        self.accumulator[self.window_size - emit..].fill(0.0);
        self.window_accum.copy_within(emit.., 0);
        self.window_accum[self.window_size - emit..].fill(0.0);

        output_increment
    }

    fn advance_phases(
        &mut self,
        mag: &[f32],
        phase: &[f32],
        output_increment: usize,
        phase_reset: bool,
        policy: PhasePolicy,
    ) {
        let num_bins = self.window_size / 2 + 1;

        if phase_reset || self.pending_reset {
            for bin in 0..num_bins {
                self.phase_accum[bin] = phase[bin] as f64;
                self.prev_phase[bin] = phase[bin] as f64;
            }
            self.pending_reset = false;
            return;
        }

        let hop_ratio = output_increment as f64 / self.increment as f64;
        for bin in 0..num_bins {
            let expected = TWO_PI * bin as f64 * self.increment as f64 / self.window_size as f64;
            let deviation = wrap_phase(phase[bin] as f64 - self.prev_phase[bin] - expected);
            self.phase_accum[bin] += (expected + deviation) * hop_ratio;
            self.prev_phase[bin] = phase[bin] as f64;
        }

        match policy.mode {
            PhaseMode::Independent => {}
            PhaseMode::PeakLocked => {
                self.lock_to_peaks(mag, phase, policy.rigid_bin, policy.rigid_bin, num_bins);
            }
            PhaseMode::Adaptive => {
                self.lock_to_peaks(
                    mag,
                    phase,
                    policy.rigid_bin,
                    policy.lock_lo_bin,
                    policy.lock_hi_bin.min(num_bins),
                );
            }
        }
    }

    /// Locks non-peak bins in `[lo, hi)` to the nearest magnitude peak,
    /// preserving each bin's analysis-phase offset from that peak.
    fn lock_to_peaks(&mut self, mag: &[f32], phase: &[f32], rigid_bin: usize, lo: usize, hi: usize) {
        let num_bins = mag.len();
        self.peaks.clear();
        let start = rigid_bin.max(1);
        if num_bins < 3 || start + 1 >= num_bins {
            return;
        }
        for bin in start..num_bins - 1 {
            if mag[bin] > MIN_PEAK_MAGNITUDE
                && mag[bin] > mag[bin - 1]
                && mag[bin] > mag[bin + 1]
            {
                self.peaks.push(bin);
            }
        }
        if self.peaks.is_empty() {
            return;
        }

        for bin in lo.max(start)..hi {
            if self.peaks.binary_search(&bin).is_ok() {
                continue;
            }
            let nearest = match self.peaks.binary_search(&bin) {
                Ok(_) => continue,
                Err(idx) => {
                    let lower = idx.checked_sub(1).map(|i| self.peaks[i]);
                    let upper = self.peaks.get(idx).copied();
                    match (lower, upper) {
                        (Some(l), Some(u)) => {
                            if bin - l <= u - bin {
                                l
                            } else {
                                u
                            }
                        }
                        (Some(l), None) => l,
                        (None, Some(u)) => u,
                        (None, None) => continue,
                    }
                }
            };
            let offset = phase[bin] as f64 - phase[nearest] as f64;
            self.phase_accum[bin] = self.phase_accum[nearest] + offset;
        }
    }
}

impl std::fmt::Debug for ChannelVocoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelVocoder")
            .field("window_size", &self.window_size)
            .field("increment", &self.increment)
            .field("pending_reset", &self.pending_reset)
            .finish()
    }
}

/// Wraps a phase value to [-PI, PI].
#[inline]
fn wrap_phase(phase: f64) -> f64 {
    let pi = std::f64::consts::PI;
    let p = phase + pi;
    p - (p / TWO_PI).floor() * TWO_PI - pi
}
