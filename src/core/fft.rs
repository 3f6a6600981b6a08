//! Real-signal FFT wrapper shared by the study path and the synthesiser.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Zero-valued complex number, used for FFT buffer initialization.
pub const COMPLEX_ZERO: Complex<f32> = Complex::new(0.0, 0.0);

/// Forward/inverse FFT pair for a fixed size, with reusable scratch.
///
/// The plans are cached at construction so the per-chunk paths never touch
/// the planner. `num_bins` is `size/2 + 1`; only the non-negative
/// frequencies are reported, the mirror half is reconstructed on inverse.
pub struct RealFft {
    size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
}

impl RealFft {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            size,
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
            buffer: vec![COMPLEX_ZERO; size],
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn num_bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// Transforms a windowed time-domain frame and writes the magnitude
    /// spectrum into `mag` (`num_bins` entries).
    pub fn forward_magnitude(&mut self, time: &[f32], mag: &mut [f32]) {
        self.load(time);
        self.forward.process(&mut self.buffer);
        for (bin, m) in mag.iter_mut().enumerate().take(self.num_bins()) {
            *m = self.buffer[bin].norm();
        }
    }

    /// Transforms a windowed time-domain frame and writes magnitude and
    /// phase spectra (`num_bins` entries each).
    pub fn forward_polar(&mut self, time: &[f32], mag: &mut [f32], phase: &mut [f32]) {
        self.load(time);
        self.forward.process(&mut self.buffer);
        for bin in 0..self.num_bins() {
            let c = self.buffer[bin];
            mag[bin] = c.norm();
            phase[bin] = c.arg();
        }
    }

    /// Reconstructs a time-domain frame from magnitude and phase.
    ///
    /// The negative-frequency half is mirrored from the positive bins, so
    /// the result is real up to rounding; the real parts land in `time`,
    /// scaled by `1/size`.
    pub fn inverse_polar(&mut self, mag: &[f32], phase: &[f32], time: &mut [f32]) {
        let bins = self.num_bins();
        for bin in 0..bins {
            self.buffer[bin] = Complex::from_polar(mag[bin], phase[bin]);
        }
        for bin in 1..bins - 1 {
            self.buffer[self.size - bin] = self.buffer[bin].conj();
        }
        self.inverse.process(&mut self.buffer);
        let norm = 1.0 / self.size as f32;
        for (i, t) in time.iter_mut().enumerate().take(self.size) {
            *t = self.buffer[i].re * norm;
        }
    }

    #[inline]
    fn load(&mut self, time: &[f32]) {
        let len = time.len().min(self.size);
        for (i, &sample) in time.iter().enumerate().take(len) {
            self.buffer[i] = Complex::new(sample, 0.0);
        }
        for i in len..self.size {
            self.buffer[i] = COMPLEX_ZERO;
        }
    }
}

impl std::fmt::Debug for RealFft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealFft").field("size", &self.size).finish()
    }
}
