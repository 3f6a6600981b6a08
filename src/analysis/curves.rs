//! Detection-function curves driven by successive magnitude spectra.
//!
//! The study pass (and the realtime chunk loop) feeds each analysis
//! chunk's magnitude spectrum through two of these: the phase-reset curve
//! marks percussive onsets where the synthesiser should reset phase, and
//! the stretch curve marks regions that can absorb stretching.

/// A stateful per-chunk detection function.
pub trait DetectionCurve {
    /// Maps one magnitude spectrum (`window_size/2 + 1` bins) and the input
    /// hop to a scalar detection-function value.
    fn process(&mut self, mag: &[f32], increment: usize) -> f32;

    /// Forgets all history.
    fn reset(&mut self);

    /// Resizes internal state for a new analysis window.
    fn set_window_size(&mut self, window_size: usize);
}

/// Magnitude rise ratio treated as a percussive onset: +3 dB.
const PERCUSSIVE_ONSET_RATIO: f32 = 1.4125;

/// Fraction-of-bins-rising curve, high at percussive onsets.
///
/// Counts the bins whose magnitude rose by more than 3 dB since the
/// previous chunk and reports the fraction, so the output is in [0, 1]
/// regardless of window size or level.
#[derive(Debug)]
pub struct PercussiveCurve {
    prev_mag: Vec<f32>,
    seen_first: bool,
}

impl PercussiveCurve {
    pub fn new(window_size: usize) -> Self {
        Self {
            prev_mag: vec![0.0; window_size / 2 + 1],
            seen_first: false,
        }
    }
}

impl DetectionCurve for PercussiveCurve {
    fn process(&mut self, mag: &[f32], _increment: usize) -> f32 {
        let bins = mag.len().min(self.prev_mag.len());
        let mut rising = 0usize;

        if self.seen_first {
            for bin in 0..bins {
                let prev = self.prev_mag[bin];
                if mag[bin] > prev.max(1e-9) * PERCUSSIVE_ONSET_RATIO && mag[bin] > 1e-6 {
                    rising += 1;
                }
            }
        }

        self.prev_mag[..bins].copy_from_slice(&mag[..bins]);
        self.seen_first = true;

        if bins == 0 {
            0.0
        } else {
            rising as f32 / bins as f32
        }
    }

    fn reset(&mut self) {
        self.prev_mag.fill(0.0);
        self.seen_first = false;
    }

    fn set_window_size(&mut self, window_size: usize) {
        self.prev_mag.resize(window_size / 2 + 1, 0.0);
        self.reset();
    }
}

/// Bin-index weighted magnitude sum, higher for brighter spectra.
///
/// Tonal material with substantial high-frequency content scores high and
/// is a poor place to stretch; the calculator places stretch where this
/// curve is low.
#[derive(Debug)]
pub struct HighFrequencyCurve {
    window_size: usize,
}

impl HighFrequencyCurve {
    pub fn new(window_size: usize) -> Self {
        Self { window_size }
    }
}

impl DetectionCurve for HighFrequencyCurve {
    fn process(&mut self, mag: &[f32], _increment: usize) -> f32 {
        let mut sum = 0.0f64;
        for (bin, &m) in mag.iter().enumerate() {
            sum += m as f64 * bin as f64;
        }
        (sum / self.window_size as f64) as f32
    }

    fn reset(&mut self) {}

    fn set_window_size(&mut self, window_size: usize) {
        self.window_size = window_size;
    }
}

/// Flat curve: every chunk scores 1, so stretch distributes uniformly.
#[derive(Debug, Default)]
pub struct ConstantCurve;

impl ConstantCurve {
    pub fn new() -> Self {
        Self
    }
}

impl DetectionCurve for ConstantCurve {
    fn process(&mut self, _mag: &[f32], _increment: usize) -> f32 {
        1.0
    }

    fn reset(&mut self) {}

    fn set_window_size(&mut self, _window_size: usize) {}
}
