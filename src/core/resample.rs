//! Streaming single-channel sample-rate conversion.
//!
//! The stretcher undoes its pitch-scale factor by resampling each channel's
//! synthesis output block by block, so unlike a whole-signal converter this
//! one carries interpolation history and a fractional read position across
//! calls; block boundaries are seamless.

/// Quality hint for the resampler.
///
/// Both settings currently use 4-point Hermite interpolation; the hint is
/// carried so call sites state their intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    FastestTolerable,
    Best,
}

/// Number of history samples carried between blocks. Hermite needs one tap
/// before and two after the read index; four keeps the index in range
/// after the carry subtraction.
const HISTORY: usize = 4;

/// Stateful single-channel resampler.
#[derive(Debug)]
pub struct Resampler {
    quality: Quality,
    work: Vec<f32>,
    history: [f32; HISTORY],
    /// Read position in `work` coordinates for the next output sample.
    pos: f64,
}

impl Resampler {
    /// `max_block` sizes the internal scratch; larger blocks still work but
    /// may reallocate once.
    pub fn new(quality: Quality, max_block: usize) -> Self {
        Self {
            quality,
            work: Vec::with_capacity(max_block + HISTORY),
            history: [0.0; HISTORY],
            pos: HISTORY as f64,
        }
    }

    #[inline]
    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// Resamples `input` by `ratio` (output samples per input sample),
    /// appending to `out`. Returns the number of samples appended.
    pub fn process(&mut self, input: &[f32], ratio: f64, out: &mut Vec<f32>) -> usize {
        if input.is_empty() || ratio <= 0.0 {
            return 0;
        }

        self.work.clear();
        self.work.extend_from_slice(&self.history);
        self.work.extend_from_slice(input);

        let step = 1.0 / ratio;
        let len = self.work.len();
        let before = out.len();

        loop {
            let idx = self.pos as usize;
            if idx + 2 >= len {
                break;
            }
            let frac = (self.pos - idx as f64) as f32;
            let s0 = self.work[idx - 1];
            let s1 = self.work[idx];
            let s2 = self.work[idx + 1];
            let s3 = self.work[idx + 2];
            out.push(hermite(s0, s1, s2, s3, frac));
            self.pos += step;
        }

        // Carry the tail as history for the next block.
        self.history.copy_from_slice(&self.work[len - HISTORY..]);
        self.pos -= (len - HISTORY) as f64;

        out.len() - before
    }

    /// Clears history; the next block starts from silence.
    pub fn reset(&mut self) {
        self.history = [0.0; HISTORY];
        self.pos = HISTORY as f64;
    }
}

/// 4-point Hermite interpolation at `frac` between `s1` and `s2`.
#[inline]
fn hermite(s0: f32, s1: f32, s2: f32, s3: f32, frac: f32) -> f32 {
    let c0 = s1;
    let c1 = 0.5 * (s2 - s0);
    let c2 = s0 - 2.5 * s1 + 2.0 * s2 - 0.5 * s3;
    let c3 = 0.5 * (s3 - s0) + 1.5 * (s1 - s2);
    ((c3 * frac + c2) * frac + c1) * frac + c0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn unit_ratio_passes_samples_through() {
        let mut rs = Resampler::new(Quality::FastestTolerable, 64);
        let input: Vec<f32> = (0..64).map(|i| i as f32).collect();
        let mut out = Vec::new();
        rs.process(&input, 1.0, &mut out);

        // At ratio 1 the read positions are integral and Hermite collapses
        // to the centre tap, so samples pass through exactly.
        assert!(!out.is_empty());
        for (i, &v) in out.iter().enumerate() {
            assert!(
                (v - input[i]).abs() < 1e-5,
                "sample {}: {} vs {}",
                i,
                v,
                input[i]
            );
        }
    }

    #[test]
    fn long_run_length_tracks_ratio() {
        let ratio = 1.0 / 1.5; // pitch scale 1.5 undone at output
        let mut rs = Resampler::new(Quality::FastestTolerable, 512);
        let mut out = Vec::new();
        let mut fed = 0usize;

        // Odd-sized blocks so carries are exercised.
        let mut phase = 0.0f32;
        for block_len in [317usize, 401, 123, 489].iter().cycle().take(120) {
            let block: Vec<f32> = (0..*block_len)
                .map(|_| {
                    phase += 2.0 * PI * 440.0 / 48000.0;
                    phase.sin()
                })
                .collect();
            fed += block.len();
            rs.process(&block, ratio, &mut out);
        }

        let expected = fed as f64 * ratio;
        let err = (out.len() as f64 - expected).abs();
        assert!(
            err <= 8.0,
            "length drift: got {}, expected {:.1}",
            out.len(),
            expected
        );
    }

    #[test]
    fn block_boundaries_are_smooth() {
        // A sine fed in two halves must not produce a discontinuity larger
        // than the intrinsic sample-to-sample step.
        let input: Vec<f32> = (0..2000)
            .map(|i| (2.0 * PI * 200.0 * i as f32 / 48000.0).sin())
            .collect();
        let mut rs = Resampler::new(Quality::FastestTolerable, 2000);
        let mut out = Vec::new();
        rs.process(&input[..1000], 2.0, &mut out);
        let split = out.len();
        rs.process(&input[1000..], 2.0, &mut out);

        let max_step = 2.0 * PI * 200.0 / 48000.0; // upper bound on |dx/dn| at ratio 2
        let jump = (out[split] - out[split - 1]).abs();
        assert!(
            jump < max_step * 4.0,
            "discontinuity {} at block boundary",
            jump
        );
    }

    #[test]
    fn reset_clears_history() {
        let mut rs = Resampler::new(Quality::Best, 32);
        let mut out = Vec::new();
        rs.process(&[1.0; 32], 1.0, &mut out);
        rs.reset();
        out.clear();
        rs.process(&[0.0; 32], 1.0, &mut out);
        // After reset, no residue of the previous all-ones block.
        assert!(out.iter().all(|&v| v.abs() < 1e-6));
    }
}
