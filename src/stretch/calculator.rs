//! Converts detection-function curves and a target ratio into per-chunk
//! output increments.
//!
//! Offline, the whole pair of curves is available and `calculate` produces
//! the complete schedule: hard transients become fixed, unstretched chunks
//! and the remaining output budget is apportioned between them inversely
//! to the stretch curve. In realtime mode `calculate_single` makes the
//! same decision one chunk at a time with running statistics.
//!
//! Increments are signed: a negative value marks a chunk classified as a
//! hard transient, telling the synthesiser to reset phase there; its
//! magnitude is the number of samples to emit.

use log::debug;

/// Minimum spacing between hard transients, in seconds.
const MIN_PEAK_GAP_SECS: f64 = 0.05;
/// Threshold scale over the median absolute deviation for peak picking.
const PEAK_THRESHOLD_MADS: f32 = 2.0;
/// EMA coefficient for the realtime detection-function statistics.
const RT_EMA_ALPHA: f32 = 0.1;
/// Sigma multiplier for the realtime transient threshold.
const RT_THRESHOLD_SIGMA: f32 = 2.5;
/// Required jump versus the previous chunk's value to trigger in realtime.
const RT_SPIKE_RATIO: f32 = 1.6;
/// Absolute floor suppressing near-silence triggers in realtime.
const RT_ABS_MIN: f32 = 1e-4;
/// Chunks to observe before realtime trigger checks begin.
const RT_WARMUP_CHUNKS: usize = 3;

/// A chunk the calculator classified as a hard transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peak {
    /// Index of the analysis chunk.
    pub chunk: usize,
}

#[derive(Debug)]
pub struct StretchCalculator {
    sample_rate: u32,
    increment: usize,
    use_hard_peaks: bool,
    debug_level: i32,
    last_peaks: Vec<Peak>,

    // Realtime state.
    df_mean: f32,
    df_dev: f32,
    df_count: usize,
    prev_df: f32,
    chunks_since_peak: usize,
    ideal_out: f64,
    actual_out: i64,
}

impl StretchCalculator {
    pub fn new(sample_rate: u32, increment: usize, use_hard_peaks: bool) -> Self {
        Self {
            sample_rate,
            increment: increment.max(1),
            use_hard_peaks,
            debug_level: 0,
            last_peaks: Vec::new(),
            df_mean: 0.0,
            df_dev: 0.0,
            df_count: 0,
            prev_df: 0.0,
            chunks_since_peak: 0,
            ideal_out: 0.0,
            actual_out: 0,
        }
    }

    pub fn set_use_hard_peaks(&mut self, use_hard_peaks: bool) {
        self.use_hard_peaks = use_hard_peaks;
    }

    pub fn set_debug_level(&mut self, level: i32) {
        self.debug_level = level;
    }

    /// Transient chunks identified by the most recent `calculate` call.
    pub fn get_last_calculated_peaks(&self) -> &[Peak] {
        &self.last_peaks
    }

    /// Forgets realtime statistics and the last peak list.
    pub fn reset(&mut self) {
        self.last_peaks.clear();
        self.df_mean = 0.0;
        self.df_dev = 0.0;
        self.df_count = 0;
        self.prev_df = 0.0;
        self.chunks_since_peak = 0;
        self.ideal_out = 0.0;
        self.actual_out = 0;
    }

    fn min_peak_gap_chunks(&self) -> usize {
        ((self.sample_rate as f64 * MIN_PEAK_GAP_SECS / self.increment as f64) as usize).max(1)
    }

    /// Builds the full offline schedule: one signed increment per chunk.
    ///
    /// The magnitudes sum exactly to `round(input_duration * ratio)`.
    pub fn calculate(
        &mut self,
        ratio: f64,
        input_duration: usize,
        phase_reset_df: &[f32],
        stretch_df: &[f32],
    ) -> Vec<i32> {
        let n = phase_reset_df.len();
        if n == 0 {
            self.last_peaks.clear();
            return Vec::new();
        }

        let total_out = (input_duration as f64 * ratio).round().max(0.0) as i64;

        self.last_peaks = if self.use_hard_peaks {
            self.pick_peaks(phase_reset_df)
        } else {
            Vec::new()
        };

        if self.debug_level > 0 {
            debug!(
                "calculate: {} chunks, duration {} -> target {} ({} peaks)",
                n,
                input_duration,
                total_out,
                self.last_peaks.len()
            );
        }

        // Region boundaries: chunk 0, each peak chunk, chunk n. The output
        // position of each boundary is pinned proportionally so transients
        // land where the ratio says they should.
        let mut boundaries: Vec<usize> = Vec::with_capacity(self.last_peaks.len() + 2);
        boundaries.push(0);
        for p in &self.last_peaks {
            if p.chunk > 0 && p.chunk < n {
                boundaries.push(p.chunk);
            }
        }
        boundaries.push(n);
        boundaries.dedup();

        let out_pos = |b: usize| -> i64 {
            if b >= n {
                total_out
            } else {
                ((b * self.increment) as f64 * ratio).round().min(total_out as f64) as i64
            }
        };

        let cap = ((self.increment as f64 * ratio * 2.0).ceil() as i64).max(1);
        let peak_set: Vec<usize> = self.last_peaks.iter().map(|p| p.chunk).collect();

        let mut schedule = vec![0i64; n];
        for pair in boundaries.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            let mut target = out_pos(end) - out_pos(start);
            if target < 0 {
                target = 0;
            }

            // A region opening on a hard transient emits that chunk at the
            // plain input increment so the onset is not smeared.
            let mut dist_start = start;
            if peak_set.binary_search(&start).is_ok() {
                let peak_out = (self.increment as i64).min(target);
                schedule[start] = peak_out;
                target -= peak_out;
                dist_start = start + 1;
            }

            if dist_start >= end {
                // Region was a lone peak chunk; give it whatever is left.
                schedule[start] += target;
                continue;
            }

            apportion(
                &mut schedule[dist_start..end],
                target,
                &stretch_df[dist_start..end],
                cap,
            );
        }

        // Mark transient chunks by sign.
        let mut out = Vec::with_capacity(n);
        for (chunk, &inc) in schedule.iter().enumerate() {
            let inc = inc.clamp(0, i32::MAX as i64) as i32;
            if peak_set.binary_search(&chunk).is_ok() {
                out.push(-inc);
            } else {
                out.push(inc);
            }
        }
        out
    }

    /// Adaptive-threshold peak picking over the phase-reset curve.
    fn pick_peaks(&self, df: &[f32]) -> Vec<Peak> {
        if df.len() < 3 {
            return Vec::new();
        }

        let mut sorted = df.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = sorted[sorted.len() / 2];
        let mad: f32 = df.iter().map(|&x| (x - median).abs()).sum::<f32>() / df.len() as f32;
        let threshold = median + mad * PEAK_THRESHOLD_MADS;

        let min_gap = self.min_peak_gap_chunks();
        let mut peaks = Vec::new();
        let mut last: Option<usize> = None;

        for i in 0..df.len() {
            if df[i] <= threshold || df[i] <= RT_ABS_MIN {
                continue;
            }
            let is_max = (i == 0 || df[i] >= df[i - 1])
                && (i == df.len() - 1 || df[i] >= df[i + 1]);
            if !is_max {
                continue;
            }
            if let Some(l) = last {
                if i - l < min_gap {
                    continue;
                }
            }
            peaks.push(Peak { chunk: i });
            last = Some(i);
        }
        peaks
    }

    /// Realtime one-chunk decision.
    ///
    /// Returns the signed output increment for this chunk: negative when
    /// the chunk is classified as a hard transient. An error-feedback
    /// accumulator keeps the emitted total tracking `ratio` without drift.
    pub fn calculate_single(&mut self, ratio: f64, df: f32) -> i32 {
        self.df_mean += RT_EMA_ALPHA * (df - self.df_mean);
        self.df_dev += RT_EMA_ALPHA * ((df - self.df_mean).abs() - self.df_dev);

        let transient = self.use_hard_peaks
            && self.df_count >= RT_WARMUP_CHUNKS
            && df > RT_ABS_MIN
            && df > self.df_mean + RT_THRESHOLD_SIGMA * self.df_dev
            && df > self.prev_df * RT_SPIKE_RATIO
            && self.chunks_since_peak >= self.min_peak_gap_chunks();

        self.ideal_out += self.increment as f64 * ratio;

        let cap = ((self.increment as f64 * ratio * 2.0).ceil() as i64).max(1);
        let out = if transient {
            (self.increment as i64).min(cap)
        } else {
            ((self.ideal_out - self.actual_out as f64).round() as i64).clamp(1, cap)
        };

        self.actual_out += out;
        self.prev_df = df;
        self.df_count += 1;
        if transient {
            self.chunks_since_peak = 0;
        } else {
            self.chunks_since_peak += 1;
        }

        if transient {
            -(out as i32)
        } else {
            out as i32
        }
    }
}

/// Distributes `target` over `out` with weights inverse to `stretch_df`,
/// capped per chunk, using largest-remainder rounding so the sum is exact.
fn apportion(out: &mut [i64], target: i64, stretch_df: &[f32], cap: i64) {
    let m = out.len();
    if m == 0 || target <= 0 {
        return;
    }

    let weights: Vec<f64> = stretch_df
        .iter()
        .map(|&df| 1.0 / (df.max(0.0) as f64 + 1e-3))
        .collect();
    let sum_w: f64 = weights.iter().sum();

    let mut fractions: Vec<(usize, f64)> = Vec::with_capacity(m);
    let mut assigned = 0i64;
    for i in 0..m {
        let ideal = if sum_w > 0.0 {
            target as f64 * weights[i] / sum_w
        } else {
            target as f64 / m as f64
        };
        let capped = ideal.min(cap as f64);
        let floor = capped.floor() as i64;
        out[i] = floor;
        assigned += floor;
        fractions.push((i, capped - floor as f64));
    }

    // Hand out the remainder to the largest fractional parts first.
    let mut remainder = target - assigned;
    fractions.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut idx = 0usize;
    while remainder > 0 {
        let i = fractions[idx % m].0;
        // Respect the cap on the first pass; once every chunk is capped the
        // remainder must land somewhere, so the cap yields.
        if out[i] < cap || idx >= m {
            out[i] += 1;
            remainder -= 1;
        }
        idx += 1;
    }
}
