//! Shared signal generators and measurement helpers for integration tests.
#![allow(dead_code)]

use std::f32::consts::PI;

/// Generates a sine wave at `freq` Hz.
pub fn sine(freq: f32, sample_rate: u32, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
        .collect()
}

/// Deterministic white-ish noise in [-1, 1] from an xorshift generator.
pub fn noise(num_samples: usize, mut seed: u32) -> Vec<f32> {
    (0..num_samples)
        .map(|_| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            (seed as f32 / u32::MAX as f32) * 2.0 - 1.0
        })
        .collect()
}

/// Silence with short decaying clicks every `period` samples.
pub fn click_train(num_samples: usize, period: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; num_samples];
    let mut pos = period / 2;
    while pos < num_samples {
        for (k, sample) in out[pos..num_samples.min(pos + 64)].iter_mut().enumerate() {
            *sample = 0.9 * (-(k as f32) / 12.0).exp();
        }
        pos += period;
    }
    out
}

/// Feeds a studied stretcher the whole input in paced blocks, retrieving
/// between calls, and returns the collected mono output.
pub fn run_offline(stretcher: &mut stretchkit::Stretcher, input: &[f32]) -> Vec<f32> {
    let mut collected = Vec::new();
    let mut buf = vec![0.0f32; 8192];
    let mut pos = 0usize;
    while pos < input.len() {
        let block = 2048.min(input.len() - pos);
        let is_final = pos + block == input.len();
        stretcher
            .process(&[&input[pos..pos + block]], is_final)
            .unwrap();
        pos += block;
        while let Some(n) = stretcher.available() {
            if n == 0 {
                break;
            }
            let got = stretcher.retrieve(&mut [&mut buf]);
            collected.extend_from_slice(&buf[..got]);
            if got == 0 {
                break;
            }
        }
    }
    collected.extend(drain_mono(stretcher));
    collected
}

/// Drains a stretcher to completion, collecting mono output.
pub fn drain_mono(stretcher: &mut stretchkit::Stretcher) -> Vec<f32> {
    let mut collected = Vec::new();
    let mut buf = vec![0.0f32; 8192];
    for _ in 0..100_000 {
        if stretcher.available().is_none() {
            return collected;
        }
        let got = stretcher.retrieve(&mut [&mut buf]);
        collected.extend_from_slice(&buf[..got]);
    }
    panic!("stream failed to drain");
}

/// Root-mean-square level.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|x| x * x).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Estimates the dominant frequency from mean zero-crossing spacing.
pub fn zero_crossing_freq(samples: &[f32], sample_rate: u32) -> f32 {
    let mut crossings = 0usize;
    for pair in samples.windows(2) {
        if (pair[0] >= 0.0) != (pair[1] >= 0.0) {
            crossings += 1;
        }
    }
    if samples.len() < 2 {
        return 0.0;
    }
    crossings as f32 * sample_rate as f32 / (2.0 * samples.len() as f32)
}

/// Peak normalised cross-correlation between `a` and `b` over lags in
/// `[-max_lag, max_lag]`, using `len` samples.
pub fn best_correlation(a: &[f32], b: &[f32], max_lag: usize, len: usize) -> f32 {
    let mut best = -1.0f32;
    for lag in 0..=(2 * max_lag) {
        let (a_off, b_off) = if lag <= max_lag {
            (max_lag - lag, 0)
        } else {
            (0, lag - max_lag)
        };
        if a_off + len > a.len() || b_off + len > b.len() {
            continue;
        }
        let xs = &a[a_off..a_off + len];
        let ys = &b[b_off..b_off + len];
        let dot: f64 = xs.iter().zip(ys).map(|(&x, &y)| x as f64 * y as f64).sum();
        let ex: f64 = xs.iter().map(|&x| (x as f64) * (x as f64)).sum();
        let ey: f64 = ys.iter().map(|&y| (y as f64) * (y as f64)).sum();
        if ex <= 0.0 || ey <= 0.0 {
            continue;
        }
        let corr = (dot / (ex.sqrt() * ey.sqrt())) as f32;
        best = best.max(corr);
    }
    best
}

/// Mean energy per band over `bands` equal log-spaced bands between 100 Hz
/// and Nyquist, computed with short FFT frames.
pub fn band_energies(samples: &[f32], sample_rate: u32, bands: usize) -> Vec<f64> {
    use rustfft::{num_complex::Complex, FftPlanner};

    let fft_size = 2048;
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(fft_size);
    let hop = fft_size / 2;
    let bins = fft_size / 2 + 1;

    let mut spectrum_sum = vec![0.0f64; bins];
    let mut frames = 0usize;
    let mut pos = 0usize;
    let mut buffer = vec![Complex::new(0.0f32, 0.0); fft_size];
    while pos + fft_size <= samples.len() {
        for (i, slot) in buffer.iter_mut().enumerate() {
            let w = 0.5 - 0.5 * (2.0 * PI * i as f32 / fft_size as f32).cos();
            *slot = Complex::new(samples[pos + i] * w, 0.0);
        }
        fft.process(&mut buffer);
        for (i, slot) in spectrum_sum.iter_mut().enumerate().take(bins) {
            *slot += buffer[i].norm_sqr() as f64;
        }
        frames += 1;
        pos += hop;
    }
    assert!(frames > 0, "input too short for band analysis");

    let nyquist = sample_rate as f64 / 2.0;
    let lo = 100.0f64;
    let mut energies = vec![0.0f64; bands];
    for (bin, &e) in spectrum_sum.iter().enumerate() {
        let freq = bin as f64 * sample_rate as f64 / fft_size as f64;
        if freq < lo || freq >= nyquist {
            continue;
        }
        let band = (((freq / lo).ln() / (nyquist / lo).ln()) * bands as f64) as usize;
        energies[band.min(bands - 1)] += e;
    }
    for e in &mut energies {
        *e /= frames as f64;
    }
    energies
}
