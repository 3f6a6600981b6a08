#![forbid(unsafe_code)]
//! Real-time capable audio time stretching and pitch shifting.
//!
//! `stretchkit` changes the duration and/or pitch of multi-channel PCM
//! audio while preserving its perceptual content, using a phase vocoder
//! steered by audio detection functions. Offline ("studied") use analyses
//! the whole input first so stretch lands in low-interest regions and
//! transients stay crisp; realtime use processes block by block under
//! strict latency and allocation constraints.
//!
//! # Offline
//!
//! ```no_run
//! use stretchkit::{Options, Stretcher};
//!
//! let input: Vec<f32> = (0..48000)
//!     .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48000.0).sin())
//!     .collect();
//!
//! // Twice as long, same pitch.
//! let mut stretcher = Stretcher::new(48000, 1, Options::NONE, 2.0, 1.0).unwrap();
//! stretcher.set_expected_input_duration(input.len());
//! stretcher.study(&[&input], true).unwrap();
//! stretcher.process(&[&input], true).unwrap();
//! ```
//!
//! Or use the one-shot helpers for planar mono input:
//!
//! ```no_run
//! let input = vec![0.0f32; 48000];
//! let doubled = stretchkit::stretch(&input, 48000, 2.0).unwrap();
//! let octave_up = stretchkit::pitch_shift(&input, 48000, 2.0).unwrap();
//! ```
//!
//! # Realtime
//!
//! Build with [`Options::PROCESS_REAL_TIME`], feed blocks of at most
//! [`Stretcher::samples_required`] frames, and retrieve between calls.
//! Ratios may change mid-stream; the window sizes a change can demand are
//! pre-cached so the steady-state path never allocates.

pub mod analysis;
pub mod core;
pub mod error;
pub mod stream;
pub mod stretch;

pub use error::StretchError;
pub use stream::{Mode, Options, Stretcher};

/// Retrieve-loop safety bound for the one-shot helpers.
const DRAIN_ROUNDS_MAX: usize = 1 << 20;

/// Stretches a mono signal to `time_ratio` times its duration.
///
/// Runs the full offline study/process protocol. For multi-channel or
/// incremental use, drive [`Stretcher`] directly.
///
/// # Errors
///
/// Returns [`StretchError::InvalidParameter`] for a non-positive ratio or
/// zero sample rate.
pub fn stretch(input: &[f32], sample_rate: u32, time_ratio: f64) -> Result<Vec<f32>, StretchError> {
    stretch_with_pitch(input, sample_rate, time_ratio, 1.0)
}

/// Shifts a mono signal's pitch by `pitch_scale` without changing its
/// duration; 2.0 raises by an octave.
///
/// # Errors
///
/// Returns [`StretchError::InvalidParameter`] for a non-positive scale or
/// zero sample rate.
pub fn pitch_shift(
    input: &[f32],
    sample_rate: u32,
    pitch_scale: f64,
) -> Result<Vec<f32>, StretchError> {
    stretch_with_pitch(input, sample_rate, 1.0, pitch_scale)
}

fn stretch_with_pitch(
    input: &[f32],
    sample_rate: u32,
    time_ratio: f64,
    pitch_scale: f64,
) -> Result<Vec<f32>, StretchError> {
    let mut stretcher = Stretcher::new(sample_rate, 1, Options::NONE, time_ratio, pitch_scale)?;
    if input.is_empty() {
        return Ok(Vec::new());
    }

    stretcher.set_expected_input_duration(input.len());
    stretcher.study(&[input], true)?;

    // Feed in paced blocks, retrieving between calls so the output rings
    // never have to hold the whole result.
    let mut output = Vec::with_capacity((input.len() as f64 * time_ratio) as usize);
    let mut buf = vec![0.0f32; 8192];
    let mut pos = 0usize;
    while pos < input.len() {
        let block = 4096.min(input.len() - pos);
        let is_final = pos + block == input.len();
        stretcher.process(&[&input[pos..pos + block]], is_final)?;
        pos += block;
        while let Some(n) = stretcher.available() {
            if n == 0 {
                break;
            }
            let got = stretcher.retrieve(&mut [&mut buf]);
            output.extend_from_slice(&buf[..got]);
        }
    }
    for _ in 0..DRAIN_ROUNDS_MAX {
        if stretcher.available().is_none() {
            break;
        }
        let got = stretcher.retrieve(&mut [&mut buf]);
        output.extend_from_slice(&buf[..got]);
    }
    Ok(output)
}
