//! Realtime mode: block-at-a-time processing, latency, mid-stream ratio
//! changes.

mod common;

use common::{drain_mono, sine};
use stretchkit::{Options, Stretcher};

/// Feeds `input` in fixed blocks, retrieving between calls; finishes with
/// an empty final block and drains.
fn run_realtime(stretcher: &mut Stretcher, input: &[f32], block: usize) -> Vec<f32> {
    let mut collected = Vec::new();
    let mut buf = vec![0.0f32; 8192];
    let mut pos = 0usize;
    while pos < input.len() {
        let n = block.min(input.len() - pos);
        stretcher.process(&[&input[pos..pos + n]], false).unwrap();
        pos += n;
        while let Some(avail) = stretcher.available() {
            if avail == 0 {
                break;
            }
            let got = stretcher.retrieve(&mut [&mut buf]);
            collected.extend_from_slice(&buf[..got]);
        }
    }
    stretcher.process(&[&input[..0]], true).unwrap();
    collected.extend(drain_mono(stretcher));
    collected
}

#[test]
fn half_speed_playback_halves_duration() {
    let sample_rate = 48000u32;
    let input = sine(440.0, sample_rate, 96000);

    let mut stretcher =
        Stretcher::new(sample_rate, 1, Options::PROCESS_REAL_TIME, 0.5, 1.0).unwrap();
    assert!(stretcher.latency() > 0);

    let output = run_realtime(&mut stretcher, &input, 1024);

    // Output tracks half the consumed input; the centring pre-fill adds a
    // little on top.
    let expected = input.len() / 2;
    let err = (output.len() as i64 - expected as i64).abs();
    assert!(
        err <= 2048,
        "output length {} too far from {}",
        output.len(),
        expected
    );
}

#[test]
fn latency_scales_with_pitch_scale() {
    let unshifted =
        Stretcher::new(48000, 1, Options::PROCESS_REAL_TIME, 1.0, 1.0).unwrap();
    // Same effective ratio (and so the same window) as the unshifted
    // stretcher, but the output passes through a 2x-downsampling stage.
    let octave =
        Stretcher::new(48000, 1, Options::PROCESS_REAL_TIME, 0.5, 2.0).unwrap();

    let l1 = unshifted.latency();
    let l2 = octave.latency();
    assert!(l1 > 0 && l2 > 0);
    // Half-window through the resampler: doubling the pitch scale halves
    // the reported latency (plus the fixed +1).
    assert!(
        (l2 as i64 - ((l1 - 1) / 2 + 1) as i64).abs() <= 1,
        "latency {} vs {}",
        l1,
        l2
    );
}

#[test]
fn ratio_change_mid_stream_keeps_streaming() {
    let sample_rate = 48000u32;
    let input = sine(440.0, sample_rate, 96000);

    let mut stretcher =
        Stretcher::new(sample_rate, 1, Options::PROCESS_REAL_TIME, 1.0, 1.0).unwrap();

    let mut collected = Vec::new();
    let mut buf = vec![0.0f32; 8192];
    let mut pos = 0usize;
    while pos < input.len() {
        if pos == 48128 {
            // 1.0 -> 1.5 mid-stream; the needed window sizes are cached.
            stretcher.set_time_ratio(1.5);
        }
        let n = 1024.min(input.len() - pos);
        stretcher.process(&[&input[pos..pos + n]], false).unwrap();
        pos += n;
        while let Some(avail) = stretcher.available() {
            if avail == 0 {
                break;
            }
            let got = stretcher.retrieve(&mut [&mut buf]);
            collected.extend_from_slice(&buf[..got]);
        }
    }
    stretcher.process(&[&input[..0]], true).unwrap();
    collected.extend(drain_mono(&mut stretcher));
    assert_eq!(stretcher.time_ratio(), 1.5);

    // First half at 1.0, second half at 1.5.
    let expected = 48128.0 + (96000.0 - 48128.0) * 1.5;
    let err = (collected.len() as f64 - expected).abs();
    assert!(
        err < expected * 0.05,
        "output length {} too far from {:.0}",
        collected.len(),
        expected
    );
}

#[test]
fn realtime_reports_recent_increments() {
    let sample_rate = 48000u32;
    let input = sine(440.0, sample_rate, 16384);

    let mut stretcher =
        Stretcher::new(sample_rate, 1, Options::PROCESS_REAL_TIME, 1.0, 1.0).unwrap();
    let mut pos = 0usize;
    let mut buf = vec![0.0f32; 8192];
    while pos < input.len() {
        let n = 1024.min(input.len() - pos);
        stretcher.process(&[&input[pos..pos + n]], false).unwrap();
        pos += n;
        while let Some(avail) = stretcher.available() {
            if avail == 0 {
                break;
            }
            stretcher.retrieve(&mut [&mut buf]);
        }
    }

    let increments = stretcher.output_increments();
    assert!(!increments.is_empty());
    assert!(increments.iter().all(|&i| i > 0));
    // Drained on read.
    assert!(stretcher.output_increments().is_empty());

    let df = stretcher.phase_reset_curve();
    assert!(!df.is_empty());
}

#[test]
fn study_is_a_no_op_in_realtime_mode() {
    let mut stretcher =
        Stretcher::new(48000, 1, Options::PROCESS_REAL_TIME, 1.0, 1.0).unwrap();
    let input = sine(440.0, 48000, 4096);
    // Permitted but meaningless; must not affect the mode machine.
    stretcher.study(&[&input], false).unwrap();
    stretcher.process(&[&input], false).unwrap();
}
