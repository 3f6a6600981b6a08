//! Flow control: oversized inputs, pacing with samples_required, and the
//! diagnostic error when pacing is ignored.

mod common;

use common::{drain_mono, noise};
use stretchkit::{Options, Stretcher, StretchError};

#[test]
fn paced_feeding_consumes_everything_without_loss() {
    let sample_rate = 48000u32;
    // Ten times the default maximum process size.
    let input = noise(20480 * 10, 0x1234_5678);

    let mut stretcher = Stretcher::new(sample_rate, 1, Options::NONE, 1.5, 1.0).unwrap();
    stretcher.set_expected_input_duration(input.len());
    stretcher.study(&[&input], true).unwrap();

    let mut collected = Vec::new();
    let mut buf = vec![0.0f32; 8192];
    let mut pos = 0usize;
    while pos < input.len() {
        // Pace to what the stretcher asks for; it reports zero once the
        // rings are topped up, in which case drain before feeding more.
        let wanted = stretcher.samples_required().max(1024);
        let block = wanted.min(input.len() - pos);
        let is_final = pos + block == input.len();
        stretcher.process(&[&input[pos..pos + block]], is_final).unwrap();
        pos += block;

        while let Some(avail) = stretcher.available() {
            if avail == 0 {
                break;
            }
            let got = stretcher.retrieve(&mut [&mut buf]);
            collected.extend_from_slice(&buf[..got]);
        }
    }
    collected.extend(drain_mono(&mut stretcher));

    let expected = (input.len() as f64 * 1.5).round();
    let err = (collected.len() as f64 - expected).abs();
    assert!(
        err <= 1024.0,
        "output length {} too far from {:.0}",
        collected.len(),
        expected
    );
}

#[test]
fn unpaced_oversized_call_reports_backpressure() {
    let sample_rate = 48000u32;
    let input = noise(480_000, 0x0BAD_CAFE);

    let mut stretcher = Stretcher::new(sample_rate, 1, Options::NONE, 2.0, 1.0).unwrap();
    // No pacing, no retrieval: the rings must eventually stall and the
    // stretcher reports it instead of spinning.
    let result = stretcher.process(&[&input], true);
    assert!(
        matches!(result, Err(StretchError::Backpressure { .. })),
        "expected backpressure, got {:?}",
        result
    );
}

#[test]
fn samples_required_zero_once_rings_are_full() {
    let mut stretcher =
        Stretcher::new(48000, 1, Options::PROCESS_REAL_TIME, 1.0, 1.0).unwrap();
    let block = vec![0.2f32; 512];
    let mut buf = vec![0.0f32; 8192];

    for _ in 0..32 {
        if stretcher.samples_required() == 0 {
            break;
        }
        stretcher.process(&[&block], false).unwrap();
        while let Some(avail) = stretcher.available() {
            if avail == 0 {
                break;
            }
            stretcher.retrieve(&mut [&mut buf]);
        }
    }
    assert_eq!(stretcher.samples_required(), 0);
}
