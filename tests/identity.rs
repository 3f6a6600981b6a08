//! Identity processing: unit ratios should reproduce the input.

mod common;

use common::{best_correlation, rms, run_offline, sine};
use stretchkit::{Options, Stretcher};

#[test]
fn identity_preserves_a_sine() {
    let sample_rate = 48000u32;
    let input = sine(440.0, sample_rate, 48000);

    let mut stretcher = Stretcher::new(sample_rate, 1, Options::NONE, 1.0, 1.0).unwrap();
    stretcher.set_expected_input_duration(input.len());
    stretcher.study(&[&input], true).unwrap();
    let output = run_offline(&mut stretcher, &input);

    let len_err = (output.len() as i64 - input.len() as i64).abs();
    assert!(
        len_err <= 1024,
        "output length {} too far from {}",
        output.len(),
        input.len()
    );

    // Compare a settled span in the middle, allowing a small alignment
    // slack for chunk-boundary placement.
    let span = 24000;
    let corr = best_correlation(&output[8000..], &input[8000..], 512, span);
    assert!(corr >= 0.98, "peak correlation {} below 0.98", corr);

    let out_rms = rms(&output[4096..output.len() - 4096]);
    let in_rms = rms(&input);
    assert!(
        (out_rms - in_rms).abs() < in_rms * 0.2,
        "rms {} vs input {}",
        out_rms,
        in_rms
    );
}

#[test]
fn identity_is_deterministic() {
    let sample_rate = 48000u32;
    let input = sine(330.0, sample_rate, 24000);

    let run = || {
        let mut stretcher = Stretcher::new(sample_rate, 1, Options::NONE, 1.0, 1.0).unwrap();
        stretcher.study(&[&input], true).unwrap();
        run_offline(&mut stretcher, &input)
    };

    let first = run();
    let second = run();
    assert_eq!(first.len(), second.len());
    assert!(first
        .iter()
        .zip(second.iter())
        .all(|(a, b)| a.to_bits() == b.to_bits()));
}
