//! Pitch shifting: duration held, fundamental moved.

mod common;

use common::{rms, run_offline, sine, zero_crossing_freq};
use stretchkit::{Options, Stretcher};

#[test]
fn octave_up_doubles_the_fundamental() {
    let sample_rate = 48000u32;
    let input = sine(440.0, sample_rate, 48000);

    let mut stretcher = Stretcher::new(sample_rate, 1, Options::NONE, 1.0, 2.0).unwrap();
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

    let settled = &output[4096..output.len() - 4096];
    let freq = zero_crossing_freq(settled, sample_rate);
    assert!(
        (freq - 880.0).abs() < 30.0,
        "detected fundamental {} Hz, expected ~880",
        freq
    );
    assert!(rms(settled) > 0.2, "output too quiet: rms {}", rms(settled));
}

#[test]
fn fifth_down_keeps_duration() {
    let sample_rate = 48000u32;
    let input = sine(660.0, sample_rate, 24000);

    let mut stretcher = Stretcher::new(sample_rate, 1, Options::NONE, 1.0, 2.0 / 3.0).unwrap();
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

    let settled = &output[4096..output.len() - 4096];
    let freq = zero_crossing_freq(settled, sample_rate);
    assert!(
        (freq - 440.0).abs() < 25.0,
        "detected fundamental {} Hz, expected ~440",
        freq
    );
}

#[test]
fn one_shot_helper_matches_stretcher_protocol() {
    let input = sine(440.0, 48000, 24000);
    let output = stretchkit::pitch_shift(&input, 48000, 2.0).unwrap();
    let len_err = (output.len() as i64 - input.len() as i64).abs();
    assert!(len_err <= 1024, "length drifted by {}", len_err);
}
