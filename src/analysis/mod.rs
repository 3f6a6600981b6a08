//! Audio detection functions used to steer the stretch schedule.

pub mod curves;

pub use curves::{ConstantCurve, DetectionCurve, HighFrequencyCurve, PercussiveCurve};
