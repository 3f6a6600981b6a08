//! Stretch scheduling and phase-vocoder synthesis.

pub mod calculator;
pub mod vocoder;

pub use calculator::{Peak, StretchCalculator};
pub use vocoder::{ChannelVocoder, PhaseMode, PhasePolicy};
