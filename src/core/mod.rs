//! FFT, windowing, ring, and resampling primitives.

pub mod fft;
pub mod history;
pub mod resample;
pub mod ring;
pub mod window;

pub use fft::RealFft;
pub use history::HistoryRing;
pub use resample::{Quality, Resampler};
pub use ring::{sample_ring, RingReader, RingWriter};
pub use window::{Window, WindowCache};
