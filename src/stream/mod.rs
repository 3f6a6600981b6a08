//! The stretch orchestrator and its per-channel plumbing.

pub mod channel;
pub mod options;
pub mod stretcher;
pub mod worker;

pub use options::{Mode, Options};
pub use stretcher::Stretcher;
