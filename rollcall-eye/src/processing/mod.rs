//! Detection post-processing

pub mod tracker;

pub use tracker::{ResultTracker, TrackedCode, TrackedCodes};
