//! rollcall-eye: live code scanning pipeline
//!
//! Samples a video source, sends downscaled frames to a remote detection
//! service, tracks and smooths the returned code geometry across cycles,
//! renders positional overlays and turns recognized codes into
//! attendance counts.
//!
//! Everything runs as cooperative tasks on one async runtime. At most one
//! detection request is in flight at a time.

pub mod attendance;
pub mod camera;
pub mod capture;
pub mod client;
pub mod config;
pub mod debug_log;
pub mod error;
pub mod feedback;
pub mod overlay;
pub mod processing;
pub mod scheduler;
pub mod session;

pub use attendance::{AttendanceAggregator, SessionStats};
pub use camera::{FacingMode, ImageSequenceSource, StaticFrameSource, VideoSource};
pub use capture::{CaptureEncoder, CaptureFrame};
pub use client::{DetectionClient, Detector};
pub use config::ScannerConfig;
pub use error::ScanError;
pub use overlay::{OverlayFrame, OverlayRenderer};
pub use processing::{ResultTracker, TrackedCode, TrackedCodes};
pub use scheduler::{DetectionSnapshot, FrameScheduler, SchedulerStats};
pub use session::ScannerSession;
