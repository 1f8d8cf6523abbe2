//! rollcall-core: shared data model for the rollcall scanner
//!
//! Geometry and detection types exchanged between the capture pipeline,
//! the tracker and the overlay renderer.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{BoundingRect, DetectedCode, Point, DEFAULT_CODE_KIND};
