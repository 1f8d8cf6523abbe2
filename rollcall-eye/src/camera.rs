//! Video sources feeding the capture pipeline

use crate::error::ScanError;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Which physical camera a source is capturing from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    /// Rear camera
    Environment,
    /// Front camera
    User,
}

impl FacingMode {
    pub fn toggled(self) -> FacingMode {
        match self {
            FacingMode::Environment => FacingMode::User,
            FacingMode::User => FacingMode::Environment,
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FacingMode::Environment => write!(f, "back"),
            FacingMode::User => write!(f, "front"),
        }
    }
}

/// A live video stream owned by the host environment
pub trait VideoSource: Send {
    /// Native pixel dimensions of the latest frame, `(0, 0)` before the
    /// first frame arrives
    fn dimensions(&self) -> (u32, u32);

    /// Current frame pixels, `None` while the stream is not ready
    fn current_frame(&mut self) -> Option<RgbImage>;

    fn facing(&self) -> FacingMode;

    /// Switch between front and back capture
    fn set_facing(&mut self, facing: FacingMode) -> Result<(), ScanError>;
}

/// In-memory source holding one frame that can be replaced at any time.
///
/// Starts without a frame, the same as a camera that is still warming up.
#[derive(Debug, Clone)]
pub struct StaticFrameSource {
    frame: Option<RgbImage>,
    facing: FacingMode,
}

impl StaticFrameSource {
    pub fn empty() -> Self {
        Self {
            frame: None,
            facing: FacingMode::Environment,
        }
    }

    pub fn with_frame(frame: RgbImage) -> Self {
        Self {
            frame: Some(frame),
            facing: FacingMode::Environment,
        }
    }

    pub fn set_frame(&mut self, frame: Option<RgbImage>) {
        self.frame = frame;
    }
}

impl VideoSource for StaticFrameSource {
    fn dimensions(&self) -> (u32, u32) {
        self.frame.as_ref().map(|f| f.dimensions()).unwrap_or((0, 0))
    }

    fn current_frame(&mut self) -> Option<RgbImage> {
        self.frame.clone()
    }

    fn facing(&self) -> FacingMode {
        self.facing
    }

    fn set_facing(&mut self, facing: FacingMode) -> Result<(), ScanError> {
        self.facing = facing;
        Ok(())
    }
}

const SEQUENCE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Plays back still images from a directory in file-name order, looping.
///
/// A second directory may be registered for the front-facing camera.
pub struct ImageSequenceSource {
    back: Vec<PathBuf>,
    front: Option<Vec<PathBuf>>,
    facing: FacingMode,
    cursor: usize,
    dimensions: (u32, u32),
}

impl ImageSequenceSource {
    /// Open a back-facing sequence
    pub fn open(dir: &Path) -> Result<Self, ScanError> {
        let back = list_frames(dir)?;
        info!("Opened image sequence {} ({} frames)", dir.display(), back.len());
        Ok(Self {
            back,
            front: None,
            facing: FacingMode::Environment,
            cursor: 0,
            dimensions: (0, 0),
        })
    }

    /// Register a front-facing sequence
    pub fn with_front(mut self, dir: &Path) -> Result<Self, ScanError> {
        self.front = Some(list_frames(dir)?);
        Ok(self)
    }

    pub fn frame_count(&self) -> usize {
        self.active().len()
    }

    fn active(&self) -> &[PathBuf] {
        match (self.facing, &self.front) {
            (FacingMode::User, Some(front)) => front,
            _ => &self.back,
        }
    }
}

impl VideoSource for ImageSequenceSource {
    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn current_frame(&mut self) -> Option<RgbImage> {
        let frames = self.active();
        if frames.is_empty() {
            return None;
        }
        let path = frames[self.cursor % frames.len()].clone();
        self.cursor = self.cursor.wrapping_add(1);

        match image::open(&path) {
            Ok(img) => {
                let rgb = img.to_rgb8();
                self.dimensions = rgb.dimensions();
                Some(rgb)
            }
            Err(e) => {
                warn!("Failed to decode frame {}: {}", path.display(), e);
                None
            }
        }
    }

    fn facing(&self) -> FacingMode {
        self.facing
    }

    fn set_facing(&mut self, facing: FacingMode) -> Result<(), ScanError> {
        if facing == FacingMode::User && self.front.is_none() {
            return Err(ScanError::Camera("No front-facing camera available".to_string()));
        }
        debug!("Switching image sequence to {} camera", facing);
        self.facing = facing;
        self.cursor = 0;
        self.dimensions = (0, 0);
        Ok(())
    }
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
    if !dir.is_dir() {
        return Err(ScanError::Camera(format!("Not a directory: {}", dir.display())));
    }
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| SEQUENCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    frames.sort();
    if frames.is_empty() {
        return Err(ScanError::Camera(format!("No frames found in {}", dir.display())));
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facing_toggle() {
        assert_eq!(FacingMode::Environment.toggled(), FacingMode::User);
        assert_eq!(FacingMode::User.toggled(), FacingMode::Environment);
        assert_eq!(FacingMode::Environment.to_string(), "back");
    }

    #[test]
    fn test_static_source_not_ready() {
        let mut source = StaticFrameSource::empty();
        assert_eq!(source.dimensions(), (0, 0));
        assert!(source.current_frame().is_none());
    }

    #[test]
    fn test_static_source_frame() {
        let mut source = StaticFrameSource::with_frame(RgbImage::new(32, 24));
        assert_eq!(source.dimensions(), (32, 24));
        assert!(source.current_frame().is_some());
        source.set_frame(None);
        assert_eq!(source.dimensions(), (0, 0));
    }

    #[test]
    fn test_image_sequence_cycles() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(8, 6).save(dir.path().join("a.png")).unwrap();
        RgbImage::new(4, 4).save(dir.path().join("b.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        assert_eq!(source.frame_count(), 2);
        assert_eq!(source.dimensions(), (0, 0));
        assert_eq!(source.current_frame().unwrap().dimensions(), (8, 6));
        assert_eq!(source.dimensions(), (8, 6));
        assert_eq!(source.current_frame().unwrap().dimensions(), (4, 4));
        assert_eq!(source.current_frame().unwrap().dimensions(), (8, 6));
    }

    #[test]
    fn test_image_sequence_without_front() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(2, 2).save(dir.path().join("a.png")).unwrap();
        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        assert!(matches!(source.set_facing(FacingMode::User), Err(ScanError::Camera(_))));
        assert_eq!(source.facing(), FacingMode::Environment);
    }

    #[test]
    fn test_image_sequence_switches_to_front() {
        let back = tempfile::tempdir().unwrap();
        let front = tempfile::tempdir().unwrap();
        RgbImage::new(2, 2).save(back.path().join("a.png")).unwrap();
        RgbImage::new(3, 3).save(front.path().join("a.png")).unwrap();
        let mut source = ImageSequenceSource::open(back.path()).unwrap().with_front(front.path()).unwrap();
        source.set_facing(FacingMode::User).unwrap();
        assert_eq!(source.current_frame().unwrap().dimensions(), (3, 3));
    }

    #[test]
    fn test_empty_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageSequenceSource::open(dir.path()).is_err());
    }
}
