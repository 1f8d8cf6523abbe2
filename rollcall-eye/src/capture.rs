//! Frame capture and JPEG encoding

use crate::camera::VideoSource;
use crate::config::CaptureConfig;
use crate::error::ScanError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, RgbImage};
use rollcall_core::DetectedCode;
use tracing::debug;

/// One encoded frame, alive for the duration of a single detection request
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    /// JPEG bytes at the target resolution
    pub jpeg: Bytes,
    /// Native video width at capture time
    pub native_width: u32,
    /// Native video height at capture time
    pub native_height: u32,
    /// Encoded width
    pub width: u32,
    /// Encoded height
    pub height: u32,
}

impl CaptureFrame {
    /// `data:image/jpeg;base64,...` string carried in the request body
    pub fn to_data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", STANDARD.encode(&self.jpeg))
    }

    /// Per-axis factors mapping encoded pixels back to native pixels
    pub fn native_scale(&self) -> (f32, f32) {
        (
            self.native_width as f32 / self.width as f32,
            self.native_height as f32 / self.height as f32,
        )
    }

    /// Map codes detected in the encoded frame into native video coordinates
    pub fn to_native(&self, codes: Vec<DetectedCode>) -> Vec<DetectedCode> {
        let (sx, sy) = self.native_scale();
        if (sx - 1.0).abs() < f32::EPSILON && (sy - 1.0).abs() < f32::EPSILON {
            return codes;
        }
        codes.iter().map(|code| code.scaled(sx, sy)).collect()
    }
}

/// Downscales live frames to a fixed resolution and compresses them.
///
/// Frames are stretched to fill the target box; the native aspect ratio is
/// not preserved. Detections are mapped back per axis by
/// [`CaptureFrame::to_native`], which undoes the stretch exactly.
#[derive(Debug, Clone)]
pub struct CaptureEncoder {
    target_width: u32,
    target_height: u32,
    quality: u8,
}

impl CaptureEncoder {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            target_width: config.target_width.max(1),
            target_height: config.target_height.max(1),
            quality: config.jpeg_quality.clamp(1, 100),
        }
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Grab and encode the source's current frame.
    ///
    /// Returns [`ScanError::CapturePending`] until the source has produced a
    /// frame with nonzero dimensions.
    pub fn capture(&self, source: &mut dyn VideoSource) -> Result<CaptureFrame, ScanError> {
        let frame = source.current_frame().ok_or(ScanError::CapturePending)?;
        self.encode(&frame)
    }

    /// Resize and encode an already grabbed frame
    pub fn encode(&self, frame: &RgbImage) -> Result<CaptureFrame, ScanError> {
        let (native_width, native_height) = frame.dimensions();
        if native_width == 0 || native_height == 0 {
            return Err(ScanError::CapturePending);
        }

        let resized;
        let pixels = if (native_width, native_height) == (self.target_width, self.target_height) {
            frame
        } else {
            resized = imageops::resize(frame, self.target_width, self.target_height, FilterType::Triangle);
            &resized
        };

        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, self.quality).encode(
            pixels.as_raw(),
            self.target_width,
            self.target_height,
            ColorType::Rgb8,
        )?;

        debug!(
            "Encoded {}x{} frame to {}x{} JPEG ({} bytes)",
            native_width,
            native_height,
            self.target_width,
            self.target_height,
            buffer.len()
        );

        Ok(CaptureFrame {
            jpeg: Bytes::from(buffer),
            native_width,
            native_height,
            width: self.target_width,
            height: self.target_height,
        })
    }
}
