//! Remote detection service client

use crate::capture::CaptureFrame;
use crate::config::ScannerConfig;
use crate::debug_log::DebugLog;
use crate::error::ScanError;
use async_trait::async_trait;
use rollcall_core::{BoundingRect, DetectedCode, Point, DEFAULT_CODE_KIND};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Anything that turns one encoded frame into a list of detected codes
#[async_trait]
pub trait Detector: Send + Sync {
    /// Single round-trip; never retries
    async fn detect(&self, frame: &CaptureFrame) -> Result<Vec<DetectedCode>, ScanError>;

    /// Identifies the detector in logs
    fn name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct ScanRequest<'a> {
    image: &'a str,
}

/// Point as either `[x, y]` or `{"x": .., "y": ..}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WirePoint {
    Pair([f32; 2]),
    Object { x: f32, y: f32 },
}

impl From<WirePoint> for Point {
    fn from(p: WirePoint) -> Self {
        match p {
            WirePoint::Pair([x, y]) => Point::new(x, y),
            WirePoint::Object { x, y } => Point::new(x, y),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireRect {
    #[serde(alias = "x")]
    left: f32,
    #[serde(alias = "y")]
    top: f32,
    #[serde(default)]
    width: f32,
    #[serde(default)]
    height: f32,
}

#[derive(Debug, Deserialize)]
struct WireCode {
    #[serde(alias = "payload")]
    data: String,
    #[serde(rename = "type", alias = "kind", default)]
    kind: Option<String>,
    #[serde(default)]
    polygon: Option<Vec<WirePoint>>,
    #[serde(default, alias = "position")]
    rect: Option<WireRect>,
}

/// Side of the square given to codes reported only by their top-left corner
pub const POSITION_MARKER_SIZE: f32 = 24.0;

impl WireCode {
    fn into_code(self) -> Result<DetectedCode, ScanError> {
        let kind = self.kind.filter(|k| !k.is_empty()).unwrap_or_else(|| DEFAULT_CODE_KIND.to_string());
        let rect = self
            .rect
            .map(|r| {
                if r.width <= 0.0 && r.height <= 0.0 {
                    BoundingRect::new(r.left, r.top, POSITION_MARKER_SIZE, POSITION_MARKER_SIZE)
                } else {
                    BoundingRect::new(r.left, r.top, r.width, r.height)
                }
            })
            .filter(|r| r.is_finite() && r.width > 0.0 && r.height > 0.0);

        let polygon: Option<Vec<Point>> = self
            .polygon
            .map(|points| points.into_iter().map(Point::from).collect::<Vec<_>>())
            .filter(|points| points.len() >= 3);

        let code = match (polygon, rect) {
            (Some(polygon), Some(rect)) => DetectedCode::new(self.data, kind, polygon, rect),
            (Some(polygon), None) => DetectedCode::from_polygon(self.data, kind, polygon),
            (None, Some(rect)) => DetectedCode::new(self.data, kind, rect.corners().to_vec(), rect),
            (None, None) => {
                return Err(ScanError::Protocol(format!(
                    "code {:?} has neither a polygon nor a usable rect",
                    self.data
                )))
            }
        };
        code.map_err(|e| ScanError::Protocol(e.to_string()))
    }
}

/// Parse a detection response body.
///
/// A body that is not a JSON array is a [`ScanError::Protocol`]. Elements
/// that cannot be turned into a code are logged and skipped so the rest of
/// the batch still counts.
pub fn parse_detections(body: &[u8]) -> Result<Vec<DetectedCode>, ScanError> {
    let elements: Vec<serde_json::Value> = serde_json::from_slice(body)?;
    let mut codes = Vec::with_capacity(elements.len());
    for (index, element) in elements.into_iter().enumerate() {
        let parsed = serde_json::from_value::<WireCode>(element)
            .map_err(ScanError::from)
            .and_then(WireCode::into_code);
        match parsed {
            Ok(code) => codes.push(code),
            Err(e) => warn!("Skipping detection {}: {}", index, e),
        }
    }
    Ok(codes)
}

/// HTTP client for the `/scan` endpoint.
///
/// Network failures, non-success statuses and malformed bodies surface as
/// [`ScanError::Network`], [`ScanError::Service`] and [`ScanError::Protocol`].
pub struct DetectionClient {
    http: reqwest::Client,
    endpoint: String,
    debug_log: Option<DebugLog>,
}

impl DetectionClient {
    pub fn new(config: &ScannerConfig) -> Result<Self, ScanError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ScanError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: config.scan_endpoint(),
            debug_log: None,
        })
    }

    /// Also record each request and response status in `debug_log`
    pub fn with_debug_log(mut self, debug_log: DebugLog) -> Self {
        self.debug_log = Some(debug_log);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn note(&self, message: String) {
        match &self.debug_log {
            Some(log) => log.push(message),
            None => debug!("{}", message),
        }
    }
}

#[async_trait]
impl Detector for DetectionClient {
    async fn detect(&self, frame: &CaptureFrame) -> Result<Vec<DetectedCode>, ScanError> {
        let image = frame.to_data_url();
        self.note(format!("Attempting to fetch: {}", self.endpoint));
        let response = self
            .http
            .post(&self.endpoint)
            .json(&ScanRequest { image: &image })
            .send()
            .await?;

        let status = response.status();
        self.note(format!("Response status: {}", status.as_u16()));
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ScanError::Service {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        let body = response.bytes().await?;
        let codes = parse_detections(&body)?;
        debug!("Detection service returned {} codes", codes.len());
        Ok(codes)
    }

    fn name(&self) -> &str {
        &self.endpoint
    }
}
