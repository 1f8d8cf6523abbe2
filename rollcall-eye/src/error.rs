//! Error types for rollcall-eye

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    /// Video source has not produced a frame with nonzero dimensions yet
    #[error("Capture pending: video not ready")]
    CapturePending,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Service error: HTTP {status}: {message}")]
    Service { status: u16, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl ScanError {
    /// True for conditions that are part of normal operation and must not
    /// be reported as failures
    pub fn is_expected(&self) -> bool {
        matches!(self, ScanError::CapturePending)
    }

    /// True for the per-cycle failures the scheduler recovers from on the
    /// next tick
    pub fn is_cycle_failure(&self) -> bool {
        matches!(
            self,
            ScanError::CapturePending
                | ScanError::Network(_)
                | ScanError::Service { .. }
                | ScanError::Protocol(_)
        )
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ScanError::Protocol(err.to_string())
        } else {
            ScanError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        ScanError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::Service { status: 503, message: "unavailable".to_string() };
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("unavailable"));
    }

    #[test]
    fn test_capture_pending_is_expected() {
        assert!(ScanError::CapturePending.is_expected());
        assert!(!ScanError::Network("down".to_string()).is_expected());
        assert!(!ScanError::Protocol("bad".to_string()).is_expected());
    }

    #[test]
    fn test_cycle_failures() {
        assert!(ScanError::CapturePending.is_cycle_failure());
        assert!(ScanError::Network("x".to_string()).is_cycle_failure());
        assert!(ScanError::Service { status: 500, message: String::new() }.is_cycle_failure());
        assert!(ScanError::Protocol("x".to_string()).is_cycle_failure());
        assert!(!ScanError::Config("x".to_string()).is_cycle_failure());
    }

    #[test]
    fn test_scan_error_from_json() {
        let json_err = serde_json::from_str::<Vec<u32>>("{").unwrap_err();
        let err: ScanError = json_err.into();
        assert!(matches!(err, ScanError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_network_error() {
        let err = reqwest::Client::new()
            .get("http://127.0.0.1:9/scan")
            .timeout(std::time::Duration::from_millis(200))
            .send()
            .await
            .unwrap_err();
        assert!(matches!(ScanError::from(err), ScanError::Network(_)));
    }

    #[test]
    fn test_scan_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: ScanError = io_err.into();
        match err {
            ScanError::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }
}
