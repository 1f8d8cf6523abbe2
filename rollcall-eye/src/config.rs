//! Configuration for rollcall-eye

use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable overriding the detection service base URL
pub const API_URL_ENV: &str = "ROLLCALL_API_URL";

/// How the tracker treats codes missing from a detection response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Drop a code as soon as one response omits it
    DropOnMiss,
    /// Keep a code for up to `max_missed_cycles` consecutive misses
    Grace { max_missed_cycles: u32 },
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        EvictionPolicy::DropOnMiss
    }
}

/// Feedback played once per newly counted code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FeedbackConfig {
    #[serde(rename = "none")]
    Disabled,
    /// Play `cue_path` with an external player command (e.g. `paplay`)
    Audio { player: String, cue_path: PathBuf },
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        FeedbackConfig::Disabled
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Encoded frame width, independent of the camera's native width
    pub target_width: u32,
    /// Encoded frame height, independent of the camera's native height
    pub target_height: u32,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_width: 640,
            target_height: 480,
            jpeg_quality: 70,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tick rate of the scheduling loop, normally the display refresh rate
    pub refresh_rate_hz: u32,
    /// Only every Nth eligible tick starts a detection cycle
    pub frame_skip: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_rate_hz: 60,
            frame_skip: 1,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refresh_rate_hz.max(1) as f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// EMA weight of the newest raw polygon
    pub smoothing_alpha: f32,
    pub eviction: EvictionPolicy,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.3,
            eviction: EvictionPolicy::DropOnMiss,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttendanceConfig {
    /// Period of the pending-set flush timer
    pub flush_interval_ms: u64,
    pub feedback: FeedbackConfig,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 50,
            feedback: FeedbackConfig::Disabled,
        }
    }
}

impl AttendanceConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Displayed video box width
    pub display_width: u32,
    /// Displayed video box height
    pub display_height: u32,
    /// Background grid cell size in display pixels
    pub grid_cell: u32,
    /// Sweep line period
    pub sweep_period_ms: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            display_width: 600,
            display_height: 450,
            grid_cell: 40,
            sweep_period_ms: 2000,
        }
    }
}

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Detection service base URL; requests go to `{api_url}/scan`
    pub api_url: String,
    /// Upper bound on one detection round-trip
    pub request_timeout_ms: u64,
    /// Number of debug log lines retained
    pub debug_log_capacity: usize,
    pub capture: CaptureConfig,
    pub scheduler: SchedulerConfig,
    pub tracking: TrackingConfig,
    pub attendance: AttendanceConfig,
    pub overlay: OverlayConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000".to_string(),
            request_timeout_ms: 10_000,
            debug_log_capacity: 5,
            capture: CaptureConfig::default(),
            scheduler: SchedulerConfig::default(),
            tracking: TrackingConfig::default(),
            attendance: AttendanceConfig::default(),
            overlay: OverlayConfig::default(),
        }
    }
}

impl ScannerConfig {
    /// Default config file location, `~/.rollcall/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|mut p| {
            p.push(".rollcall");
            p.push("config.toml");
            p
        })
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ScanError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| ScanError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Resolve the effective configuration: explicit file, then the default
    /// file if it exists, then built-in defaults. The environment override is
    /// applied last and the result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ScanError> {
        let mut config = match path {
            Some(path) => {
                info!("Loading config from {}", path.display());
                Self::from_file(path)?
            }
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(default) => {
                    info!("Loading config from {}", default.display());
                    Self::from_file(&default)?
                }
                None => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.is_empty() {
                config.api_url = url;
            }
        }

        config.validate().map_err(ScanError::Config)?;
        Ok(config)
    }

    /// Full detection endpoint
    pub fn scan_endpoint(&self) -> String {
        format!("{}/scan", self.api_url.trim_end_matches('/'))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err("API URL must start with http:// or https://".to_string());
        }

        if self.request_timeout_ms == 0 {
            return Err("Request timeout must be non-zero".to_string());
        }

        let capture = &self.capture;
        if capture.target_width == 0 || capture.target_height == 0 {
            return Err("Capture resolution must be non-zero".to_string());
        }
        if capture.target_width > 7680 || capture.target_height > 4320 {
            return Err("Capture resolution too large (max 8K)".to_string());
        }
        if capture.jpeg_quality == 0 || capture.jpeg_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }

        if self.scheduler.refresh_rate_hz == 0 || self.scheduler.refresh_rate_hz > 240 {
            return Err("Refresh rate must be between 1 and 240".to_string());
        }
        if self.scheduler.frame_skip == 0 {
            return Err("Frame skip must be at least 1".to_string());
        }

        let alpha = self.tracking.smoothing_alpha;
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err("Smoothing alpha must be in (0, 1)".to_string());
        }

        if self.attendance.flush_interval_ms == 0 {
            return Err("Flush interval must be non-zero".to_string());
        }
        if let FeedbackConfig::Audio { player, .. } = &self.attendance.feedback {
            if player.trim().is_empty() {
                return Err("Audio feedback requires a player command".to_string());
            }
        }

        if self.overlay.display_width == 0 || self.overlay.display_height == 0 {
            return Err("Display size must be non-zero".to_string());
        }
        if self.overlay.grid_cell == 0 {
            return Err("Grid cell must be non-zero".to_string());
        }
        if self.overlay.sweep_period_ms == 0 {
            return Err("Sweep period must be non-zero".to_string());
        }

        if self.debug_log_capacity == 0 {
            return Err("Debug log capacity must be at least 1".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ScannerConfig::default();
        assert_eq!(config.capture.target_width, 640);
        assert_eq!(config.capture.target_height, 480);
        assert_eq!(config.scheduler.frame_skip, 1);
        assert!((config.tracking.smoothing_alpha - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.tracking.eviction, EvictionPolicy::DropOnMiss);
        assert_eq!(config.attendance.flush_interval_ms, 50);
        assert_eq!(config.attendance.feedback, FeedbackConfig::Disabled);
        assert_eq!(config.debug_log_capacity, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scan_endpoint_trims_slash() {
        let mut config = ScannerConfig::default();
        config.api_url = "https://scanner.example/".to_string();
        assert_eq!(config.scan_endpoint(), "https://scanner.example/scan");
    }

    #[test]
    fn test_config_validation_bad_url() {
        let mut config = ScannerConfig::default();
        config.api_url = "scanner.example".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_alpha_bounds() {
        let mut config = ScannerConfig::default();
        config.tracking.smoothing_alpha = 0.0;
        assert!(config.validate().is_err());
        config.tracking.smoothing_alpha = 1.0;
        assert!(config.validate().is_err());
        config.tracking.smoothing_alpha = 0.99;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_frame_skip_zero() {
        let mut config = ScannerConfig::default();
        config.scheduler.frame_skip = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_quality() {
        let mut config = ScannerConfig::default();
        config.capture.jpeg_quality = 0;
        assert!(config.validate().is_err());
        config.capture.jpeg_quality = 101;
        assert!(config.validate().is_err());
        config.capture.jpeg_quality = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_refresh_rate() {
        let mut config = ScannerConfig::default();
        config.scheduler.refresh_rate_hz = 0;
        assert!(config.validate().is_err());
        config.scheduler.refresh_rate_hz = 241;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_audio_player() {
        let mut config = ScannerConfig::default();
        config.attendance.feedback = FeedbackConfig::Audio {
            player: "  ".to_string(),
            cue_path: PathBuf::from("beep.wav"),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tick_interval() {
        let scheduler = SchedulerConfig { refresh_rate_hz: 50, frame_skip: 1 };
        assert_eq!(scheduler.tick_interval(), Duration::from_millis(20));
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: ScannerConfig = toml::from_str(
            r#"
            api_url = "https://scan.example"

            [scheduler]
            frame_skip = 3

            [tracking.eviction]
            policy = "grace"
            max_missed_cycles = 2

            [attendance.feedback]
            mode = "audio"
            player = "paplay"
            cue_path = "/usr/share/sounds/beep.wav"
            "#,
        )
        .unwrap();
        assert_eq!(config.api_url, "https://scan.example");
        assert_eq!(config.scheduler.frame_skip, 3);
        assert_eq!(config.scheduler.refresh_rate_hz, 60);
        assert_eq!(config.tracking.eviction, EvictionPolicy::Grace { max_missed_cycles: 2 });
        assert!(matches!(config.attendance.feedback, FeedbackConfig::Audio { .. }));
        assert_eq!(config.capture.target_width, 640);
    }
}
