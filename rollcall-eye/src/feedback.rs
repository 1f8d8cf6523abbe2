//! Best-effort feedback cues for newly counted codes

use crate::config::FeedbackConfig;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fire-and-forget notification that a new code was counted.
///
/// Implementations must not block and must swallow their own failures.
pub trait FeedbackSink: Send + Sync {
    fn trigger(&self, code: &str);

    fn name(&self) -> &str;
}

/// Feedback disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentFeedback;

impl FeedbackSink for SilentFeedback {
    fn trigger(&self, _code: &str) {}

    fn name(&self) -> &str {
        "none"
    }
}

/// Plays a short sound file through an external player command
#[derive(Debug, Clone)]
pub struct AudioCue {
    player: String,
    cue_path: PathBuf,
}

impl AudioCue {
    pub fn new(player: impl Into<String>, cue_path: impl Into<PathBuf>) -> Self {
        Self {
            player: player.into(),
            cue_path: cue_path.into(),
        }
    }
}

impl FeedbackSink for AudioCue {
    fn trigger(&self, code: &str) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("No runtime available, skipping audio cue for {:?}", code);
                return;
            }
        };

        let mut command = tokio::process::Command::new(&self.player);
        command
            .arg(&self.cue_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let player = self.player.clone();
        handle.spawn(async move {
            match command.status().await {
                Ok(status) if status.success() => {}
                Ok(status) => debug!("Audio cue player {} exited with {}", player, status),
                Err(e) => warn!("Audio cue playback failed: {}", e),
            }
        });
    }

    fn name(&self) -> &str {
        "audio"
    }
}

/// Build the feedback sink described by the config
pub fn from_config(config: &FeedbackConfig) -> Arc<dyn FeedbackSink> {
    match config {
        FeedbackConfig::Disabled => Arc::new(SilentFeedback),
        FeedbackConfig::Audio { player, cue_path } => Arc::new(AudioCue::new(player.clone(), cue_path.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        assert_eq!(from_config(&FeedbackConfig::Disabled).name(), "none");
        let audio = FeedbackConfig::Audio {
            player: "paplay".to_string(),
            cue_path: PathBuf::from("beep.wav"),
        };
        assert_eq!(from_config(&audio).name(), "audio");
    }

    #[test]
    fn test_audio_cue_without_runtime_is_noop() {
        AudioCue::new("paplay", "beep.wav").trigger("A");
    }

    #[tokio::test]
    async fn test_audio_cue_missing_player_is_swallowed() {
        let cue = AudioCue::new("/nonexistent/rollcall-player", "beep.wav");
        cue.trigger("A");
        tokio::task::yield_now().await;
    }
}
