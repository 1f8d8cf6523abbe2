//! Session-scoped deduplication and batched attendance counts

use crate::feedback::{FeedbackSink, SilentFeedback};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Running counts for the current session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_seen: u64,
    pub present_count: u64,
}

/// Counts each distinct code once per session.
///
/// `observe` records a code in the counted set immediately, so repeated
/// detections never double count, but the counters only move when
/// [`flush`](Self::flush) drains the pending batch.
pub struct AttendanceAggregator {
    session_id: Uuid,
    counted: HashSet<String>,
    pending: Vec<String>,
    stats: SessionStats,
    feedback: Arc<dyn FeedbackSink>,
}

impl AttendanceAggregator {
    pub fn new(feedback: Arc<dyn FeedbackSink>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            counted: HashSet::new(),
            pending: Vec::new(),
            stats: SessionStats::default(),
            feedback,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Record a detected code. Returns true if the code is new this session.
    pub fn observe(&mut self, code: &str) -> bool {
        if self.counted.contains(code) {
            return false;
        }
        self.counted.insert(code.to_string());
        self.pending.push(code.to_string());
        debug!("New code {:?} pending ({} in batch)", code, self.pending.len());
        self.feedback.trigger(code);
        true
    }

    /// Apply the pending batch to the counters. Returns the number of codes
    /// flushed.
    pub fn flush(&mut self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let flushed = self.pending.len();
        self.pending.clear();
        self.stats.total_seen += flushed as u64;
        self.stats.present_count += flushed as u64;
        info!(
            "Attendance: +{} (present {}, seen {})",
            flushed, self.stats.present_count, self.stats.total_seen
        );
        flushed
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    pub fn has_counted(&self, code: &str) -> bool {
        self.counted.contains(code)
    }

    pub fn counted_len(&self) -> usize {
        self.counted.len()
    }

    /// Start a new session: forget every counted code and zero the counters
    pub fn reset(&mut self) {
        self.session_id = Uuid::new_v4();
        self.counted.clear();
        self.pending.clear();
        self.stats = SessionStats::default();
        info!("Attendance session reset ({})", self.session_id);
    }

    #[cfg(test)]
    fn with_stats(stats: SessionStats) -> Self {
        Self {
            stats,
            ..Self::default()
        }
    }
}

impl Default for AttendanceAggregator {
    fn default() -> Self {
        Self::new(Arc::new(SilentFeedback))
    }
}

impl std::fmt::Debug for AttendanceAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttendanceAggregator")
            .field("session_id", &self.session_id)
            .field("counted", &self.counted_len())
            .field("pending", &self.pending.len())
            .field("stats", &self.stats)
            .field("feedback", &self.feedback.name())
            .finish()
    }
}
