//! Bounded log of recent pipeline messages for on-screen diagnostics

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Ring buffer of the most recent human-readable pipeline messages.
///
/// Cloning shares the same buffer.
#[derive(Debug, Clone)]
pub struct DebugLog {
    capacity: usize,
    entries: Arc<Mutex<VecDeque<String>>>,
}

impl DebugLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    /// Append a message, evicting the oldest one when full
    pub fn push(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(target: "rollcall::debug_log", "{}", message);
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(message);
    }

    /// Oldest first
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for DebugLog {
    fn default() -> Self {
        Self::new(5)
    }
}
