//! Per-code temporal tracking and polygon smoothing

use crate::config::{EvictionPolicy, TrackingConfig};
use chrono::{DateTime, Utc};
use rollcall_core::{DetectedCode, Point};
use std::collections::HashMap;
use tracing::debug;

/// A detected code followed across detection cycles
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedCode {
    /// Most recent raw detection
    pub code: DetectedCode,
    /// Exponential moving average of the polygon, point for point
    pub smoothed: Vec<Point>,
    pub first_seen_cycle: u64,
    pub last_seen_cycle: u64,
    pub last_seen: DateTime<Utc>,
    /// Consecutive cycles this code has been missing from responses
    pub missed_cycles: u32,
    /// Number of responses that contained this code
    pub observations: u32,
}

impl TrackedCode {
    fn seed(code: &DetectedCode, cycle: u64, now: DateTime<Utc>) -> Self {
        Self {
            code: code.clone(),
            smoothed: code.polygon.clone(),
            first_seen_cycle: cycle,
            last_seen_cycle: cycle,
            last_seen: now,
            missed_cycles: 0,
            observations: 1,
        }
    }

    pub fn id(&self) -> &str {
        &self.code.id
    }

    pub fn kind(&self) -> &str {
        &self.code.kind
    }

    /// Overlay label text
    pub fn label(&self) -> String {
        format!("{}: {}", self.code.kind, self.code.id)
    }
}

/// Immutable snapshot of all tracked codes after one cycle.
///
/// Iteration follows the order codes appeared in the latest detection batch;
/// codes retained by a grace period come after them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedCodes {
    entries: Vec<TrackedCode>,
    index: HashMap<String, usize>,
    cycle: u64,
}

impl TrackedCodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&TrackedCode> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedCode> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(TrackedCode::id).collect()
    }

    /// Number of tracker updates that produced this snapshot
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    fn push(&mut self, tracked: TrackedCode) {
        self.index.insert(tracked.code.id.clone(), self.entries.len());
        self.entries.push(tracked);
    }
}

/// Correlates detection batches with the previous snapshot by payload and
/// smooths geometry with an exponential moving average.
#[derive(Debug, Clone)]
pub struct ResultTracker {
    alpha: f32,
    eviction: EvictionPolicy,
}

impl ResultTracker {
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            alpha: config.smoothing_alpha.clamp(f32::EPSILON, 1.0 - f32::EPSILON),
            eviction: config.eviction,
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn eviction(&self) -> EvictionPolicy {
        self.eviction
    }

    /// Build the next snapshot from a detection batch.
    ///
    /// `previous` is never modified; the caller swaps the returned snapshot
    /// in wholesale.
    pub fn update(&self, new_results: &[DetectedCode], previous: &TrackedCodes) -> TrackedCodes {
        let cycle = previous.cycle + 1;
        let now = Utc::now();
        let mut next = TrackedCodes {
            entries: Vec::with_capacity(new_results.len()),
            index: HashMap::with_capacity(new_results.len()),
            cycle,
        };

        for raw in new_results {
            if next.contains(&raw.id) {
                debug!("Duplicate payload {:?} in one batch, keeping the first", raw.id);
                continue;
            }

            let tracked = match previous.get(&raw.id) {
                Some(prior) if prior.smoothed.len() == raw.polygon.len() => TrackedCode {
                    code: raw.clone(),
                    smoothed: raw
                        .polygon
                        .iter()
                        .zip(&prior.smoothed)
                        .map(|(r, s)| r.blend(*s, self.alpha))
                        .collect(),
                    first_seen_cycle: prior.first_seen_cycle,
                    last_seen_cycle: cycle,
                    last_seen: now,
                    missed_cycles: 0,
                    observations: prior.observations.saturating_add(1),
                },
                Some(prior) => {
                    debug!(
                        "Point count for {:?} changed ({} -> {}), reseeding",
                        raw.id,
                        prior.smoothed.len(),
                        raw.polygon.len()
                    );
                    TrackedCode {
                        first_seen_cycle: prior.first_seen_cycle,
                        observations: prior.observations.saturating_add(1),
                        ..TrackedCode::seed(raw, cycle, now)
                    }
                }
                None => TrackedCode::seed(raw, cycle, now),
            };
            next.push(tracked);
        }

        if let EvictionPolicy::Grace { max_missed_cycles } = self.eviction {
            for prior in previous.iter() {
                if next.contains(prior.id()) {
                    continue;
                }
                let missed = prior.missed_cycles.saturating_add(1);
                if missed <= max_missed_cycles {
                    next.push(TrackedCode {
                        missed_cycles: missed,
                        ..prior.clone()
                    });
                }
            }
        }

        debug!("Tracking {} codes after cycle {}", next.len(), cycle);
        next
    }
}

impl Default for ResultTracker {
    fn default() -> Self {
        Self::new(&TrackingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(id: &str, offset: f32) -> DetectedCode {
        DetectedCode::from_polygon(
            id,
            "QRCODE",
            vec![
                Point::new(offset, offset),
                Point::new(offset + 10.0, offset),
                Point::new(offset + 10.0, offset + 10.0),
                Point::new(offset, offset + 10.0),
            ],
        )
        .unwrap()
    }

    fn grace(max_missed_cycles: u32) -> ResultTracker {
        ResultTracker::new(&TrackingConfig {
            smoothing_alpha: 0.3,
            eviction: EvictionPolicy::Grace { max_missed_cycles },
        })
    }

    #[test]
    fn test_tracker_update_empty() {
        let tracker = ResultTracker::default();
        let tracked = tracker.update(&[], &TrackedCodes::new());
        assert!(tracked.is_empty());
        assert_eq!(tracked.cycle(), 1);
    }

    #[test]
    fn test_new_code_is_seeded_unsmoothed() {
        let tracker = ResultTracker::default();
        let tracked = tracker.update(&[square("A", 0.0)], &TrackedCodes::new());
        let a = tracked.get("A").unwrap();
        assert_eq!(a.smoothed, square("A", 0.0).polygon);
        assert_eq!(a.observations, 1);
        assert_eq!(a.first_seen_cycle, 1);
    }

    #[test]
    fn test_second_observation_is_blended() {
        let tracker = ResultTracker::default();
        let first = tracker.update(&[square("A", 0.0)], &TrackedCodes::new());
        let second = tracker.update(&[square("A", 5.0)], &first);

        let a = second.get("A").unwrap();
        assert!((a.smoothed[0].x - 1.5).abs() < 1e-5);
        assert!((a.smoothed[0].y - 1.5).abs() < 1e-5);
        assert!((a.smoothed[2].x - 11.5).abs() < 1e-5);
        assert_eq!(a.code.polygon[0], Point::new(5.0, 5.0));
        assert_eq!(a.observations, 2);
        assert_eq!(a.first_seen_cycle, 1);
        assert_eq!(a.last_seen_cycle, 2);
    }

    #[test]
    fn test_previous_snapshot_untouched() {
        let tracker = ResultTracker::default();
        let first = tracker.update(&[square("A", 0.0)], &TrackedCodes::new());
        let copy = first.clone();
        let _ = tracker.update(&[square("A", 5.0)], &first);
        assert_eq!(first, copy);
    }

    #[test]
    fn test_missing_code_dropped() {
        let tracker = ResultTracker::default();
        let first = tracker.update(&[square("A", 0.0), square("B", 50.0)], &TrackedCodes::new());
        let second = tracker.update(&[square("B", 50.0)], &first);
        assert_eq!(second.ids(), vec!["B"]);
    }

    #[test]
    fn test_output_follows_batch_order() {
        let tracker = ResultTracker::default();
        let first = tracker.update(&[square("A", 0.0), square("B", 50.0)], &TrackedCodes::new());
        let second = tracker.update(&[square("C", 0.0), square("B", 50.0), square("A", 0.0)], &first);
        assert_eq!(second.ids(), vec!["C", "B", "A"]);
    }

    #[test]
    fn test_duplicate_payload_keeps_first() {
        let tracker = ResultTracker::default();
        let tracked = tracker.update(&[square("A", 0.0), square("A", 100.0)], &TrackedCodes::new());
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked.get("A").unwrap().smoothed[0], Point::new(0.0, 0.0));
    }

    #[test]
    fn test_point_count_change_reseeds() {
        let tracker = ResultTracker::default();
        let first = tracker.update(&[square("A", 0.0)], &TrackedCodes::new());
        let triangle = DetectedCode::from_polygon(
            "A",
            "QRCODE",
            vec![Point::new(20.0, 20.0), Point::new(30.0, 20.0), Point::new(25.0, 30.0)],
        )
        .unwrap();
        let second = tracker.update(&[triangle.clone()], &first);
        let a = second.get("A").unwrap();
        assert_eq!(a.smoothed, triangle.polygon);
        assert_eq!(a.observations, 2);
    }

    #[test]
    fn test_grace_period_retains_then_evicts() {
        let tracker = grace(2);
        let mut tracked = tracker.update(&[square("A", 0.0)], &TrackedCodes::new());

        tracked = tracker.update(&[], &tracked);
        assert_eq!(tracked.get("A").unwrap().missed_cycles, 1);
        tracked = tracker.update(&[], &tracked);
        assert_eq!(tracked.get("A").unwrap().missed_cycles, 2);
        tracked = tracker.update(&[], &tracked);
        assert!(tracked.is_empty());
    }

    #[test]
    fn test_grace_period_reacquire_blends_and_resets() {
        let tracker = grace(3);
        let first = tracker.update(&[square("A", 0.0)], &TrackedCodes::new());
        let missed = tracker.update(&[square("B", 50.0)], &first);
        assert_eq!(missed.ids(), vec!["B", "A"]);

        let back = tracker.update(&[square("A", 5.0)], &missed);
        let a = back.get("A").unwrap();
        assert_eq!(a.missed_cycles, 0);
        assert!((a.smoothed[0].x - 1.5).abs() < 1e-5);
    }

    #[test]
    fn test_label() {
        let tracker = ResultTracker::default();
        let tracked = tracker.update(&[square("alice@example", 0.0)], &TrackedCodes::new());
        assert_eq!(tracked.get("alice@example").unwrap().label(), "QRCODE: alice@example");
    }
}
