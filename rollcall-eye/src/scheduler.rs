//! Frame scheduling loop and the detection cycle it drives

use crate::attendance::AttendanceAggregator;
use crate::camera::VideoSource;
use crate::capture::CaptureEncoder;
use crate::client::Detector;
use crate::config::SchedulerConfig;
use crate::debug_log::DebugLog;
use crate::error::ScanError;
use crate::processing::{ResultTracker, TrackedCodes};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Tracked codes published after a successful cycle, with the native video
/// size their coordinates refer to
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSnapshot {
    pub tracked: TrackedCodes,
    pub native_size: (u32, u32),
}

/// Counters describing scheduler behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub capture_pending: u64,
    pub skipped_in_flight: u64,
    pub skipped_by_frame_skip: u64,
    pub discarded_after_teardown: u64,
    /// Highest number of concurrent detection requests ever observed
    pub max_in_flight: usize,
}

/// Lets only every Nth eligible tick through
#[derive(Debug, Clone)]
pub struct FrameSkip {
    every: u32,
    counter: u32,
}

impl FrameSkip {
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            counter: 0,
        }
    }

    pub fn admit(&mut self) -> bool {
        self.counter += 1;
        if self.counter >= self.every {
            self.counter = 0;
            true
        } else {
            false
        }
    }
}

/// Everything one detection cycle touches. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    pub(crate) source: Arc<Mutex<Box<dyn VideoSource>>>,
    pub(crate) encoder: CaptureEncoder,
    pub(crate) detector: Arc<dyn Detector>,
    pub(crate) tracker: ResultTracker,
    pub(crate) snapshot: Arc<watch::Sender<Arc<DetectionSnapshot>>>,
    pub(crate) attendance: Arc<Mutex<AttendanceAggregator>>,
    pub(crate) debug_log: DebugLog,
    pub(crate) stats: Arc<Mutex<SchedulerStats>>,
    /// Held while a cycle publishes its result, and by teardown while it
    /// clears or flushes, so neither can interleave with the other
    pub(crate) commit: Arc<Mutex<()>>,
    in_flight: Arc<AtomicUsize>,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn VideoSource>,
        encoder: CaptureEncoder,
        detector: Arc<dyn Detector>,
        tracker: ResultTracker,
        attendance: AttendanceAggregator,
        debug_log: DebugLog,
    ) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(DetectionSnapshot::default()));
        Self {
            source: Arc::new(Mutex::new(source)),
            encoder,
            detector,
            tracker,
            snapshot: Arc::new(snapshot),
            attendance: Arc::new(Mutex::new(attendance)),
            debug_log,
            stats: Arc::new(Mutex::new(SchedulerStats::default())),
            commit: Arc::new(Mutex::new(())),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DetectionSnapshot>> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> Arc<DetectionSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn stats(&self) -> SchedulerStats {
        *self.stats.lock()
    }

    /// Replace the published snapshot with an empty one
    pub(crate) fn clear_tracked(&self) {
        self.snapshot.send_replace(Arc::new(DetectionSnapshot::default()));
    }

    /// One capture, detect, track iteration.
    ///
    /// Returns the number of codes in the response. Failed cycles leave the
    /// published snapshot and the attendance state untouched. If `teardown`
    /// reads true when the response arrives, the result is dropped. The
    /// check and the publish happen under the commit lock.
    pub async fn run_cycle(&self, teardown: &watch::Receiver<bool>) -> Result<usize, ScanError> {
        let frame = {
            let mut source = self.source.lock();
            self.encoder.capture(&mut **source)
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(ScanError::CapturePending) => {
                self.debug_log.push("Video not ready yet");
                return Err(ScanError::CapturePending);
            }
            Err(e) => return Err(e),
        };

        self.debug_log.push(format!("Video: {}x{}", frame.native_width, frame.native_height));
        self.debug_log.push(format!("Image size: {}KB", (frame.jpeg.len() + 512) / 1024));

        let codes = match self.detector.detect(&frame).await {
            Ok(codes) => frame.to_native(codes),
            Err(e) => {
                self.debug_log.push(format!("Network Error: {}", e));
                return Err(e);
            }
        };

        let _commit = self.commit.lock();
        if *teardown.borrow() {
            debug!("Discarding {} codes from a cycle that outlived its view", codes.len());
            self.stats.lock().discarded_after_teardown += 1;
            return Ok(0);
        }

        let previous = self.snapshot();
        let tracked = self.tracker.update(&codes, &previous.tracked);
        self.snapshot.send_replace(Arc::new(DetectionSnapshot {
            tracked,
            native_size: (frame.native_width, frame.native_height),
        }));

        let mut attendance = self.attendance.lock();
        for code in &codes {
            attendance.observe(&code.id);
        }

        Ok(codes.len())
    }

    /// Run a cycle holding the in-flight permit, recording its outcome
    pub(crate) async fn execute(&self, permit: OwnedSemaphorePermit, teardown: watch::Receiver<bool>) {
        let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let cycle = {
            let mut stats = self.stats.lock();
            stats.cycles_started += 1;
            stats.max_in_flight = stats.max_in_flight.max(concurrent);
            stats.cycles_started
        };

        let result = self.run_cycle(&teardown).await;

        {
            let mut stats = self.stats.lock();
            match &result {
                Ok(_) => stats.cycles_completed += 1,
                Err(ScanError::CapturePending) => stats.capture_pending += 1,
                Err(_) => stats.cycles_failed += 1,
            }
        }
        let detector = self.detector.name();
        match result {
            Ok(count) => debug!("Cycle {} via {} finished with {} codes", cycle, detector, count),
            Err(e) if e.is_expected() => debug!("Cycle {}: {}", cycle, e),
            Err(e) if e.is_cycle_failure() => warn!("Detection cycle {} via {} failed: {}", cycle, detector, e),
            Err(e) => error!("Detection cycle {} via {} hit a non-recoverable error: {}", cycle, detector, e),
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        drop(permit);
    }
}

/// Drives detection cycles at the display refresh rate.
///
/// A single-permit semaphore is the in-flight guard: a tick that cannot take
/// the permit is skipped, so at most one detection request exists at any
/// time. The permit outlives the loop, which lets a restarted scheduler share
/// the guard with a cycle still finishing from the previous one.
pub struct FrameScheduler {
    config: SchedulerConfig,
    pipeline: Pipeline,
    in_flight: Arc<Semaphore>,
}

impl FrameScheduler {
    pub fn new(config: SchedulerConfig, pipeline: Pipeline, in_flight: Arc<Semaphore>) -> Self {
        Self {
            config,
            pipeline,
            in_flight,
        }
    }

    /// A fresh in-flight guard
    pub fn guard() -> Arc<Semaphore> {
        Arc::new(Semaphore::new(1))
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut skip = FrameSkip::new(self.config.frame_skip);
        info!(
            "Frame scheduler started ({} Hz, every {} eligible ticks)",
            self.config.refresh_rate_hz, self.config.frame_skip
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            self.pipeline.stats.lock().ticks += 1;

            let permit = match self.in_flight.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    self.pipeline.stats.lock().skipped_in_flight += 1;
                    continue;
                }
            };
            if !skip.admit() {
                self.pipeline.stats.lock().skipped_by_frame_skip += 1;
                continue;
            }

            let pipeline = self.pipeline.clone();
            let teardown = shutdown.clone();
            tokio::spawn(async move {
                pipeline.execute(permit, teardown).await;
            });
        }

        info!("Frame scheduler stopped");
    }
}
