//! Scanner session: wires capture, detection, tracking, rendering and
//! attendance into one running pipeline

use crate::attendance::{AttendanceAggregator, SessionStats};
use crate::camera::{FacingMode, VideoSource};
use crate::capture::CaptureEncoder;
use crate::client::{DetectionClient, Detector};
use crate::config::ScannerConfig;
use crate::debug_log::DebugLog;
use crate::error::ScanError;
use crate::feedback::{self, FeedbackSink};
use crate::overlay::{OverlayFrame, OverlayRenderer};
use crate::processing::ResultTracker;
use crate::scheduler::{DetectionSnapshot, FrameScheduler, Pipeline, SchedulerStats};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A spawned loop and the switch that stops it
struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RunningLoop {
    async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!("Loop task ended abnormally: {}", e);
        }
    }
}

/// Live scanning session.
///
/// Owns the scheduling loop and the attendance flush timer. Tearing the
/// session down stops both; a detection request still in flight completes
/// but its result is discarded.
pub struct ScannerSession {
    config: ScannerConfig,
    pipeline: Pipeline,
    renderer: Mutex<OverlayRenderer>,
    in_flight: Arc<Semaphore>,
    scheduler: Option<RunningLoop>,
    flusher: Option<RunningLoop>,
}

impl ScannerSession {
    /// Session talking to the HTTP detection service from the config
    pub fn new(config: ScannerConfig, source: Box<dyn VideoSource>) -> Result<Self, ScanError> {
        let debug_log = DebugLog::new(config.debug_log_capacity);
        let detector = Arc::new(DetectionClient::new(&config)?.with_debug_log(debug_log.clone()));
        let feedback = feedback::from_config(&config.attendance.feedback);
        Self::assemble(config, source, detector, feedback, debug_log)
    }

    /// Session with an explicit detector and feedback sink
    pub fn with_parts(
        config: ScannerConfig,
        source: Box<dyn VideoSource>,
        detector: Arc<dyn Detector>,
        feedback: Arc<dyn FeedbackSink>,
    ) -> Result<Self, ScanError> {
        let debug_log = DebugLog::new(config.debug_log_capacity);
        Self::assemble(config, source, detector, feedback, debug_log)
    }

    fn assemble(
        config: ScannerConfig,
        source: Box<dyn VideoSource>,
        detector: Arc<dyn Detector>,
        feedback: Arc<dyn FeedbackSink>,
        debug_log: DebugLog,
    ) -> Result<Self, ScanError> {
        config.validate().map_err(ScanError::Config)?;
        info!("Using detector {}", detector.name());

        let pipeline = Pipeline::new(
            source,
            CaptureEncoder::new(&config.capture),
            detector,
            ResultTracker::new(&config.tracking),
            AttendanceAggregator::new(feedback),
            debug_log,
        );
        pipeline.debug_log.push(format!("API URL: {}", config.api_url));

        Ok(Self {
            renderer: Mutex::new(OverlayRenderer::new(&config.overlay)),
            config,
            pipeline,
            in_flight: FrameScheduler::guard(),
            scheduler: None,
            flusher: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Start the scheduling loop and the flush timer
    pub fn start(&mut self) {
        if self.scheduler.is_none() {
            self.scheduler = Some(self.spawn_scheduler());
        }
        if self.flusher.is_none() {
            self.flusher = Some(self.spawn_flusher());
        }
        info!("Scanner session {} started", self.session_id());
    }

    /// Tear down: stop the loop and flush whatever is still pending
    pub async fn stop(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop().await;
        }
        if let Some(flusher) = self.flusher.take() {
            flusher.stop().await;
        }
        {
            let _commit = self.pipeline.commit.lock();
            self.pipeline.attendance.lock().flush();
        }
        info!("Scanner session {} stopped", self.session_id());
    }

    /// Toggle between front and back cameras.
    ///
    /// The scheduling loop is restarted around the switch and tracked codes
    /// are cleared, since their geometry belongs to the previous camera.
    pub async fn switch_facing(&mut self) -> Result<FacingMode, ScanError> {
        let was_running = self.scheduler.is_some();
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop().await;
        }

        let result = {
            let _commit = self.pipeline.commit.lock();
            let result = {
                let mut source = self.pipeline.source.lock();
                let next = source.facing().toggled();
                source.set_facing(next).map(|_| next)
            };
            if result.is_ok() {
                self.pipeline.clear_tracked();
            }
            result
        };

        match &result {
            Ok(facing) => self.pipeline.debug_log.push(format!("Switched to {} camera", facing)),
            Err(e) => warn!("Camera switch failed: {}", e),
        }

        if was_running {
            self.scheduler = Some(self.spawn_scheduler());
        }
        result
    }

    pub fn facing(&self) -> FacingMode {
        self.pipeline.source.lock().facing()
    }

    /// Run one detection cycle now, waiting for any in-flight cycle first
    pub async fn scan_once(&self) -> Result<usize, ScanError> {
        let _permit = self
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ScanError::Config("In-flight guard closed".to_string()))?;
        let (_keep, teardown) = watch::channel(false);
        self.pipeline.run_cycle(&teardown).await
    }

    /// Latest published tracked snapshot
    pub fn tracked(&self) -> Arc<DetectionSnapshot> {
        self.pipeline.snapshot()
    }

    /// Receiver notified every time a new snapshot is published
    pub fn subscribe(&self) -> watch::Receiver<Arc<DetectionSnapshot>> {
        self.pipeline.subscribe()
    }

    /// Render the overlay for the latest snapshot
    pub fn render(&self, elapsed: Duration) -> OverlayFrame {
        let snapshot = self.pipeline.snapshot();
        let mut renderer = self.renderer.lock();
        let (w, h) = snapshot.native_size;
        renderer.set_native_size(w, h);
        renderer.render(&snapshot.tracked, elapsed)
    }

    /// Displayed video box changed size
    pub fn resize_display(&self, width: u32, height: u32) {
        self.renderer.lock().resize(width, height);
    }

    pub fn stats(&self) -> SessionStats {
        self.pipeline.attendance.lock().stats()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.pipeline.stats()
    }

    /// Apply pending attendance immediately instead of waiting for the timer
    pub fn flush_attendance(&self) -> usize {
        self.pipeline.attendance.lock().flush()
    }

    /// Explicit restart of the attendance session
    pub fn counted_codes(&self) -> usize {
        self.pipeline.attendance.lock().counted_len()
    }

    pub fn reset_attendance(&self) {
        self.pipeline.attendance.lock().reset();
    }

    pub fn session_id(&self) -> Uuid {
        self.pipeline.attendance.lock().session_id()
    }

    pub fn debug_log(&self) -> &DebugLog {
        &self.pipeline.debug_log
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    fn spawn_scheduler(&self) -> RunningLoop {
        let (shutdown, rx) = watch::channel(false);
        let scheduler = FrameScheduler::new(
            self.config.scheduler.clone(),
            self.pipeline.clone(),
            self.in_flight.clone(),
        );
        RunningLoop {
            shutdown,
            handle: scheduler.spawn(rx),
        }
    }

    fn spawn_flusher(&self) -> RunningLoop {
        let (shutdown, mut rx) = watch::channel(false);
        let attendance = self.pipeline.attendance.clone();
        let period = self.config.attendance.flush_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        attendance.lock().flush();
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Attendance flush timer stopped");
        });

        RunningLoop { shutdown, handle }
    }
}

impl Drop for ScannerSession {
    fn drop(&mut self) {
        for running in [self.scheduler.take(), self.flusher.take()].into_iter().flatten() {
            let _ = running.shutdown.send(true);
        }
    }
}
