//! Stream session: connection lifetime, frame cadence and reconnection.
//!
//! ```text
//! Connecting -> Streaming -> (Reconnecting -> Streaming | Terminated)
//! ```
//!
//! The session owns its frame source, collaborators, router (and with it the
//! duplicate filter) and counters. Nothing is shared with other sessions, so
//! several can run side by side on separate threads.
//!
//! Cancellation is cooperative: the stop flag is checked once per loop
//! iteration and while waiting out the reconnect backoff. Frame reads,
//! inference and datastore calls are never interrupted mid-call.

use chrono::Local;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::annotate::{AnnotatedFrameWriter, BoxMark, MarkKind};
use crate::dedup::DedupStats;
use crate::detect::{PlateDetector, Recognition, TextRecognizer};
use crate::error::SourceError;
use crate::frame::{prepare_for_recognition, Frame};
use crate::ingest::FrameSource;
use crate::router::{Candidate, DetectionRouter, RouteContext, RoutedDetection};
use crate::stats::{SessionStats, StatsReporter, DEFAULT_STATUS_INTERVAL};

pub const DEFAULT_SKIP_FRAMES: u32 = 2;
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.35;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

const STOP_POLL: Duration = Duration::from_millis(100);

/// Runtime knobs handed to one session.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    pub source_id: String,
    /// Frames passed through untouched between two processed frames.
    pub skip_frames: u32,
    pub min_confidence: f32,
    /// Consecutive failed reads tolerated before the session gives up.
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff: Duration,
    pub status_interval: Duration,
}

impl PipelineSettings {
    pub fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            skip_frames: DEFAULT_SKIP_FRAMES,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            status_interval: DEFAULT_STATUS_INTERVAL,
        }
    }

    /// Frame indices start at 1; every `skip_frames + 1`'th frame is processed.
    pub fn should_process(&self, frame_index: u64) -> bool {
        frame_index % (u64::from(self.skip_frames) + 1) == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    Reconnecting,
    Terminated,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminationReason {
    /// Operator stop.
    Cancelled,
    /// More consecutive read failures than the reconnect budget allows.
    ReconnectExhausted { attempts: u32 },
    /// The source could not be opened at startup.
    StartupFailed(String),
}

impl TerminationReason {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TerminationReason::Cancelled)
    }
}

/// What a finished session leaves behind.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionReport {
    pub source_id: String,
    pub reason: TerminationReason,
    pub stats: SessionStats,
    pub dedup: DedupStats,
    pub elapsed: Duration,
}

pub struct StreamSession {
    settings: PipelineSettings,
    source: Box<dyn FrameSource>,
    detector: Box<dyn PlateDetector>,
    recognizer: Box<dyn TextRecognizer>,
    router: DetectionRouter,
    annotator: Option<AnnotatedFrameWriter>,
    stop: Arc<AtomicBool>,
    state: SessionState,
    termination: Option<TerminationReason>,
    stats: SessionStats,
    reporter: StatsReporter,
    frame_index: u64,
    consecutive_failures: u32,
}

impl StreamSession {
    pub fn new(
        settings: PipelineSettings,
        source: Box<dyn FrameSource>,
        detector: Box<dyn PlateDetector>,
        recognizer: Box<dyn TextRecognizer>,
        router: DetectionRouter,
    ) -> Self {
        let reporter = StatsReporter::new(&settings.source_id, settings.status_interval);
        Self {
            settings,
            source,
            detector,
            recognizer,
            router,
            annotator: None,
            stop: Arc::new(AtomicBool::new(false)),
            state: SessionState::Connecting,
            termination: None,
            stats: SessionStats::default(),
            reporter,
            frame_index: 0,
            consecutive_failures: 0,
        }
    }

    pub fn with_annotator(mut self, annotator: AnnotatedFrameWriter) -> Self {
        self.annotator = Some(annotator);
        self
    }

    /// Share an externally owned stop flag (e.g. the Ctrl-C handler's).
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn source_id(&self) -> &str {
        &self.settings.source_id
    }

    pub fn url(&self) -> &str {
        self.source.url()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn termination(&self) -> Option<&TerminationReason> {
        self.termination.as_ref()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn dedup_stats(&self) -> DedupStats {
        self.router.dedup_stats()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Open the source. No retry: a failure here terminates the session.
    pub fn connect(&mut self) -> Result<(), SourceError> {
        self.state = SessionState::Connecting;
        log::info!(
            "[{}] connecting to {} (detector={}, recognizer={})",
            self.settings.source_id,
            self.source.url(),
            self.detector.name(),
            self.recognizer.name()
        );
        match self.source.open() {
            Ok(()) => {
                self.state = SessionState::Streaming;
                log::info!("[{}] streaming", self.settings.source_id);
                Ok(())
            }
            Err(e) => {
                log::error!("[{}] cannot open stream: {}", self.settings.source_id, e);
                self.terminate(TerminationReason::StartupFailed(e.to_string()));
                Err(e)
            }
        }
    }

    /// One loop iteration: read a frame and process it, or handle the failure.
    pub fn step(&mut self) -> SessionState {
        if self.state == SessionState::Terminated {
            return self.state;
        }
        if self.stop.load(Ordering::SeqCst) {
            log::info!("[{}] stop requested", self.settings.source_id);
            self.terminate(TerminationReason::Cancelled);
            return self.state;
        }

        match self.source.read_frame() {
            Ok(Some(frame)) => self.on_frame(frame),
            Ok(None) => self.on_read_failure("end of stream".to_string()),
            Err(e) => self.on_read_failure(e.to_string()),
        }
        self.reporter
            .maybe_report(&self.stats, self.router.dedup_stats());
        self.state
    }

    /// Connect, loop until terminated, then flush outputs and log the summary.
    pub fn run(mut self) -> SessionReport {
        if self.connect().is_ok() {
            while self.step() != SessionState::Terminated {}
        }
        self.finish()
    }

    fn on_frame(&mut self, frame: Frame) {
        if self.state == SessionState::Reconnecting {
            log::info!(
                "[{}] stream recovered after {} failed read(s)",
                self.settings.source_id,
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.state = SessionState::Streaming;
        self.frame_index += 1;
        self.stats.frames_seen += 1;

        if self.settings.should_process(self.frame_index) {
            self.process_frame(&frame);
        }
    }

    fn on_read_failure(&mut self, reason: String) {
        self.consecutive_failures += 1;
        let max = self.settings.max_reconnect_attempts;
        if self.consecutive_failures > max {
            log::error!(
                "[{}] giving up after {} consecutive failed reads: {}",
                self.settings.source_id,
                self.consecutive_failures,
                reason
            );
            self.terminate(TerminationReason::ReconnectExhausted {
                attempts: self.consecutive_failures,
            });
            return;
        }

        self.state = SessionState::Reconnecting;
        self.stats.reconnects += 1;
        log::warn!(
            "[{}] read failed ({}), reconnecting (attempt {}/{})",
            self.settings.source_id,
            reason,
            self.consecutive_failures,
            max
        );
        self.source.close();
        if !self.wait_backoff() {
            self.terminate(TerminationReason::Cancelled);
            return;
        }
        if let Err(e) = self.source.open() {
            log::warn!("[{}] reopen failed: {}", self.settings.source_id, e);
        }
    }

    /// Sleep out the backoff. Returns false when a stop arrived meanwhile.
    fn wait_backoff(&self) -> bool {
        let deadline = Instant::now() + self.settings.reconnect_backoff;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(STOP_POLL));
        }
    }

    fn process_frame(&mut self, frame: &Frame) {
        self.stats.frames_processed += 1;
        let detections = match self.detector.detect(frame, self.settings.min_confidence) {
            Ok(detections) => detections,
            Err(e) => {
                self.stats.detection_errors += 1;
                log::warn!(
                    "[{}] detection failed on frame {}: {}",
                    self.settings.source_id,
                    self.frame_index,
                    e
                );
                return;
            }
        };

        let timestamp = Local::now();
        let now = Instant::now();
        let mut marks = Vec::new();
        for detection in detections {
            if detection.confidence < self.settings.min_confidence {
                continue;
            }
            let Some(region) = detection.region.clamp_to(frame.width, frame.height) else {
                continue;
            };
            let crop = match frame.crop(&region) {
                Ok(crop) => crop,
                Err(e) => {
                    log::debug!("[{}] skipping region: {}", self.settings.source_id, e);
                    continue;
                }
            };
            let recognition = self.recognize(&crop);
            let ctx = RouteContext {
                source_id: &self.settings.source_id,
                frame_index: self.frame_index,
                timestamp,
                now,
            };
            let candidate = Candidate {
                crop: &crop,
                region,
                detection_confidence: detection.confidence,
                recognition,
            };
            let routed = self.router.route(candidate, &ctx, &mut self.stats);
            marks.push(mark_for(&routed));
        }

        if let Some(annotator) = self.annotator.as_mut() {
            annotator.write(frame, self.frame_index, &marks);
        }
    }

    /// Recognizer failures and unreadable crops become an absent result.
    fn recognize(&mut self, crop: &Frame) -> Option<Recognition> {
        let prepared = match prepare_for_recognition(crop) {
            Ok(Some(prepared)) => prepared,
            Ok(None) => {
                log::debug!(
                    "[{}] crop {}x{} too small to read",
                    self.settings.source_id,
                    crop.width,
                    crop.height
                );
                return None;
            }
            Err(e) => {
                self.stats.recognition_errors += 1;
                log::warn!("[{}] malformed crop: {}", self.settings.source_id, e);
                return None;
            }
        };
        match self.recognizer.recognize(&prepared) {
            Ok(recognition) => recognition,
            Err(e) => {
                self.stats.recognition_errors += 1;
                log::warn!("[{}] recognition failed: {}", self.settings.source_id, e);
                None
            }
        }
    }

    fn terminate(&mut self, reason: TerminationReason) {
        self.state = SessionState::Terminated;
        if self.termination.is_none() {
            self.termination = Some(reason);
        }
    }

    fn finish(mut self) -> SessionReport {
        self.source.close();
        if let Some(annotator) = &self.annotator {
            annotator.finish();
        }
        let dedup = self.router.dedup_stats();
        self.reporter.log_summary(&self.stats, dedup);
        SessionReport {
            source_id: self.settings.source_id.clone(),
            reason: self
                .termination
                .take()
                .unwrap_or(TerminationReason::Cancelled),
            stats: self.stats,
            dedup,
            elapsed: self.reporter.elapsed(),
        }
    }
}

fn mark_for(routed: &RoutedDetection) -> BoxMark {
    let kind = if routed.is_duplicate() {
        MarkKind::Duplicate
    } else if routed.observation.is_valid {
        MarkKind::Valid
    } else {
        MarkKind::Invalid
    };
    BoxMark {
        region: routed.observation.region,
        kind,
    }
}
