//! Session counters and periodic status reporting.
//!
//! Counters only ever increase and are reset only when a new session starts.
//! Nothing in the pipeline reads them to make a decision.

use std::time::{Duration, Instant};

use crate::dedup::DedupStats;

pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_seen: u64,
    pub frames_processed: u64,
    pub detections: u64,
    pub valid: u64,
    pub invalid: u64,
    pub empty: u64,
    pub duplicates: u64,
    pub persisted: u64,
    pub persist_failures: u64,
    pub recognition_errors: u64,
    pub detection_errors: u64,
    pub reconnects: u64,
}

impl SessionStats {
    pub fn valid_pct(&self) -> f64 {
        percent(self.valid, self.detections)
    }

    pub fn invalid_pct(&self) -> f64 {
        percent(self.invalid, self.detections)
    }

    /// Detections per processed frame.
    pub fn detections_per_frame(&self) -> f64 {
        if self.frames_processed == 0 {
            0.0
        } else {
            self.detections as f64 / self.frames_processed as f64
        }
    }

    /// Frames read per second over `elapsed`.
    pub fn throughput_fps(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.frames_seen as f64 / secs
        }
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Emits a status line every `interval` and the final summary on shutdown.
#[derive(Debug)]
pub struct StatsReporter {
    source_id: String,
    started: Instant,
    last_report: Instant,
    interval: Duration,
}

impl StatsReporter {
    pub fn new(source_id: &str, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            source_id: source_id.to_string(),
            started: now,
            last_report: now,
            interval,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Log a status line if the interval has passed. Returns true when it did.
    pub fn maybe_report(&mut self, stats: &SessionStats, dedup: DedupStats) -> bool {
        if self.last_report.elapsed() < self.interval {
            return false;
        }
        log::info!("{}", self.status_line(stats, dedup));
        self.last_report = Instant::now();
        true
    }

    pub fn status_line(&self, stats: &SessionStats, dedup: DedupStats) -> String {
        format!(
            "[{}] frames={} processed={} detections={} valid={} invalid={} dup={} saved={} \
             tracked={} fps={:.1}",
            self.source_id,
            stats.frames_seen,
            stats.frames_processed,
            stats.detections,
            stats.valid,
            stats.invalid,
            stats.duplicates,
            stats.persisted,
            dedup.tracked,
            stats.throughput_fps(self.elapsed()),
        )
    }

    pub fn summary(&self, stats: &SessionStats, dedup: DedupStats) -> Vec<String> {
        let elapsed = self.elapsed();
        vec![
            format!(
                "[{}] session summary after {:.1}s",
                self.source_id,
                elapsed.as_secs_f64()
            ),
            format!(
                "  frames: seen={} processed={} avg_fps={:.2} reconnects={}",
                stats.frames_seen,
                stats.frames_processed,
                stats.throughput_fps(elapsed),
                stats.reconnects
            ),
            format!(
                "  detections: total={} valid={} ({:.1}%) invalid={} ({:.1}%) empty={} per_frame={:.2}",
                stats.detections,
                stats.valid,
                stats.valid_pct(),
                stats.invalid,
                stats.invalid_pct(),
                stats.empty,
                stats.detections_per_frame()
            ),
            format!(
                "  duplicates filtered={} tracked={} saved={} save_failures={}",
                stats.duplicates, dedup.tracked, stats.persisted, stats.persist_failures
            ),
            format!(
                "  errors: recognition={} detection={}",
                stats.recognition_errors, stats.detection_errors
            ),
        ]
    }

    pub fn log_summary(&self, stats: &SessionStats, dedup: DedupStats) {
        for line in self.summary(stats, dedup) {
            log::info!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_rates_handle_zero() {
        let stats = SessionStats::default();
        assert_eq!(stats.valid_pct(), 0.0);
        assert_eq!(stats.detections_per_frame(), 0.0);
        assert_eq!(stats.throughput_fps(Duration::ZERO), 0.0);
    }

    #[test]
    fn derived_rates() {
        let stats = SessionStats {
            frames_seen: 100,
            frames_processed: 20,
            detections: 10,
            valid: 7,
            invalid: 3,
            ..SessionStats::default()
        };
        assert!((stats.valid_pct() - 70.0).abs() < 1e-9);
        assert!((stats.invalid_pct() - 30.0).abs() < 1e-9);
        assert!((stats.detections_per_frame() - 0.5).abs() < 1e-9);
        assert!((stats.throughput_fps(Duration::from_secs(10)) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn reporter_waits_for_interval() {
        let mut reporter = StatsReporter::new("cam-1", Duration::from_secs(3600));
        assert!(!reporter.maybe_report(&SessionStats::default(), DedupStats::default()));

        let mut eager = StatsReporter::new("cam-1", Duration::ZERO);
        assert!(eager.maybe_report(&SessionStats::default(), DedupStats::default()));
    }

    #[test]
    fn summary_mentions_source() {
        let reporter = StatsReporter::new("gate-2", DEFAULT_STATUS_INTERVAL);
        let lines = reporter.summary(&SessionStats::default(), DedupStats::default());
        assert!(lines[0].contains("gate-2"));
        assert_eq!(lines.len(), 5);
    }
}
