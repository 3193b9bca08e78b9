//! Per-detection routing.
//!
//! Every detection goes through the same fixed sequence: normalize, validate,
//! duplicate check, artifact placement, persist. Duplicate suppression sees
//! canonical text only. Validity is settled, and counted, before the
//! duplicate check can short-circuit.

use chrono::{DateTime, Local};
use std::time::Instant;

use crate::dedup::{DedupDecision, DedupStats, DuplicateFilter, DuplicateMatch};
use crate::detect::Recognition;
use crate::frame::{BoundingRegion, Frame};
use crate::observation::Observation;
use crate::persist::PersistenceGateway;
use crate::plate::PlateText;
use crate::stats::SessionStats;

/// Routing switches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoutePolicy {
    /// Only valid plates reach the datastore.
    pub persist_only_valid: bool,
    /// Save crops of admitted observations that are kept out of the datastore.
    pub keep_rejected_crops: bool,
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self {
            persist_only_valid: true,
            keep_rejected_crops: false,
        }
    }
}

/// One detector region with whatever the recognizer made of it.
pub struct Candidate<'a> {
    /// Clamped crop handed to the recognizer.
    pub crop: &'a Frame,
    pub region: BoundingRegion,
    pub detection_confidence: f32,
    /// `None` when recognition failed or read nothing.
    pub recognition: Option<Recognition>,
}

/// Where a detection came from.
#[derive(Clone, Copy, Debug)]
pub struct RouteContext<'a> {
    pub source_id: &'a str,
    pub frame_index: u64,
    pub timestamp: DateTime<Local>,
    /// Monotonic instant used for duplicate windows.
    pub now: Instant,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RouteOutcome {
    /// Seen too recently. Counted, never persisted.
    Duplicate(DuplicateMatch),
    Persisted,
    /// The datastore or artifact write failed. The observation is dropped.
    PersistFailed,
    /// Kept out of the datastore by policy; the crop was saved under `key`.
    Archived { key: String },
    /// Kept out of the datastore by policy.
    Skipped,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoutedDetection {
    pub observation: Observation,
    pub outcome: RouteOutcome,
}

impl RoutedDetection {
    pub fn is_duplicate(&self) -> bool {
        matches!(self.outcome, RouteOutcome::Duplicate(_))
    }
}

pub struct DetectionRouter {
    gateway: PersistenceGateway,
    /// `None` disables duplicate suppression.
    filter: Option<DuplicateFilter>,
    policy: RoutePolicy,
}

impl DetectionRouter {
    pub fn new(
        gateway: PersistenceGateway,
        filter: Option<DuplicateFilter>,
        policy: RoutePolicy,
    ) -> Self {
        Self {
            gateway,
            filter,
            policy,
        }
    }

    pub fn policy(&self) -> RoutePolicy {
        self.policy
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    pub fn dedup_stats(&self) -> DedupStats {
        self.filter
            .as_ref()
            .map(DuplicateFilter::stats)
            .unwrap_or_default()
    }

    pub fn route(
        &mut self,
        candidate: Candidate<'_>,
        ctx: &RouteContext<'_>,
        stats: &mut SessionStats,
    ) -> RoutedDetection {
        stats.detections += 1;

        let (plate, recognition_confidence) = match &candidate.recognition {
            Some(r) if !r.is_blank() => (PlateText::parse(&r.text), r.confidence),
            _ => {
                stats.empty += 1;
                (PlateText::empty(), 0.0)
            }
        };
        if plate.is_valid {
            stats.valid += 1;
        } else {
            stats.invalid += 1;
        }

        let observation = Observation {
            raw_text: plate.raw,
            canonical_text: plate.canonical,
            is_valid: plate.is_valid,
            detection_confidence: candidate.detection_confidence,
            recognition_confidence,
            region: candidate.region,
            source_id: ctx.source_id.to_string(),
            timestamp: ctx.timestamp,
            frame_index: ctx.frame_index,
        };

        if let Some(filter) = self.filter.as_mut() {
            if let DedupDecision::Suppressed(found) =
                filter.observe(&observation.canonical_text, ctx.now)
            {
                stats.duplicates += 1;
                log::debug!(
                    "[{}] DUP {} ~ {} ({:.2}, {:.1}s ago) frame={}",
                    ctx.source_id,
                    observation.canonical_text,
                    found.matched,
                    found.similarity,
                    found.age.as_secs_f64(),
                    ctx.frame_index
                );
                return RoutedDetection {
                    observation,
                    outcome: RouteOutcome::Duplicate(found),
                };
            }
        }

        let eligible = !self.policy.persist_only_valid || observation.is_valid;
        let outcome = if eligible {
            if self.gateway.persist(&observation, candidate.crop) {
                stats.persisted += 1;
                log_persisted(&observation);
                RouteOutcome::Persisted
            } else {
                stats.persist_failures += 1;
                RouteOutcome::PersistFailed
            }
        } else if self.policy.keep_rejected_crops {
            match self.gateway.archive(&observation, candidate.crop) {
                Some(key) => RouteOutcome::Archived { key },
                None => RouteOutcome::Skipped,
            }
        } else {
            log::debug!(
                "[{}] not stored: {} (invalid)",
                ctx.source_id,
                observation.canonical_text
            );
            RouteOutcome::Skipped
        };

        RoutedDetection {
            observation,
            outcome,
        }
    }
}

fn log_persisted(observation: &Observation) {
    let label = if observation.is_valid { "VALID" } else { "INVALID" };
    if observation.is_empty_read() {
        log::debug!("[{}] stored empty read", observation.source_id);
        return;
    }
    log::info!(
        "[{}] {}: {} | det {:.3} | ocr {:.2}",
        observation.source_id,
        label,
        observation.canonical_text,
        observation.detection_confidence,
        observation.recognition_confidence
    );
}
