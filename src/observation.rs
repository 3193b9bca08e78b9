use chrono::{DateTime, Local};

use crate::frame::BoundingRegion;
use crate::plate::EMPTY_SENTINEL;
use crate::storage::ObservationRecord;

/// One detected and recognized plate candidate in one frame. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub raw_text: String,
    pub canonical_text: String,
    pub is_valid: bool,
    pub detection_confidence: f32,
    pub recognition_confidence: f32,
    /// Already clamped to the frame.
    pub region: BoundingRegion,
    pub source_id: String,
    pub timestamp: DateTime<Local>,
    pub frame_index: u64,
}

impl Observation {
    pub fn is_empty_read(&self) -> bool {
        self.canonical_text == EMPTY_SENTINEL
    }

    /// Datastore row for this observation, filed under `artifact_path`.
    pub fn to_record(&self, artifact_path: &str) -> ObservationRecord {
        ObservationRecord {
            source_id: self.source_id.clone(),
            plate_text: self.canonical_text.clone(),
            artifact_path: artifact_path.to_string(),
            detection_confidence: self.detection_confidence,
            recognition_confidence: self.recognition_confidence,
            is_valid: self.is_valid,
            timestamp: self.timestamp,
        }
    }
}
