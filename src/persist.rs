//! Persistence gateway between the router and the datastore.
//!
//! `persist` is the only hot-path entry point. It writes the crop artifact,
//! inserts the row, and reports `false` on any failure instead of raising.
//! A row is never inserted without its artifact, and an artifact whose
//! insert failed is removed again, so the datastore and the artifact tree
//! stay in step. There is no retry queue: a failed observation is dropped.
//!
//! The administrative operations are synchronous and fallible; they run at
//! startup or from `plate_admin`, never inside the session loop.

use std::time::Duration;

use crate::artifact::ArtifactStore;
use crate::error::StoreError;
use crate::frame::Frame;
use crate::observation::Observation;
use crate::storage::{HourlyCounts, PlateStore, StoreStats, StoredObservation, TimeRange};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Rows and artifacts removed by one administrative delete.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub rows: usize,
    pub artifacts_removed: usize,
}

pub struct PersistenceGateway {
    store: Box<dyn PlateStore>,
    artifacts: ArtifactStore,
}

impl PersistenceGateway {
    pub fn new(store: Box<dyn PlateStore>, artifacts: ArtifactStore) -> Self {
        Self { store, artifacts }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Startup reachability check. Callers treat an error as fatal.
    pub fn ping(&self) -> Result<(), StoreError> {
        self.store.ping()
    }

    /// Save the crop and insert the observation. Never fails loudly.
    pub fn persist(&mut self, observation: &Observation, crop: &Frame) -> bool {
        match self.try_persist(observation, crop) {
            Ok((id, key)) => {
                log::debug!("[{}] stored observation {} at {}", observation.source_id, id, key);
                true
            }
            Err(e) => {
                log::warn!(
                    "[{}] failed to persist {}: {}",
                    observation.source_id,
                    observation.canonical_text,
                    e
                );
                false
            }
        }
    }

    fn try_persist(
        &mut self,
        observation: &Observation,
        crop: &Frame,
    ) -> Result<(i64, String), StoreError> {
        let placement = self.artifacts.placement(
            observation.is_valid,
            &observation.canonical_text,
            &observation.source_id,
            observation.timestamp,
        );
        self.artifacts.write(&placement, crop)?;
        match self
            .store
            .insert_observation(&observation.to_record(&placement.key))
        {
            Ok(id) => Ok((id, placement.key)),
            Err(e) => {
                if let Err(cleanup) = self.artifacts.remove(&placement.key) {
                    log::warn!("orphaned artifact {}: {}", placement.key, cleanup);
                }
                Err(e)
            }
        }
    }

    /// Save the crop without a datastore row, for observations the policy
    /// keeps out of the datastore. Returns the artifact key.
    pub fn archive(&mut self, observation: &Observation, crop: &Frame) -> Option<String> {
        let placement = self.artifacts.placement(
            observation.is_valid,
            &observation.canonical_text,
            &observation.source_id,
            observation.timestamp,
        );
        match self.artifacts.write(&placement, crop) {
            Ok(()) => Some(placement.key),
            Err(e) => {
                log::warn!("[{}] failed to archive crop: {}", observation.source_id, e);
                None
            }
        }
    }

    /// Delete observations older than `days` days along with their artifacts.
    pub fn cleanup_older_than(&self, days: u32) -> Result<DeleteReport, StoreError> {
        let age = Duration::from_secs(u64::from(days) * SECS_PER_DAY);
        let paths = self.store.delete_older_than(age)?;
        Ok(self.remove_artifacts(paths))
    }

    pub fn delete_by_text(&self, plate_text: &str) -> Result<DeleteReport, StoreError> {
        let paths = self.store.delete_by_text(plate_text)?;
        Ok(self.remove_artifacts(paths))
    }

    pub fn delete_all(&self) -> Result<DeleteReport, StoreError> {
        let paths = self.store.delete_all()?;
        Ok(self.remove_artifacts(paths))
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        self.store.stats()
    }

    pub fn find_observations(
        &self,
        plate_pattern: &str,
        range: TimeRange,
        limit: usize,
    ) -> Result<Vec<StoredObservation>, StoreError> {
        self.store.find_observations(plate_pattern, range, limit)
    }

    pub fn hourly_counts(&self, range: TimeRange) -> Result<HourlyCounts, StoreError> {
        self.store.hourly_counts(range)
    }

    fn remove_artifacts(&self, keys: Vec<String>) -> DeleteReport {
        let mut report = DeleteReport {
            rows: keys.len(),
            artifacts_removed: 0,
        };
        for key in keys {
            match self.artifacts.remove(&key) {
                Ok(()) => report.artifacts_removed += 1,
                Err(e) => log::warn!("could not remove artifact {}: {}", key, e),
            }
        }
        report
    }
}
