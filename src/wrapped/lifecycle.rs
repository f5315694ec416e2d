use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::types::{AggregateStats, Snapshot};
use super::WrappedError;
use crate::artifacts::ArtifactStore;
use crate::clock::parse_calendar_date;
use crate::store::Store;

/// Owns the create/replace/delete transitions of the per-day snapshot record
/// and the artifact each record references.
#[derive(Clone)]
pub struct SnapshotLifecycle {
    store: Arc<Store>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl SnapshotLifecycle {
    pub fn new(store: Arc<Store>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { store, artifacts }
    }

    /// Persist the snapshot for `(user_id, date)`, superseding any existing one.
    ///
    /// The record swap commits first; the superseded artifact is released
    /// afterwards, so a crash in between can only leave an unreferenced blob.
    /// An `artifact_ref` must name a stored artifact that no other key owns.
    pub fn create_or_replace(
        &self,
        user_id: &str,
        date: &str,
        design_index: u32,
        artifact_ref: Option<String>,
        stats: AggregateStats,
        now: DateTime<Utc>,
    ) -> Result<Snapshot, WrappedError> {
        validate_key(user_id, date)?;
        let artifact_ref = artifact_ref.filter(|r| !r.is_empty());

        let snapshot = Snapshot::new(user_id, date, design_index, artifact_ref, stats, now);
        let previous = self.store.replace_wrapped_snapshot(&snapshot)?;

        match previous {
            Some(prev) => {
                debug!(user_id, date, previous_id = %prev.id, "Replaced wrapped snapshot");
                if prev.artifact_ref != snapshot.artifact_ref {
                    self.release_artifact(prev.artifact_ref.as_deref());
                }
            }
            None => debug!(user_id, date, "Created wrapped snapshot"),
        }

        Ok(snapshot)
    }

    /// Remove the snapshot for `(user_id, date)`. Returns whether one existed.
    pub fn delete(&self, user_id: &str, date: &str) -> Result<bool, WrappedError> {
        validate_key(user_id, date)?;

        let Some(removed) = self.store.remove_wrapped_snapshot(user_id, date)? else {
            return Ok(false);
        };
        self.release_artifact(removed.artifact_ref.as_deref());
        Ok(true)
    }

    pub(crate) fn release_artifact(&self, artifact_ref: Option<&str>) {
        let Some(artifact_ref) = artifact_ref else {
            return;
        };
        if let Err(e) = self.artifacts.release(artifact_ref) {
            warn!(artifact_ref, error = %e, "Failed to release wrapped artifact");
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }
}

fn validate_key(user_id: &str, date: &str) -> Result<(), WrappedError> {
    if user_id.trim().is_empty() {
        return Err(WrappedError::Invalid("userId must not be empty".to_string()));
    }
    if user_id.contains(':') {
        return Err(WrappedError::Invalid("userId must not contain ':'".to_string()));
    }
    parse_calendar_date(date).map_err(|e| WrappedError::Invalid(e.to_string()))?;
    Ok(())
}
