use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::lifecycle::SnapshotLifecycle;
use super::WrappedError;

/// Reclaim every snapshot whose `expires_at` is strictly before `now`.
///
/// Entries are taken from the expiry index as of the scan. A record replaced
/// after the scan carries a later `expires_at` and is left alone; only its
/// stale index entry is dropped.
pub fn sweep_expired(
    lifecycle: &SnapshotLifecycle,
    now: DateTime<Utc>,
) -> Result<usize, WrappedError> {
    let entries = lifecycle.store().expired_snapshot_entries(now)?;
    if entries.is_empty() {
        return Ok(0);
    }

    let mut reclaimed = 0usize;
    let mut stale = 0usize;
    for entry in &entries {
        match lifecycle.store().remove_expired_snapshot(entry)? {
            Some(snapshot) => {
                lifecycle.release_artifact(snapshot.artifact_ref.as_deref());
                reclaimed += 1;
            }
            None => stale += 1,
        }
    }

    if stale > 0 {
        debug!(stale, "Dropped stale wrapped expiry entries");
    }
    if reclaimed > 0 {
        info!(reclaimed, "Swept expired wrapped snapshots");
    }
    Ok(reclaimed)
}
