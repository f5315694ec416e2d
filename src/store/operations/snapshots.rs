use chrono::{DateTime, Utc};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::Transactional;

use crate::store::keys;
use crate::store::{map_tx_error, Store, StoreError};
use crate::wrapped::types::Snapshot;

type TxResult<T> = Result<T, ConflictableTransactionError<StoreError>>;

/// One entry of the `wrapped_by_expiry` index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryEntry {
    pub index_key: Vec<u8>,
    pub snapshot_key: Vec<u8>,
    pub expires_at_ms: i64,
}

fn decode_snapshot(raw: &[u8]) -> TxResult<Snapshot> {
    serde_json::from_slice(raw)
        .map_err(|e| ConflictableTransactionError::Abort(StoreError::Serialization(e)))
}

fn expiry_key_of(snapshot: &Snapshot) -> Result<String, StoreError> {
    keys::snapshot_expiry_key(
        snapshot.expires_at.timestamp_millis(),
        &snapshot.user_id,
        &snapshot.date,
    )
}

fn abort<T>(message: String) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(StoreError::Validation(message)))
}

/// Drop the owner entry of `snapshot`'s artifact if `snapshot_key` holds it.
fn disown_artifact(tx_owners: &TransactionalTree, snapshot: &Snapshot, snapshot_key: &[u8]) -> TxResult<()> {
    let Some(artifact_ref) = snapshot.artifact_ref.as_deref() else {
        return Ok(());
    };
    let owner_key = keys::artifact_key(artifact_ref).map_err(ConflictableTransactionError::Abort)?;
    if tx_owners
        .get(owner_key.as_bytes())?
        .is_some_and(|owner| owner.as_ref() == snapshot_key)
    {
        tx_owners.remove(owner_key.as_bytes())?;
    }
    Ok(())
}

impl Store {
    pub fn get_wrapped_snapshot(
        &self,
        user_id: &str,
        date: &str,
    ) -> Result<Option<Snapshot>, StoreError> {
        let key = keys::snapshot_key(user_id, date)?;
        match self.wrapped_snapshots.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// Swap in `snapshot` for its `(user_id, date)` key and return the record it
    /// superseded. Lookup, removal of the old record and its index entry, and the
    /// insert of the new pair commit together; concurrent writers on the same key
    /// conflict and are retried by sled, so the last committer wins.
    ///
    /// An attached artifact must exist and must not be owned by another key;
    /// the owner entry moves with the record in the same transaction.
    pub fn replace_wrapped_snapshot(
        &self,
        snapshot: &Snapshot,
    ) -> Result<Option<Snapshot>, StoreError> {
        let key = keys::snapshot_key(&snapshot.user_id, &snapshot.date)?;
        let index_key = expiry_key_of(snapshot)?;
        let claim = snapshot
            .artifact_ref
            .as_deref()
            .map(keys::artifact_key)
            .transpose()?;
        let bytes = Self::serialize(snapshot)?;

        (
            &self.wrapped_snapshots,
            &self.wrapped_by_expiry,
            &self.artifacts,
            &self.artifact_owners,
        )
            .transaction(|(tx_snapshots, tx_expiry, tx_artifacts, tx_owners)| {
                if let Some(artifact_key) = &claim {
                    if tx_artifacts.get(artifact_key.as_bytes())?.is_none() {
                        return abort(format!("artifact {artifact_key} does not exist"));
                    }
                    if let Some(owner) = tx_owners.get(artifact_key.as_bytes())? {
                        if owner.as_ref() != key.as_bytes() {
                            return abort(format!(
                                "artifact {artifact_key} is attached to {}",
                                String::from_utf8_lossy(&owner)
                            ));
                        }
                    }
                }

                let previous = match tx_snapshots.get(key.as_bytes())? {
                    Some(raw) => Some(decode_snapshot(&raw)?),
                    None => None,
                };

                if let Some(prev) = &previous {
                    let old_index_key =
                        expiry_key_of(prev).map_err(ConflictableTransactionError::Abort)?;
                    tx_expiry.remove(old_index_key.as_bytes())?;
                    disown_artifact(tx_owners, prev, key.as_bytes())?;
                }

                tx_snapshots.insert(key.as_bytes(), bytes.as_slice())?;
                tx_expiry.insert(index_key.as_bytes(), key.as_bytes())?;
                if let Some(artifact_key) = &claim {
                    tx_owners.insert(artifact_key.as_bytes(), key.as_bytes())?;
                }
                Ok(previous)
            })
            .map_err(map_tx_error)
    }

    /// Remove the record for `(user_id, date)` with its index and owner entries.
    pub fn remove_wrapped_snapshot(
        &self,
        user_id: &str,
        date: &str,
    ) -> Result<Option<Snapshot>, StoreError> {
        let key = keys::snapshot_key(user_id, date)?;

        (&self.wrapped_snapshots, &self.wrapped_by_expiry, &self.artifact_owners)
            .transaction(|(tx_snapshots, tx_expiry, tx_owners)| {
                let Some(raw) = tx_snapshots.remove(key.as_bytes())? else {
                    return Ok(None);
                };
                let removed = decode_snapshot(&raw)?;
                let index_key =
                    expiry_key_of(&removed).map_err(ConflictableTransactionError::Abort)?;
                tx_expiry.remove(index_key.as_bytes())?;
                disown_artifact(tx_owners, &removed, key.as_bytes())?;
                Ok(Some(removed))
            })
            .map_err(map_tx_error)
    }

    /// Index entries whose `expires_at` is strictly before `now`, oldest first.
    pub fn expired_snapshot_entries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiryEntry>, StoreError> {
        let bound = keys::snapshot_expiry_bound(now.timestamp_millis());
        let mut entries = Vec::new();
        for item in self.wrapped_by_expiry.range(..bound.as_bytes()) {
            let (index_key, snapshot_key) = item?;
            let Some(expires_at_ms) = keys::parse_index_timestamp_ms(&index_key) else {
                tracing::warn!(
                    key = %String::from_utf8_lossy(&index_key),
                    "Skipping malformed expiry index key"
                );
                continue;
            };
            entries.push(ExpiryEntry {
                index_key: index_key.to_vec(),
                snapshot_key: snapshot_key.to_vec(),
                expires_at_ms,
            });
        }
        Ok(entries)
    }

    /// Remove the record an expiry entry points at, provided it is still the
    /// same record (a replacement carries a later `expires_at`). The entry is
    /// always dropped. Returns the reclaimed record, if any.
    pub fn remove_expired_snapshot(
        &self,
        entry: &ExpiryEntry,
    ) -> Result<Option<Snapshot>, StoreError> {
        (&self.wrapped_snapshots, &self.wrapped_by_expiry, &self.artifact_owners)
            .transaction(|(tx_snapshots, tx_expiry, tx_owners)| {
                tx_expiry.remove(entry.index_key.as_slice())?;

                let Some(raw) = tx_snapshots.get(entry.snapshot_key.as_slice())? else {
                    return Ok(None);
                };
                let snapshot = decode_snapshot(&raw)?;
                if snapshot.expires_at.timestamp_millis() != entry.expires_at_ms {
                    return Ok(None);
                }

                tx_snapshots.remove(entry.snapshot_key.as_slice())?;
                disown_artifact(tx_owners, &snapshot, &entry.snapshot_key)?;
                Ok(Some(snapshot))
            })
            .map_err(map_tx_error)
    }

    pub fn list_user_snapshots(&self, user_id: &str) -> Result<Vec<Snapshot>, StoreError> {
        let prefix = keys::snapshot_prefix(user_id)?;
        let mut snapshots = Vec::new();
        for item in self.wrapped_snapshots.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            snapshots.push(Self::deserialize::<Snapshot>(&value)?);
        }
        Ok(snapshots)
    }

    pub fn count_wrapped_snapshots(&self) -> usize {
        self.wrapped_snapshots.len()
    }

    /// Recreate every expiry index entry from the primary records.
    pub fn rebuild_snapshot_expiry_index(&self) -> Result<usize, StoreError> {
        self.wrapped_by_expiry.clear()?;
        let mut rebuilt = 0usize;
        for item in self.wrapped_snapshots.iter() {
            let (key, value) = item?;
            let snapshot: Snapshot = Self::deserialize(&value)?;
            let index_key = expiry_key_of(&snapshot)?;
            self.wrapped_by_expiry.insert(index_key.as_bytes(), key)?;
            rebuilt += 1;
        }
        Ok(rebuilt)
    }

    /// Recreate the artifact owner index from the primary records. When legacy
    /// data shares one ref across keys, the first key in key order keeps it.
    pub fn rebuild_artifact_owner_index(&self) -> Result<usize, StoreError> {
        self.artifact_owners.clear()?;
        let mut owned = 0usize;
        for item in self.wrapped_snapshots.iter() {
            let (key, value) = item?;
            let snapshot: Snapshot = Self::deserialize(&value)?;
            let Some(artifact_ref) = snapshot.artifact_ref.as_deref() else {
                continue;
            };
            let owner_key = keys::artifact_key(artifact_ref)?;
            let claimed = self
                .artifact_owners
                .compare_and_swap(owner_key.as_bytes(), None as Option<&[u8]>, Some(key.clone()))?;
            if claimed.is_err() {
                tracing::warn!(
                    artifact_ref,
                    snapshot_key = %String::from_utf8_lossy(&key),
                    "Artifact already owned by another snapshot"
                );
                continue;
            }
            owned += 1;
        }
        Ok(owned)
    }
}
