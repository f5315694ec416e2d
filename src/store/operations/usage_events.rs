use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;

use crate::store::keys;
use crate::store::{map_tx_error, Store, StoreError};
use crate::wrapped::types::UsageEvent;

impl Store {
    /// Persist an event with its time-index and id-index entries in one
    /// transaction. Re-recording an event id replaces the stored copy, also
    /// when `created_at` (or the user) changed, so an id is counted once.
    pub fn record_usage_event(&self, event: &UsageEvent) -> Result<(), StoreError> {
        if !event.cost.is_finite() || event.cost < 0.0 {
            return Err(StoreError::Validation(format!(
                "event {} has invalid cost {}",
                event.id, event.cost
            )));
        }

        let ts = event.created_at.timestamp_millis();
        let key = keys::usage_event_key(&event.user_id, ts, &event.id)?;
        let index_key = keys::usage_events_by_time_key(ts, &event.user_id, &event.id)?;
        let id_key = keys::usage_event_id_key(&event.id)?;
        let bytes = Self::serialize(event)?;
        let user_id_bytes = event.user_id.as_bytes().to_vec();

        (&self.usage_events, &self.usage_events_by_time, &self.usage_event_ids)
            .transaction(|(tx_events, tx_index, tx_ids)| {
                if let Some(old_key) = tx_ids.get(id_key.as_bytes())? {
                    if old_key.as_ref() != key.as_bytes() {
                        if let Some(raw) = tx_events.remove(old_key)? {
                            let old: UsageEvent = serde_json::from_slice(&raw).map_err(|e| {
                                ConflictableTransactionError::Abort(StoreError::Serialization(e))
                            })?;
                            let old_index_key = keys::usage_events_by_time_key(
                                old.created_at.timestamp_millis(),
                                &old.user_id,
                                &old.id,
                            )
                            .map_err(ConflictableTransactionError::Abort)?;
                            tx_index.remove(old_index_key.as_bytes())?;
                        }
                    }
                }

                tx_events.insert(key.as_bytes(), bytes.as_slice())?;
                tx_index.insert(index_key.as_bytes(), user_id_bytes.as_slice())?;
                tx_ids.insert(id_key.as_bytes(), key.as_bytes())?;
                Ok(())
            })
            .map_err(map_tx_error)
    }

    /// Recreate the id index from the primary event records. Legacy
    /// duplicates of one id keep their rows; the last key in key order wins
    /// the index entry and replaces them on the next re-record.
    pub fn rebuild_usage_event_id_index(&self) -> Result<usize, StoreError> {
        self.usage_event_ids.clear()?;
        let mut indexed = 0usize;
        for item in self.usage_events.iter() {
            let (key, value) = item?;
            let event: UsageEvent = Self::deserialize(&value)?;
            let id_key = keys::usage_event_id_key(&event.id)?;
            self.usage_event_ids.insert(id_key.as_bytes(), key)?;
            indexed += 1;
        }
        Ok(indexed)
    }

    /// Events of one user created at or after `since`, oldest first.
    pub fn get_user_events_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>, StoreError> {
        let start = keys::usage_event_since_key(user_id, since.timestamp_millis())?;
        let prefix = keys::usage_event_prefix(user_id)?;
        let mut events = Vec::new();
        for item in self.usage_events.range(start.as_bytes()..) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            events.push(Self::deserialize::<UsageEvent>(&value)?);
        }
        Ok(events)
    }

    pub fn get_user_events(&self, user_id: &str) -> Result<Vec<UsageEvent>, StoreError> {
        let prefix = keys::usage_event_prefix(user_id)?;
        let mut events = Vec::new();
        for item in self.usage_events.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            events.push(Self::deserialize::<UsageEvent>(&value)?);
        }
        Ok(events)
    }

    /// Distinct users with at least one event at or after `cutoff`
    /// (uses the `usage_events_by_time` index).
    pub fn active_users_since(&self, cutoff: DateTime<Utc>) -> Result<HashSet<String>, StoreError> {
        let start_key = keys::usage_events_by_time_since_key(cutoff.timestamp_millis());
        let mut active_users = HashSet::new();
        for item in self.usage_events_by_time.range(start_key.as_bytes()..) {
            let (_, value) = item?;
            match String::from_utf8(value.to_vec()) {
                Ok(user_id) => {
                    active_users.insert(user_id);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping event index entry with invalid UTF-8");
                }
            }
        }
        Ok(active_users)
    }

    pub fn count_usage_events(&self) -> usize {
        self.usage_events.len()
    }
}
