use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactStore;
use crate::clock::{Clock, TimeSource};
use crate::config::{WorkerConfig, WrappedConfig};
use crate::store::{Store, StoreError};
use crate::wrapped::aggregator::aggregate_window;
use crate::wrapped::lifecycle::SnapshotLifecycle;
use crate::wrapped::sweeper;
use crate::wrapped::types::{window_duration, AggregateStats, Snapshot};
use crate::wrapped::WrappedError;

/// Today's snapshot as served to its owner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotView {
    pub id: String,
    pub user_id: String,
    pub date: String,
    pub design_index: u32,
    pub image_url: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub generated_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    pub stats: AggregateStats,
    pub time_until_expiry: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub next_generation_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Countdown {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub next_generation_at: DateTime<Utc>,
    pub time_until_next: i64,
    pub current_date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationReport {
    pub date: String,
    pub eligible: usize,
    pub generated: usize,
    pub failed: usize,
}

pub fn artifact_url(artifact_ref: &str) -> String {
    format!("/api/artifacts/{artifact_ref}")
}

/// Read API plus the batch/internal operations over wrapped snapshots.
#[derive(Clone)]
pub struct WrappedService {
    lifecycle: SnapshotLifecycle,
    clock: Clock,
    time: Arc<dyn TimeSource>,
    generation_hour: u32,
    generation_minute: u32,
    generation_concurrency: usize,
    design_count: u32,
}

impl WrappedService {
    pub fn new(
        store: Arc<Store>,
        artifacts: Arc<dyn ArtifactStore>,
        clock: Clock,
        time: Arc<dyn TimeSource>,
        worker: &WorkerConfig,
        wrapped: &WrappedConfig,
    ) -> Self {
        Self {
            lifecycle: SnapshotLifecycle::new(store, artifacts),
            clock,
            time,
            generation_hour: worker.generation_hour,
            generation_minute: worker.generation_minute,
            generation_concurrency: worker.generation_concurrency.max(1),
            design_count: wrapped.design_count.max(1),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        self.lifecycle.store()
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        self.lifecycle.artifacts()
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    pub fn next_generation_after(&self, instant: DateTime<Utc>) -> Result<DateTime<Utc>, WrappedError> {
        Ok(self
            .clock
            .next_daily_run_after(instant, self.generation_hour, self.generation_minute)?)
    }

    /// Today's snapshot for `user_id`, or `None` when the user is unknown or
    /// nothing has been generated for the current calendar day.
    pub fn get_snapshot(&self, user_id: &str) -> Result<Option<SnapshotView>, WrappedError> {
        let now = self.now();
        if !self.user_exists(user_id)? {
            return Ok(None);
        }
        let today = self.clock.calendar_date(now);
        let Some(snapshot) = self.store().get_wrapped_snapshot(user_id, &today)? else {
            return Ok(None);
        };
        let next_generation_at = self.next_generation_after(now)?;
        Ok(Some(self.view(snapshot, now, next_generation_at)))
    }

    fn view(
        &self,
        snapshot: Snapshot,
        now: DateTime<Utc>,
        next_generation_at: DateTime<Utc>,
    ) -> SnapshotView {
        SnapshotView {
            time_until_expiry: snapshot.time_until_expiry_ms(now),
            image_url: snapshot.artifact_ref.as_deref().map(artifact_url),
            id: snapshot.id,
            user_id: snapshot.user_id,
            date: snapshot.date,
            design_index: snapshot.design_index,
            generated_at: snapshot.generated_at,
            expires_at: snapshot.expires_at,
            stats: snapshot.stats,
            next_generation_at,
        }
    }

    /// On-demand window stats; `None` only when the user cannot be resolved.
    pub fn get_stats(&self, user_id: &str) -> Result<Option<AggregateStats>, WrappedError> {
        if !self.user_exists(user_id)? {
            return Ok(None);
        }
        self.compute_window_stats(user_id, self.now()).map(Some)
    }

    /// An id that cannot form a store key was never upserted, so it is
    /// unresolvable rather than invalid.
    fn user_exists(&self, user_id: &str) -> Result<bool, WrappedError> {
        match self.store().get_user_by_id(user_id) {
            Ok(user) => Ok(user.is_some()),
            Err(StoreError::Validation(reason)) => {
                debug!(user_id, %reason, "Unresolvable user id");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn countdown(&self) -> Result<Countdown, WrappedError> {
        let now = self.now();
        let next_generation_at = self.next_generation_after(now)?;
        Ok(Countdown {
            next_generation_at,
            time_until_next: (next_generation_at - now).num_milliseconds(),
            current_date: self.clock.calendar_date(now),
        })
    }

    /// Aggregate the user's rolling window as of `now`. Unknown users yield
    /// all-zero stats.
    pub fn compute_window_stats(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AggregateStats, WrappedError> {
        let events = self
            .store()
            .get_user_events_since(user_id, now - window_duration())?;
        Ok(aggregate_window(&events, now))
    }

    pub fn active_users(&self, cutoff: DateTime<Utc>) -> Result<HashSet<String>, WrappedError> {
        Ok(self.store().active_users_since(cutoff)?)
    }

    pub fn create_or_replace(
        &self,
        user_id: &str,
        date: &str,
        design_index: u32,
        artifact_ref: Option<String>,
        stats: AggregateStats,
        now: DateTime<Utc>,
    ) -> Result<Snapshot, WrappedError> {
        self.lifecycle
            .create_or_replace(user_id, date, design_index, artifact_ref, stats, now)
    }

    pub fn delete_snapshot(&self, user_id: &str, date: &str) -> Result<bool, WrappedError> {
        self.lifecycle.delete(user_id, date)
    }

    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, WrappedError> {
        sweeper::sweep_expired(&self.lifecycle, now)
    }

    fn pick_design_index(&self) -> u32 {
        rand::thread_rng().gen_range(0..self.design_count)
    }

    /// Generate today's snapshot for one user from their window as of `now`.
    pub fn generate_for_user(
        &self,
        user_id: &str,
        date: &str,
        now: DateTime<Utc>,
    ) -> Result<Snapshot, WrappedError> {
        let stats = self.compute_window_stats(user_id, now)?;
        let design_index = self.pick_design_index();
        self.create_or_replace(user_id, date, design_index, None, stats, now)
    }

    /// Batch run: every user active in the last window gets a fresh snapshot
    /// for the calendar day of `now`. Per-user failures are counted, not fatal.
    pub async fn generate_all(&self, now: DateTime<Utc>) -> Result<GenerationReport, WrappedError> {
        let date = self.clock.calendar_date(now);
        let mut users: Vec<String> = self
            .active_users(now - window_duration())?
            .into_iter()
            .collect();
        users.sort();

        let mut report = GenerationReport {
            date: date.clone(),
            eligible: users.len(),
            ..GenerationReport::default()
        };
        if users.is_empty() {
            info!(date = %date, "No active users for wrapped generation");
            return Ok(report);
        }

        let semaphore = Arc::new(Semaphore::new(self.generation_concurrency));
        let mut handles = Vec::with_capacity(users.len());

        for user_id in users {
            let sem = semaphore.clone();
            let service = self.clone();
            let date = date.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| WrappedError::Task(e.to_string()))?;
                let result = service.generate_for_user(&user_id, &date, now);
                if let Err(e) = &result {
                    warn!(user_id = %user_id, error = %e, "Wrapped generation failed for user");
                }
                result
            }));
        }

        for handle in futures::future::join_all(handles).await {
            match handle {
                Ok(Ok(snapshot)) => {
                    debug!(user_id = %snapshot.user_id, "Generated wrapped snapshot");
                    report.generated += 1;
                }
                Ok(Err(_)) => report.failed += 1,
                Err(e) => {
                    warn!(error = %e, "Wrapped generation task panicked");
                    report.failed += 1;
                }
            }
        }

        info!(
            date = %report.date,
            eligible = report.eligible,
            generated = report.generated,
            failed = report.failed,
            "Wrapped generation complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    use super::*;
    use crate::artifacts::SledArtifactStore;
    use crate::clock::FixedTimeSource;
    use crate::store::operations::users::User;
    use crate::wrapped::types::UsageEvent;

    fn service_at(dir: &tempfile::TempDir, now: DateTime<Utc>) -> WrappedService {
        let store = Arc::new(Store::open(dir.path().join("svc-db").to_str().unwrap()).unwrap());
        let artifacts = Arc::new(SledArtifactStore::from_store(&store));
        WrappedService::new(
            store,
            artifacts,
            Clock::pacific(),
            Arc::new(FixedTimeSource(now)),
            &WorkerConfig::default(),
            &WrappedConfig::default(),
        )
    }

    fn add_user(service: &WrappedService, id: &str) {
        service
            .store()
            .upsert_user(&User {
                id: id.to_string(),
                display_name: id.to_uppercase(),
                created_at: Utc::now(),
            })
            .unwrap();
    }

    fn add_event(service: &WrappedService, id: &str, user: &str, model: &str, tokens: u64, at: DateTime<Utc>) {
        service
            .store()
            .record_usage_event(&UsageEvent {
                id: id.to_string(),
                user_id: user.to_string(),
                created_at: at,
                prompt_tokens: tokens,
                completion_tokens: 0,
                total_tokens: tokens,
                cost: 0.01,
                message_count: Some(1),
                model: Some(model.to_string()),
                provider: None,
            })
            .unwrap();
    }

    // 2024-06-15 12:00 PDT
    fn noon_pt() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 19, 0, 0).unwrap()
    }

    #[test]
    fn countdown_points_at_next_morning() {
        let dir = tempdir().unwrap();
        let service = service_at(&dir, noon_pt());
        let countdown = service.countdown().unwrap();
        assert_eq!(countdown.current_date, "2024-06-15");
        // 2024-06-16 09:30 PDT
        assert_eq!(
            countdown.next_generation_at,
            Utc.with_ymd_and_hms(2024, 6, 16, 16, 30, 0).unwrap()
        );
        assert_eq!(countdown.time_until_next, Duration::minutes(21 * 60 + 30).num_milliseconds());
    }

    #[test]
    fn stats_are_none_for_unknown_user_and_zero_for_idle_user() {
        let dir = tempdir().unwrap();
        let service = service_at(&dir, noon_pt());
        assert!(service.get_stats("ghost").unwrap().is_none());

        add_user(&service, "u1");
        assert_eq!(service.get_stats("u1").unwrap(), Some(AggregateStats::default()));
    }

    #[test]
    fn unkeyable_user_ids_read_as_unknown() {
        let dir = tempdir().unwrap();
        let service = service_at(&dir, noon_pt());
        let long = "x".repeat(200);
        for user in ["google:42", long.as_str()] {
            assert!(service.get_stats(user).unwrap().is_none());
            assert!(service.get_snapshot(user).unwrap().is_none());
        }
    }

    #[test]
    fn snapshot_view_derives_expiry_and_image_url() {
        let dir = tempdir().unwrap();
        let now = noon_pt();
        let service = service_at(&dir, now);
        add_user(&service, "u1");
        assert!(service.get_snapshot("u1").unwrap().is_none());

        let generated_at = now - Duration::hours(2);
        let meta = service.artifacts().put(b"img", "image/png").unwrap();
        service
            .create_or_replace("u1", "2024-06-15", 3, Some(meta.artifact_ref.clone()), AggregateStats::default(), generated_at)
            .unwrap();

        let view = service.get_snapshot("u1").unwrap().unwrap();
        assert_eq!(
            view.image_url.as_deref(),
            Some(format!("/api/artifacts/{}", meta.artifact_ref).as_str())
        );
        assert_eq!(view.time_until_expiry, Duration::hours(22).num_milliseconds());
        assert_eq!(view.design_index, 3);
        assert!(view.next_generation_at > now);
    }

    #[tokio::test]
    async fn generate_all_covers_active_users_only() {
        let dir = tempdir().unwrap();
        let now = noon_pt();
        let service = service_at(&dir, now);
        for user in ["u1", "u2", "idle"] {
            add_user(&service, user);
        }
        add_event(&service, "e1", "u1", "gpt-4", 100, now - Duration::hours(3));
        add_event(&service, "e2", "u1", "claude-3", 200, now - Duration::hours(1));
        add_event(&service, "e3", "u2", "gemini-pro", 10, now - Duration::hours(23));
        add_event(&service, "e4", "idle", "gpt-4", 10, now - Duration::hours(30));

        let report = service.generate_all(now).await.unwrap();
        assert_eq!(report.date, "2024-06-15");
        assert_eq!(report.eligible, 2);
        assert_eq!(report.generated, 2);
        assert_eq!(report.failed, 0);

        let snap = service.store().get_wrapped_snapshot("u1", "2024-06-15").unwrap().unwrap();
        assert_eq!(snap.stats.total_tokens, 300);
        assert_eq!(snap.stats.top_models[0].model, "claude-3");
        assert!(snap.design_index < 10);
        assert!(service.store().get_wrapped_snapshot("idle", "2024-06-15").unwrap().is_none());

        // rerun replaces rather than duplicates
        service.generate_all(now + Duration::minutes(5)).await.unwrap();
        assert_eq!(service.store().count_wrapped_snapshots(), 2);
    }
}
