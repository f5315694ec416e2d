use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Rolling lookback used for both aggregation and active-user discovery.
pub const WINDOW_HOURS: i64 = 24;

/// Lifetime of a snapshot after generation.
pub const SNAPSHOT_TTL_HOURS: i64 = 24;

/// Length bound of `topModels` / `topProviders`.
pub const TOP_N: usize = 5;

pub const UNKNOWN_KEY: &str = "unknown";

pub fn window_duration() -> Duration {
    Duration::hours(WINDOW_HOURS)
}

pub fn snapshot_ttl() -> Duration {
    Duration::hours(SNAPSHOT_TTL_HOURS)
}

/// One metered usage event (a chat session as reported by the client).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub message_count: Option<u64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

impl UsageEvent {
    /// Model id, with empty strings treated as missing.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref().filter(|m| !m.is_empty())
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref().filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model: String,
    pub tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub provider: String,
    pub tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_messages: u64,
    // absent on snapshots written before session counting existed
    #[serde(default)]
    pub session_count: u64,
    pub cost: f64,
    pub top_models: Vec<ModelUsage>,
    pub top_providers: Vec<ProviderUsage>,
}

/// The persisted daily record for one `(user_id, date)` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub user_id: String,
    pub date: String,
    pub design_index: u32,
    #[serde(default)]
    pub artifact_ref: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub generated_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    pub stats: AggregateStats,
}

impl Snapshot {
    /// Build a fresh record; `expires_at` is always derived from `generated_at`.
    pub fn new(
        user_id: &str,
        date: &str,
        design_index: u32,
        artifact_ref: Option<String>,
        stats: AggregateStats,
        generated_at: DateTime<Utc>,
    ) -> Self {
        // persisted with millisecond precision
        let generated_at =
            DateTime::from_timestamp_millis(generated_at.timestamp_millis()).unwrap_or(generated_at);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            date: date.to_string(),
            design_index,
            artifact_ref,
            generated_at,
            expires_at: generated_at + snapshot_ttl(),
            stats,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn time_until_expiry_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_milliseconds().max(0)
    }
}
