pub const USERS: &str = "users";
pub const USAGE_EVENTS: &str = "usage_events";
pub const WRAPPED_SNAPSHOTS: &str = "wrapped_snapshots";
pub const ARTIFACTS: &str = "artifacts";
pub const CONFIG_VERSIONS: &str = "config_versions";

// Secondary index trees
pub const USAGE_EVENTS_BY_TIME: &str = "usage_events_by_time";
pub const WRAPPED_BY_EXPIRY: &str = "wrapped_by_expiry";
pub const ARTIFACT_OWNERS: &str = "artifact_owners";
pub const USAGE_EVENT_IDS: &str = "usage_event_ids";
