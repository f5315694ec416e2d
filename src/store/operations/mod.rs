pub mod snapshots;
pub mod usage_events;
pub mod users;
