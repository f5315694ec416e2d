use super::StoreError;

const MAX_SEGMENT_LEN: usize = 128;

/// Key segments are joined with `:`; reject anything that would break the layout.
fn segment<'a>(name: &str, value: &'a str) -> Result<&'a str, StoreError> {
    if value.is_empty() {
        return Err(StoreError::Validation(format!("{name} must not be empty")));
    }
    if value.len() > MAX_SEGMENT_LEN {
        return Err(StoreError::Validation(format!(
            "{name} exceeds {MAX_SEGMENT_LEN} bytes"
        )));
    }
    if value.contains(':') {
        return Err(StoreError::Validation(format!(
            "{name} must not contain ':'"
        )));
    }
    Ok(value)
}

fn ts_segment(timestamp_ms: i64) -> String {
    format!("{:020}", timestamp_ms.max(0) as u64)
}

pub fn user_key(user_id: &str) -> Result<String, StoreError> {
    Ok(segment("user_id", user_id)?.to_string())
}

// Usage events: `{user_id}:{ts:020}:{event_id}`, ascending by time within a user.
pub fn usage_event_key(user_id: &str, timestamp_ms: i64, event_id: &str) -> Result<String, StoreError> {
    Ok(format!(
        "{}:{}:{}",
        segment("user_id", user_id)?,
        ts_segment(timestamp_ms),
        segment("event_id", event_id)?
    ))
}

pub fn usage_event_prefix(user_id: &str) -> Result<String, StoreError> {
    Ok(format!("{}:", segment("user_id", user_id)?))
}

pub fn usage_event_since_key(user_id: &str, timestamp_ms: i64) -> Result<String, StoreError> {
    Ok(format!("{}:{}", segment("user_id", user_id)?, ts_segment(timestamp_ms)))
}

// Global time index: `{ts:020}:{user_id}:{event_id}` -> user_id bytes.
pub fn usage_events_by_time_key(
    timestamp_ms: i64,
    user_id: &str,
    event_id: &str,
) -> Result<String, StoreError> {
    Ok(format!(
        "{}:{}:{}",
        ts_segment(timestamp_ms),
        segment("user_id", user_id)?,
        segment("event_id", event_id)?
    ))
}

pub fn usage_events_by_time_since_key(timestamp_ms: i64) -> String {
    ts_segment(timestamp_ms)
}

// Wrapped snapshots: unique `{user_id}:{date}`.
pub fn snapshot_key(user_id: &str, date: &str) -> Result<String, StoreError> {
    Ok(format!(
        "{}:{}",
        segment("user_id", user_id)?,
        segment("date", date)?
    ))
}

pub fn snapshot_prefix(user_id: &str) -> Result<String, StoreError> {
    Ok(format!("{}:", segment("user_id", user_id)?))
}

// Expiry index: `{expires_at:020}:{user_id}:{date}` -> snapshot key bytes.
pub fn snapshot_expiry_key(expires_at_ms: i64, user_id: &str, date: &str) -> Result<String, StoreError> {
    Ok(format!(
        "{}:{}:{}",
        ts_segment(expires_at_ms),
        segment("user_id", user_id)?,
        segment("date", date)?
    ))
}

/// Exclusive upper bound: every index key below it expires strictly before `now_ms`.
pub fn snapshot_expiry_bound(now_ms: i64) -> String {
    ts_segment(now_ms)
}

// Event id index: `{event_id}` -> primary usage event key.
pub fn usage_event_id_key(event_id: &str) -> Result<String, StoreError> {
    Ok(segment("event_id", event_id)?.to_string())
}

// Artifacts and the owner index (`{artifact_ref}` -> snapshot key) share this key.
pub fn artifact_key(artifact_ref: &str) -> Result<String, StoreError> {
    Ok(segment("artifact_ref", artifact_ref)?.to_string())
}

/// Leading timestamp of a `{ts:020}:...` index key.
pub fn parse_index_timestamp_ms(key: &[u8]) -> Option<i64> {
    let sep = key.iter().position(|b| *b == b':')?;
    let ts_str = std::str::from_utf8(&key[..sep]).ok()?;
    let ts = ts_str.parse::<u64>().ok()?;
    i64::try_from(ts).ok()
}
