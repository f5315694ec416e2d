use crate::store::{Store, StoreError};

const VERSION_KEY: &str = "_meta:version";

type MigrationFn = fn(&Store) -> Result<(), StoreError>;

fn migrations() -> Vec<(&'static str, MigrationFn)> {
    vec![
        ("001_initial", m001_initial),
        ("002_wrapped_expiry_index", m002_wrapped_expiry_index),
        ("003_artifact_owner_index", m003_artifact_owner_index),
        ("004_usage_event_id_index", m004_usage_event_id_index),
    ]
}

/// 执行所有未应用的数据库迁移。
///
/// 迁移设计原则：
/// - **幂等性要求**：每个迁移函数必须是幂等的；func() 成功但 set_version()
///   之前进程崩溃时，重启后会重新执行该迁移。
/// - **仅向前**：set_version 拒绝降级，防止意外回滚。
pub fn run(store: &Store) -> Result<(), StoreError> {
    let current = get_current_version(store)?;
    let all = migrations();

    for (index, (name, func)) in all.iter().enumerate() {
        let version = (index + 1) as u32;
        if version > current {
            tracing::info!(version, name, "Running migration");
            func(store)?;
            set_version(store, version)?;
            tracing::info!(version, name, "Migration complete");
        } else {
            tracing::debug!(version, name, "Migration already applied, skipping");
        }
    }

    Ok(())
}

pub fn get_current_version(store: &Store) -> Result<u32, StoreError> {
    match store.config_versions.get(VERSION_KEY.as_bytes())? {
        Some(raw) => {
            let bytes: [u8; 4] = raw.as_ref().try_into().map_err(|_| StoreError::Migration {
                version: 0,
                message: format!("corrupt version marker ({} bytes)", raw.len()),
            })?;
            Ok(u32::from_be_bytes(bytes))
        }
        None => Ok(0),
    }
}

pub fn set_version(store: &Store, version: u32) -> Result<(), StoreError> {
    let current = get_current_version(store)?;
    if version < current {
        return Err(StoreError::Migration {
            version,
            message: format!("Refuse to downgrade from {} to {}", current, version),
        });
    }

    store
        .config_versions
        .insert(VERSION_KEY.as_bytes(), &version.to_be_bytes())?;
    Ok(())
}

fn m001_initial(_store: &Store) -> Result<(), StoreError> {
    Ok(())
}

fn m002_wrapped_expiry_index(store: &Store) -> Result<(), StoreError> {
    let rebuilt = store.rebuild_snapshot_expiry_index()?;
    tracing::info!(rebuilt, "Rebuilt wrapped expiry index");
    Ok(())
}

fn m003_artifact_owner_index(store: &Store) -> Result<(), StoreError> {
    let owned = store.rebuild_artifact_owner_index()?;
    tracing::info!(owned, "Rebuilt artifact owner index");
    Ok(())
}

fn m004_usage_event_id_index(store: &Store) -> Result<(), StoreError> {
    let indexed = store.rebuild_usage_event_id_index()?;
    tracing::info!(indexed, "Rebuilt usage event id index");
    Ok(())
}
