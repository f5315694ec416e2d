use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::keys;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl Store {
    /// Insert or overwrite a user record. Identity is owned upstream; this is
    /// just enough to resolve a token subject to a known user.
    pub fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        let key = keys::user_key(&user.id)?;
        self.users.insert(key.as_bytes(), Self::serialize(user)?)?;
        Ok(())
    }

    pub fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let key = keys::user_key(user_id)?;
        match self.users.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn count_users(&self) -> usize {
        self.users.len()
    }
}
