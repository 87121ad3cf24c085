use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::AccountError;
use crate::users::repo::UserStore;
use crate::users::repo_types::{NewUser, User, UserPatch};

/// `UserStore` kept in process memory. Uniqueness is checked under the same
/// lock as the write, mirroring the Postgres `lower(email)` index.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    last_id: i64,
    rows: BTreeMap<i64, User>,
}

impl MemoryUserStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, AccountError> {
        self.inner
            .lock()
            .map_err(|_| AccountError::Internal(anyhow::anyhow!("user store lock poisoned")))
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, new_user: NewUser) -> Result<i64, AccountError> {
        let mut inner = self.lock()?;
        let key = new_user.email.to_lowercase();
        if inner.rows.values().any(|u| u.email.to_lowercase() == key) {
            return Err(AccountError::Conflict);
        }
        inner.last_id += 1;
        let id = inner.last_id;
        inner.rows.insert(
            id,
            User {
                id,
                first_name: new_user.first_name,
                last_name: new_user.last_name,
                email: new_user.email,
                role: new_user.role,
                password: new_user.password,
                bio: new_user.bio,
                created_at: OffsetDateTime::now_utc(),
            },
        );
        Ok(id)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AccountError> {
        Ok(self.lock()?.rows.get(&id).cloned())
    }

    async fn update(&self, id: i64, patch: UserPatch) -> Result<Option<User>, AccountError> {
        let mut inner = self.lock()?;
        let Some(user) = inner.rows.get_mut(&id) else {
            return Ok(None);
        };
        patch.apply_to(user);
        Ok(Some(user.clone()))
    }

    async fn list(&self) -> Result<Vec<User>, AccountError> {
        Ok(self.lock()?.rows.values().cloned().collect())
    }
}
