use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::error::AccountError;
use crate::users::dto::{PublicUser, RegisterRequest, UpdateUserRequest};
use crate::users::password::PasswordScheme;
use crate::users::repo::UserStore;
use crate::users::repo_types::{NewUser, UserPatch};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Create, read, update and list operations over user accounts.
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn UserStore>,
    passwords: Arc<dyn PasswordScheme>,
    roles_enabled: bool,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn UserStore>,
        passwords: Arc<dyn PasswordScheme>,
        roles_enabled: bool,
    ) -> Self {
        Self {
            store,
            passwords,
            roles_enabled,
        }
    }

    #[instrument(skip(self, req), fields(email = %req.email))]
    pub async fn register(&self, req: RegisterRequest) -> Result<i64, AccountError> {
        if req.first_name.trim().is_empty() {
            return Err(AccountError::validation("first_name must not be empty"));
        }
        if req.last_name.trim().is_empty() {
            return Err(AccountError::validation("last_name must not be empty"));
        }
        if !is_valid_email(&req.email) {
            warn!("invalid email");
            return Err(AccountError::validation("Invalid email"));
        }
        if req.password.is_empty() {
            return Err(AccountError::validation("password must not be empty"));
        }
        if req.role.is_some() && !self.roles_enabled {
            return Err(AccountError::validation("role is not supported"));
        }

        let password = self.passwords.seal(&req.password).map_err(AccountError::Internal)?;

        let id = self
            .store
            .insert(NewUser {
                first_name: req.first_name,
                last_name: req.last_name,
                email: req.email,
                role: req.role.unwrap_or_default(),
                password,
                bio: req.bio,
            })
            .await
            .inspect_err(|e| {
                if matches!(e, AccountError::Conflict) {
                    warn!("email already registered");
                }
            })?;

        info!(user_id = id, "user registered");
        Ok(id)
    }

    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: i64) -> Result<PublicUser, AccountError> {
        let user = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(AccountError::NotFound(id))?;
        Ok(PublicUser::from_user(user, self.roles_enabled))
    }

    #[instrument(skip(self, req))]
    pub async fn update(
        &self,
        id: i64,
        req: UpdateUserRequest,
    ) -> Result<PublicUser, AccountError> {
        if req.role.is_some() && !self.roles_enabled {
            return Err(AccountError::validation("role is not supported"));
        }

        let patch = UserPatch {
            first_name: req.first_name,
            last_name: req.last_name,
            bio: req.bio,
            role: req.role,
        };
        if patch.is_empty() {
            debug!("empty patch");
        }

        let user = self
            .store
            .update(id, patch)
            .await?
            .ok_or(AccountError::NotFound(id))?;

        info!(user_id = id, "user updated");
        Ok(PublicUser::from_user(user, self.roles_enabled))
    }

    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<PublicUser>, AccountError> {
        let users = self.store.list().await?;
        debug!(count = users.len(), "users listed");
        Ok(users
            .into_iter()
            .map(|u| PublicUser::from_user(u, self.roles_enabled))
            .collect())
    }
}
