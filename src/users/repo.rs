use anyhow::Context;
use async_trait::async_trait;
use sqlx::{Executor, PgPool};
use tracing::{debug, info};

use crate::error::AccountError;
use crate::users::repo_types::{NewUser, User, UserPatch};

/// Persistence for user rows. Implementations enforce email uniqueness themselves
/// and report a duplicate as `AccountError::Conflict`.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a row and return its assigned id.
    async fn insert(&self, new_user: NewUser) -> Result<i64, AccountError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AccountError>;

    /// Apply `patch` and return the updated row, or `None` when `id` is unknown.
    async fn update(&self, id: i64, patch: UserPatch) -> Result<Option<User>, AccountError>;

    async fn list(&self) -> Result<Vec<User>, AccountError>;
}

const SCHEMA: &[&str] = &[
    r#"
    DO $$ BEGIN
        CREATE TYPE role_enum AS ENUM ('Student', 'Teacher');
    EXCEPTION WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id          BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        first_name  TEXT NOT NULL,
        last_name   TEXT NOT NULL,
        email       TEXT NOT NULL,
        role        role_enum NOT NULL DEFAULT 'Student',
        password    TEXT NOT NULL,
        bio         TEXT,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS users_email_lower_key ON users (lower(email))
    "#,
];

const USER_COLUMNS: &str = "id, first_name, last_name, email, role, password, bio, created_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create the `users` table, its enum type and the email index when missing.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        for stmt in SCHEMA {
            (&self.db)
                .execute(*stmt)
                .await
                .context("bootstrap users schema")?;
        }
        info!("users schema ready");
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, new_user: NewUser) -> Result<i64, AccountError> {
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO users (first_name, last_name, email, role, password, bio)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(&new_user.email)
        .bind(new_user.role)
        .bind(&new_user.password)
        .bind(&new_user.bio)
        .fetch_one(&mut *tx)
        .await;

        let id = match inserted {
            Ok(id) => id,
            Err(e) => {
                tx.rollback().await?;
                return Err(e.into());
            }
        };
        tx.commit().await?;

        debug!(user_id = id, "user row inserted");
        Ok(id)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AccountError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn update(&self, id: i64, patch: UserPatch) -> Result<Option<User>, AccountError> {
        let mut tx = self.db.begin().await?;

        let (set_bio, bio) = match patch.bio {
            Some(bio) => (true, bio),
            None => (false, None),
        };

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET first_name = COALESCE($2, first_name),
                   last_name  = COALESCE($3, last_name),
                   bio        = CASE WHEN $4 THEN $5 ELSE bio END,
                   role       = COALESCE($6, role)
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.first_name)
        .bind(patch.last_name)
        .bind(set_bio)
        .bind(bio)
        .bind(patch.role)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(user)
    }

    async fn list(&self) -> Result<Vec<User>, AccountError> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }
}

/// Runs only when `TEST_DATABASE_URL` points at a disposable Postgres database.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::repo_types::Role;
    use sqlx::postgres::PgPoolOptions;
    use time::OffsetDateTime;

    async fn store() -> Option<PgUserStore> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let db = PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .expect("connect to TEST_DATABASE_URL");
        let store = PgUserStore::new(db);
        store.ensure_schema().await.expect("schema");
        Some(store)
    }

    fn unique_email(tag: &str) -> String {
        format!(
            "{tag}-{}@example.com",
            OffsetDateTime::now_utc().unix_timestamp_nanos()
        )
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            first_name: "Ana".into(),
            last_name: "Diaz".into(),
            email: email.into(),
            role: Role::Student,
            password: "x".into(),
            bio: None,
        }
    }

    #[tokio::test]
    async fn insert_then_find_roundtrip() {
        let Some(store) = store().await else { return };
        let email = unique_email("find");
        let id = store.insert(new_user(&email)).await.expect("insert");
        let user = store.find_by_id(id).await.expect("find").expect("row");
        assert_eq!(user.email, email);
        assert_eq!(user.role, Role::Student);
        assert!(user.bio.is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_conflict_case_insensitively() {
        let Some(store) = store().await else { return };
        let email = unique_email("dup");
        store.insert(new_user(&email)).await.expect("first insert");
        let err = store
            .insert(new_user(&email.to_uppercase()))
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::Conflict));
    }

    #[tokio::test]
    async fn concurrent_duplicates_yield_one_success() {
        let Some(store) = store().await else { return };
        let email = unique_email("race");
        let (a, b) = tokio::join!(
            store.insert(new_user(&email)),
            store.insert(new_user(&email))
        );
        let ok = [a.is_ok(), b.is_ok()].iter().filter(|v| **v).count();
        assert_eq!(ok, 1);
        let conflict = [a, b]
            .into_iter()
            .filter(|r| matches!(r, Err(AccountError::Conflict)))
            .count();
        assert_eq!(conflict, 1);
    }

    #[tokio::test]
    async fn update_applies_only_present_fields() {
        let Some(store) = store().await else { return };
        let id = store
            .insert(new_user(&unique_email("patch")))
            .await
            .expect("insert");
        let before = store.find_by_id(id).await.unwrap().unwrap();

        let after = store
            .update(
                id,
                UserPatch {
                    bio: Some(Some("hello".into())),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("row");
        assert_eq!(after.bio.as_deref(), Some("hello"));
        assert_eq!(after.first_name, before.first_name);
        assert_eq!(after.created_at, before.created_at);

        let cleared = store
            .update(
                id,
                UserPatch {
                    bio: Some(None),
                    role: Some(Role::Teacher),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(cleared.bio.is_none());
        assert_eq!(cleared.role, Role::Teacher);
    }

    #[tokio::test]
    async fn update_unknown_id_returns_none() {
        let Some(store) = store().await else { return };
        let res = store.update(i64::MAX, UserPatch::default()).await.unwrap();
        assert!(res.is_none());
    }
}
