use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::config::PasswordSchemeKind;

/// Turns a caller-supplied password into the value kept in the `password` column.
pub trait PasswordScheme: Send + Sync {
    fn seal(&self, plain: &str) -> anyhow::Result<String>;
    fn verify(&self, plain: &str, stored: &str) -> anyhow::Result<bool>;
}

/// Stores the password as supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainText;

impl PasswordScheme for PlainText {
    fn seal(&self, plain: &str) -> anyhow::Result<String> {
        Ok(plain.to_string())
    }

    fn verify(&self, plain: &str, stored: &str) -> anyhow::Result<bool> {
        Ok(plain == stored)
    }
}

/// Salted Argon2 hashes in PHC string format.
#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2Scheme;

impl PasswordScheme for Argon2Scheme {
    fn seal(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    fn verify(&self, plain: &str, stored: &str) -> anyhow::Result<bool> {
        let parsed = PasswordHash::new(stored).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            anyhow::anyhow!(e.to_string())
        })?;
        Ok(Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok())
    }
}

pub fn scheme_for(kind: PasswordSchemeKind) -> std::sync::Arc<dyn PasswordScheme> {
    match kind {
        PasswordSchemeKind::Plain => std::sync::Arc::new(PlainText),
        PasswordSchemeKind::Argon2 => std::sync::Arc::new(Argon2Scheme),
    }
}
