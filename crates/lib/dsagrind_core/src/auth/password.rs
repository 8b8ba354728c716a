//! Password hashing via bcrypt.

use tracing::debug;

use super::AuthError;
use crate::config::DEFAULT_BCRYPT_COST;

/// Salted adaptive password hasher. The salt and cost are embedded in every
/// hash string, so verification needs no extra state.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a password with a fresh random salt.
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        bcrypt::hash(password, self.cost)
            .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
    }

    /// Verify a password against a bcrypt hash. A malformed hash verifies
    /// as `false`.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        match bcrypt::verify(password, hash) {
            Ok(ok) => ok,
            Err(e) => {
                debug!(error = %e, "bcrypt verify rejected hash");
                false
            }
        }
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_BCRYPT_COST)
    }
}
