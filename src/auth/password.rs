/// Password Hashing and Verification
///
/// Salted adaptive hashing with bcrypt. Every call to `hash` draws a fresh
/// salt, so hashing the same password twice yields two different strings.
/// Verification re-derives the digest and compares it in constant time.

use bcrypt::{hash, verify, BcryptError, DEFAULT_COST};

use crate::error::AuthError;

const MIN_COST: u32 = 4;
const MAX_COST: u32 = 31;

/// Hashes and checks user passwords and client secrets
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self { cost: DEFAULT_COST }
    }
}

impl PasswordHasher {
    /// Create a hasher with an explicit bcrypt work factor
    ///
    /// # Errors
    /// Returns error if the cost is outside bcrypt's 4..=31 range
    pub fn new(cost: u32) -> Result<Self, AuthError> {
        if !(MIN_COST..=MAX_COST).contains(&cost) {
            return Err(AuthError::Internal(format!(
                "bcrypt cost must be between {} and {}",
                MIN_COST, MAX_COST
            )));
        }
        Ok(Self { cost })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a plaintext password
    ///
    /// # Errors
    /// Returns error if bcrypt hashing fails
    pub fn hash(&self, plaintext: &str) -> Result<String, AuthError> {
        hash(plaintext, self.cost)
            .map_err(|e| AuthError::Internal(format!("Password hashing failed: {}", e)))
    }

    /// Verify a plaintext password against a stored hash
    ///
    /// # Errors
    /// Returns `CorruptCredentialRecord` if the stored hash is malformed.
    /// A well-formed hash that does not match is `Ok(false)`.
    pub fn verify(&self, plaintext: &str, hash_string: &str) -> Result<bool, AuthError> {
        verify(plaintext, hash_string).map_err(|e| match e {
            BcryptError::InvalidHash(_)
            | BcryptError::InvalidPrefix(_)
            | BcryptError::InvalidCost(_)
            | BcryptError::CostNotAllowed(_)
            | BcryptError::InvalidSaltLen(_)
            | BcryptError::InvalidBase64(_) => {
                tracing::error!("Stored credential hash is malformed");
                AuthError::CorruptCredentialRecord
            }
            _ => AuthError::Internal(format!("Password verification failed: {}", e)),
        })
    }

    /// [`verify`](Self::verify) on tokio's blocking pool, so a bcrypt round
    /// does not stall the worker driving the request.
    ///
    /// # Errors
    /// Same as `verify`, plus `Internal` if the blocking task panics
    pub async fn verify_async(&self, plaintext: &str, hash_string: &str) -> Result<bool, AuthError> {
        let hasher = *self;
        let plaintext = plaintext.to_owned();
        let hash_string = hash_string.to_owned();

        tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &hash_string))
            .await
            .map_err(|e| AuthError::Internal(format!("Password verification task failed: {}", e)))?
    }
}
