/// Credential Store
///
/// Users are provisioned once at startup and never change afterwards.
/// Lookups are read-only; the stored hash never leaves this module.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::auth::password::PasswordHasher;
use crate::error::AuthError;

/// Opaque role label, compared by set membership only
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

/// A provisioned user
#[derive(Clone)]
pub struct User {
    username: String,
    password_hash: String,
    roles: HashSet<Role>,
}

impl User {
    pub fn new(username: impl Into<String>, password_hash: String, roles: HashSet<Role>) -> Self {
        Self {
            username: username.into(),
            password_hash,
            roles,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn roles(&self) -> &HashSet<Role> {
        &self.roles
    }
}

// Keep the hash out of any `{:?}` output.
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

pub struct CredentialStore {
    users: HashMap<String, User>,
    hasher: PasswordHasher,
    // Verified against when the username is unknown so both paths cost one bcrypt round.
    dummy_hash: String,
}

impl CredentialStore {
    /// Build the store from already-hashed users
    ///
    /// # Errors
    /// Returns error if two users share a username or the timing-equalisation
    /// hash cannot be computed
    pub fn new(users: Vec<User>, hasher: PasswordHasher) -> Result<Self, AuthError> {
        let mut by_name = HashMap::with_capacity(users.len());
        for user in users {
            if by_name.contains_key(&user.username) {
                return Err(AuthError::Internal(format!(
                    "duplicate username: {}",
                    user.username
                )));
            }
            by_name.insert(user.username.clone(), user);
        }

        let dummy_hash = hasher.hash("timing-equalisation")?;

        Ok(Self {
            users: by_name,
            hasher,
            dummy_hash,
        })
    }

    /// Check a username/password pair
    ///
    /// # Errors
    /// - `UnknownPrincipal` if no such user exists
    /// - `InvalidCredentials` if the password does not match
    /// - `CorruptCredentialRecord` if the stored hash is malformed
    pub async fn verify(&self, username: &str, password: &str) -> Result<User, AuthError> {
        match self.users.get(username) {
            None => {
                let _ = self.hasher.verify_async(password, &self.dummy_hash).await;
                tracing::debug!(username = %username, "Unknown principal");
                Err(AuthError::UnknownPrincipal)
            }
            Some(user) => {
                if self.hasher.verify_async(password, &user.password_hash).await? {
                    Ok(user.clone())
                } else {
                    tracing::debug!(username = %username, "Password mismatch");
                    Err(AuthError::InvalidCredentials)
                }
            }
        }
    }

    /// Roles currently held by a user
    ///
    /// # Errors
    /// Returns `UnknownPrincipal` if the user is not provisioned
    pub fn roles_of(&self, username: &str) -> Result<HashSet<Role>, AuthError> {
        self.users
            .get(username)
            .map(|user| user.roles.clone())
            .ok_or(AuthError::UnknownPrincipal)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
