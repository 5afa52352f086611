/// Client Registry
///
/// Registered OAuth2 clients: secret hash, permitted grant types, token
/// lifetimes, the resource they may obtain tokens for, and their scopes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::auth::password::PasswordHasher;
use crate::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    Password,
    RefreshToken,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::Password => "password",
            GrantType::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "password" => Ok(GrantType::Password),
            "refresh_token" => Ok(GrantType::RefreshToken),
            _ => Err(AuthError::UnsupportedGrantType),
        }
    }
}

#[derive(Clone)]
pub struct Client {
    pub client_id: String,
    client_secret_hash: String,
    pub allowed_grant_types: HashSet<GrantType>,
    pub access_token_ttl_seconds: i64,
    /// Overrides the global refresh-token lifetime when set
    pub refresh_token_ttl_seconds: Option<i64>,
    pub resource_id: String,
    pub scopes: BTreeSet<String>,
}

impl Client {
    pub fn new(
        client_id: impl Into<String>,
        client_secret_hash: String,
        allowed_grant_types: HashSet<GrantType>,
        access_token_ttl_seconds: i64,
        resource_id: impl Into<String>,
        scopes: BTreeSet<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret_hash,
            allowed_grant_types,
            access_token_ttl_seconds,
            refresh_token_ttl_seconds: None,
            resource_id: resource_id.into(),
            scopes,
        }
    }

    pub fn with_refresh_token_ttl(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = Some(seconds);
        self
    }

    pub fn allows(&self, grant: GrantType) -> bool {
        self.allowed_grant_types.contains(&grant)
    }

    /// Requested scopes narrowed to what this client holds.
    /// No request means every client scope.
    pub fn grant_scopes(&self, requested: &BTreeSet<String>) -> BTreeSet<String> {
        if requested.is_empty() {
            return self.scopes.clone();
        }
        requested.intersection(&self.scopes).cloned().collect()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.client_id)
            .field("allowed_grant_types", &self.allowed_grant_types)
            .field("access_token_ttl_seconds", &self.access_token_ttl_seconds)
            .field("refresh_token_ttl_seconds", &self.refresh_token_ttl_seconds)
            .field("resource_id", &self.resource_id)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

pub struct ClientRegistry {
    clients: HashMap<String, Client>,
    hasher: PasswordHasher,
    // Verified against on unknown client_ids so they cost as much as known ones
    dummy_hash: String,
}

impl ClientRegistry {
    /// # Errors
    /// Returns error if two clients share a client_id or the
    /// timing-equalisation hash cannot be computed
    pub fn new(clients: Vec<Client>, hasher: PasswordHasher) -> Result<Self, AuthError> {
        let mut by_id = HashMap::with_capacity(clients.len());
        for client in clients {
            if let Some(dup) = by_id.insert(client.client_id.clone(), client) {
                return Err(AuthError::Internal(format!(
                    "duplicate client_id: {}",
                    dup.client_id
                )));
            }
        }
        let dummy_hash = hasher.hash("timing-equalisation")?;
        Ok(Self {
            clients: by_id,
            hasher,
            dummy_hash,
        })
    }

    /// # Errors
    /// Returns `ClientNotFound` for an unregistered client_id
    pub fn lookup(&self, client_id: &str) -> Result<&Client, AuthError> {
        self.clients.get(client_id).ok_or(AuthError::ClientNotFound)
    }

    /// # Errors
    /// - `ClientNotFound` for an unregistered client_id
    /// - `CorruptCredentialRecord` if the stored secret hash is malformed
    pub async fn verify_secret(
        &self,
        client_id: &str,
        provided_secret: &str,
    ) -> Result<bool, AuthError> {
        match self.lookup(client_id) {
            Ok(client) => {
                self.hasher
                    .verify_async(provided_secret, &client.client_secret_hash)
                    .await
            }
            Err(e) => {
                let _ = self.hasher.verify_async(provided_secret, &self.dummy_hash).await;
                Err(e)
            }
        }
    }

    /// Lookup plus secret check, collapsed into `InvalidClient` so callers
    /// cannot tell an unknown client from a wrong secret.
    pub async fn authenticate(
        &self,
        client_id: &str,
        provided_secret: &str,
    ) -> Result<&Client, AuthError> {
        match self.verify_secret(client_id, provided_secret).await {
            Ok(true) => self.lookup(client_id),
            Ok(false) | Err(AuthError::ClientNotFound) => {
                tracing::warn!(client_id = %client_id, "Client authentication failed");
                Err(AuthError::InvalidClient)
            }
            Err(e) => Err(e),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
