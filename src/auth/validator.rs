/// Access Validator
///
/// Resolves a bearer token through the token store and decides whether its
/// holder may reach a resource. Reads only; never writes to the store.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::auth::credentials::{CredentialStore, Role};
use crate::auth::token::TokenKind;
use crate::clock::Clock;
use crate::error::AuthError;
use crate::store::{TokenStore, TokenStoreBackend};

/// The authenticated caller behind a bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    pub roles: BTreeSet<Role>,
    pub client_id: String,
    pub scopes: BTreeSet<String>,
}

impl Principal {
    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }
}

pub struct AccessValidator {
    store: TokenStoreBackend,
    credentials: Arc<CredentialStore>,
    clock: Arc<dyn Clock>,
}

impl AccessValidator {
    pub fn new(
        store: TokenStoreBackend,
        credentials: Arc<CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            credentials,
            clock,
        }
    }

    /// Authorize a bearer token for a resource.
    /// An empty `required_roles` set admits any authenticated principal.
    ///
    /// # Errors
    /// - `InvalidToken` if the token is unknown, expired, revoked, a refresh
    ///   token, or its subject is no longer provisioned
    /// - `ResourceMismatch` if the token was issued for another resource
    /// - `InsufficientRole` if the subject holds none of the required roles
    /// - `StoreUnavailable` if the store cannot be reached
    pub async fn authorize(
        &self,
        bearer_token: &str,
        required_resource_id: &str,
        required_roles: &HashSet<Role>,
    ) -> Result<Principal, AuthError> {
        let token = self
            .store
            .get(bearer_token)
            .await?
            .filter(|token| token.kind == TokenKind::Access)
            .ok_or(AuthError::InvalidToken)?;

        // The store already drops expired records; this guards backends
        // whose clock view differs from ours.
        if token.is_expired_at(self.clock.now()) {
            return Err(AuthError::InvalidToken);
        }

        if token.resource_id != required_resource_id {
            tracing::debug!(
                username = %token.subject,
                resource_id = %required_resource_id,
                "Token issued for a different resource"
            );
            return Err(AuthError::ResourceMismatch);
        }

        let roles = self
            .credentials
            .roles_of(&token.subject)
            .map_err(|_| AuthError::InvalidToken)?;

        if !required_roles.is_empty() && roles.is_disjoint(required_roles) {
            tracing::debug!(username = %token.subject, "Missing required role");
            return Err(AuthError::InsufficientRole);
        }

        Ok(Principal {
            username: token.subject,
            roles: roles.into_iter().collect(),
            client_id: token.client_id,
            scopes: token.scopes,
        })
    }
}
