/// Token Issuer
///
/// Runs the two supported grants. Each request moves through
/// `ReceivedCredentials -> ClientValidated -> GrantTypeChecked ->
/// UserValidated -> TokenIssued` and stops at the first failing step.
///
/// Validation only reads. All writes happen in a commit step that runs on
/// its own task, so a caller that gives up mid-request cannot leave half a
/// grant behind: the commit either persists every token or rolls back what
/// it wrote.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use crate::auth::clients::{Client, ClientRegistry, GrantType};
use crate::auth::credentials::CredentialStore;
use crate::auth::token::{Token, TokenKind};
use crate::clock::Clock;
use crate::configuration::{RefreshPolicy, TokenSettings};
use crate::error::AuthError;
use crate::store::{TokenStore, TokenStoreBackend};

/// Step a grant request has reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantStage {
    ReceivedCredentials,
    ClientValidated,
    GrantTypeChecked,
    UserValidated,
    TokenIssued,
}

/// A parsed token-endpoint request
#[derive(Clone)]
pub enum TokenRequest {
    Password {
        client_id: String,
        client_secret: String,
        username: String,
        password: String,
        scopes: BTreeSet<String>,
    },
    RefreshToken {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
}

impl TokenRequest {
    pub fn grant_type(&self) -> GrantType {
        match self {
            TokenRequest::Password { .. } => GrantType::Password,
            TokenRequest::RefreshToken { .. } => GrantType::RefreshToken,
        }
    }

    pub fn client_id(&self) -> &str {
        match self {
            TokenRequest::Password { client_id, .. } | TokenRequest::RefreshToken { client_id, .. } => {
                client_id
            }
        }
    }
}

/// Successful token-endpoint response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

impl TokenResponse {
    fn new(access: &Token, refresh_token: Option<String>, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            access_token: access.value.clone(),
            token_type: "bearer".to_string(),
            expires_in: access.expires_in(now),
            refresh_token,
            scope: access.scope_string(),
        }
    }
}

pub struct TokenIssuer {
    clients: Arc<ClientRegistry>,
    credentials: Arc<CredentialStore>,
    store: TokenStoreBackend,
    clock: Arc<dyn Clock>,
    settings: TokenSettings,
}

impl TokenIssuer {
    pub fn new(
        clients: Arc<ClientRegistry>,
        credentials: Arc<CredentialStore>,
        store: TokenStoreBackend,
        clock: Arc<dyn Clock>,
        settings: TokenSettings,
    ) -> Self {
        Self {
            clients,
            credentials,
            store,
            clock,
            settings,
        }
    }

    /// Run a grant end to end
    ///
    /// # Errors
    /// - `InvalidClient` if client authentication fails
    /// - `UnsupportedGrantType` if the client may not use this grant
    /// - `InvalidGrant` for bad user credentials or an unusable refresh token
    /// - `InvalidScope` if no requested scope is granted to the client
    /// - `StoreUnavailable` if tokens could not be persisted
    pub async fn grant(&self, request: TokenRequest) -> Result<TokenResponse, AuthError> {
        let grant_type = request.grant_type();
        let client_id = request.client_id().to_string();

        let result = match request {
            TokenRequest::Password {
                client_id,
                client_secret,
                username,
                password,
                scopes,
            } => {
                self.password_grant(&client_id, &client_secret, &username, &password, &scopes)
                    .await
            }
            TokenRequest::RefreshToken {
                client_id,
                client_secret,
                refresh_token,
            } => {
                self.refresh_grant(&client_id, &client_secret, &refresh_token)
                    .await
            }
        };

        match &result {
            Ok(_) => tracing::info!(
                client_id = %client_id,
                grant_type = %grant_type,
                stage = ?GrantStage::TokenIssued,
                "Token issued"
            ),
            Err((stage, e)) => tracing::warn!(
                client_id = %client_id,
                grant_type = %grant_type,
                stage = ?stage,
                error = %e,
                "Grant rejected"
            ),
        }

        result.map_err(|(_, e)| e)
    }

    async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: &str,
        grant: GrantType,
    ) -> Result<Client, (GrantStage, AuthError)> {
        let client = self
            .clients
            .authenticate(client_id, client_secret)
            .await
            .map_err(|e| (GrantStage::ReceivedCredentials, e))?;

        if !client.allows(grant) {
            return Err((GrantStage::ClientValidated, AuthError::UnsupportedGrantType));
        }
        Ok(client.clone())
    }

    fn refresh_ttl(&self, client: &Client) -> i64 {
        client
            .refresh_token_ttl_seconds
            .unwrap_or(self.settings.refresh_token_ttl_seconds)
    }

    async fn password_grant(
        &self,
        client_id: &str,
        client_secret: &str,
        username: &str,
        password: &str,
        requested: &BTreeSet<String>,
    ) -> Result<TokenResponse, (GrantStage, AuthError)> {
        let client = self
            .authenticate_client(client_id, client_secret, GrantType::Password)
            .await?;

        let user = self
            .credentials
            .verify(username, password)
            .await
            .map_err(|e| match e {
                AuthError::UnknownPrincipal | AuthError::InvalidCredentials => {
                    (GrantStage::GrantTypeChecked, AuthError::InvalidGrant)
                }
                other => (GrantStage::GrantTypeChecked, other),
            })?;

        let scopes = client.grant_scopes(requested);
        if scopes.is_empty() {
            return Err((GrantStage::UserValidated, AuthError::InvalidScope));
        }

        let now = self.clock.now();
        let mut access = Token::mint(
            TokenKind::Access,
            user.username(),
            &client.client_id,
            &client.resource_id,
            scopes.clone(),
            now,
            client.access_token_ttl_seconds,
        )
        .map_err(|e| (GrantStage::UserValidated, e))?;

        // Refresh tokens only go to clients allowed to redeem them.
        let refresh = if client.allows(GrantType::RefreshToken) {
            let refresh = Token::mint(
                TokenKind::Refresh,
                user.username(),
                &client.client_id,
                &client.resource_id,
                scopes,
                now,
                self.refresh_ttl(&client),
            )
            .map_err(|e| (GrantStage::UserValidated, e))?
            .linked_to(&access.value);
            access = access.linked_to(&refresh.value);
            Some(refresh)
        } else {
            None
        };

        let response = TokenResponse::new(&access, refresh.as_ref().map(|r| r.value.clone()), now);

        run_detached(commit_new_grant(self.store.clone(), access, refresh))
            .await
            .map_err(|e| (GrantStage::UserValidated, e))?;

        tracing::debug!(
            username = %user.username(),
            scope = %response.scope,
            "Password grant committed"
        );
        Ok(response)
    }

    async fn refresh_grant(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_value: &str,
    ) -> Result<TokenResponse, (GrantStage, AuthError)> {
        let client = self
            .authenticate_client(client_id, client_secret, GrantType::RefreshToken)
            .await?;
        let stage = GrantStage::GrantTypeChecked;

        let existing = self
            .store
            .get(refresh_value)
            .await
            .map_err(|e| (stage, e))?
            .filter(|token| token.kind == TokenKind::Refresh)
            .ok_or((stage, AuthError::InvalidGrant))?;

        if existing.client_id != client.client_id {
            tracing::warn!(
                client_id = %client.client_id,
                owner = %existing.client_id,
                "Refresh token presented by a different client"
            );
            return Err((stage, AuthError::InvalidGrant));
        }

        // The subject must still be provisioned.
        self.credentials
            .roles_of(&existing.subject)
            .map_err(|_| (stage, AuthError::InvalidGrant))?;
        let stage = GrantStage::UserValidated;

        let scopes: BTreeSet<String> = existing.scopes.intersection(&client.scopes).cloned().collect();
        if scopes.is_empty() {
            return Err((stage, AuthError::InvalidScope));
        }

        let now = self.clock.now();
        let access = Token::mint(
            TokenKind::Access,
            &existing.subject,
            &client.client_id,
            &client.resource_id,
            scopes.clone(),
            now,
            client.access_token_ttl_seconds,
        )
        .map_err(|e| (stage, e))?;

        match self.settings.refresh_policy {
            RefreshPolicy::Rotate => {
                let new_refresh = Token::mint(
                    TokenKind::Refresh,
                    &existing.subject,
                    &client.client_id,
                    &client.resource_id,
                    scopes,
                    now,
                    self.refresh_ttl(&client),
                )
                .map_err(|e| (stage, e))?
                .linked_to(&access.value);
                let access = access.linked_to(&new_refresh.value);
                let response = TokenResponse::new(&access, Some(new_refresh.value.clone()), now);

                run_detached(commit_rotation(
                    self.store.clone(),
                    refresh_value.to_string(),
                    access,
                    new_refresh,
                ))
                .await
                .map_err(|e| (stage, e))?;
                Ok(response)
            }
            RefreshPolicy::Reuse => {
                let access = access.linked_to(&existing.value);
                let response = TokenResponse::new(&access, Some(existing.value.clone()), now);

                run_detached(commit_reuse(self.store.clone(), existing.value.clone(), access))
                    .await
                    .map_err(|e| (stage, e))?;
                Ok(response)
            }
        }
    }

    /// Revoke a token owned by the calling client, plus the access token
    /// issued from it when it is a refresh token.
    /// Unknown tokens are not an error.
    ///
    /// # Errors
    /// - `InvalidClient` if client authentication fails
    /// - `StoreUnavailable` if the store cannot be reached
    pub async fn revoke(
        &self,
        client_id: &str,
        client_secret: &str,
        token_value: &str,
    ) -> Result<(), AuthError> {
        let client = self.clients.authenticate(client_id, client_secret).await?;

        let Some(token) = self.store.get(token_value).await? else {
            tracing::debug!(client_id = %client_id, "Revocation of unknown token ignored");
            return Ok(());
        };

        if token.client_id != client.client_id {
            tracing::warn!(
                client_id = %client_id,
                owner = %token.client_id,
                "Client tried to revoke a token it does not own"
            );
            return Ok(());
        }

        self.store.revoke(&token.value).await?;
        if token.kind == TokenKind::Refresh {
            if let Some(access) = &token.linked_token {
                self.store.revoke(access).await?;
            }
        }

        tracing::info!(
            client_id = %client_id,
            username = %token.subject,
            kind = ?token.kind,
            "Token revoked"
        );
        Ok(())
    }
}

/// Run a commit on its own task so dropping the caller does not cancel it
async fn run_detached<T, F>(commit: F) -> Result<T, AuthError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, AuthError>> + Send + 'static,
{
    tokio::spawn(commit)
        .await
        .map_err(|e| AuthError::Internal(format!("Token commit task failed: {}", e)))?
}

/// Best-effort removal of tokens written by a commit that later failed
async fn rollback(store: &TokenStoreBackend, written: &[&str]) {
    for value in written {
        if let Err(e) = store.revoke(value).await {
            tracing::error!(error = %e, "Rollback of partially issued token failed");
        }
    }
}

async fn commit_new_grant(
    store: TokenStoreBackend,
    access: Token,
    refresh: Option<Token>,
) -> Result<(), AuthError> {
    if let Some(refresh) = &refresh {
        store.put(refresh).await?;
    }
    if let Err(e) = store.put(&access).await {
        if let Some(refresh) = &refresh {
            rollback(&store, &[refresh.value.as_str()]).await;
        }
        return Err(e);
    }
    Ok(())
}

async fn commit_rotation(
    store: TokenStoreBackend,
    old_refresh_value: String,
    access: Token,
    new_refresh: Token,
) -> Result<(), AuthError> {
    // Whoever takes the old refresh token first wins; concurrent exchanges lose.
    let old_refresh = store
        .take(&old_refresh_value)
        .await?
        .ok_or(AuthError::InvalidGrant)?;

    let result = async {
        store.put(&new_refresh).await?;
        store.put(&access).await?;
        if let Some(old_access) = &old_refresh.linked_token {
            store.revoke(old_access).await?;
        }
        Ok::<(), AuthError>(())
    }
    .await;

    if let Err(e) = result {
        rollback(&store, &[access.value.as_str(), new_refresh.value.as_str()]).await;
        if let Err(restore) = store.put(&old_refresh).await {
            tracing::error!(error = %restore, "Failed to restore refresh token after rollback");
        }
        return Err(e);
    }
    Ok(())
}

async fn commit_reuse(
    store: TokenStoreBackend,
    refresh_value: String,
    access: Token,
) -> Result<(), AuthError> {
    // Holding the record while relinking serialises exchanges of the same
    // refresh token; a concurrent exchange finds it missing and is rejected.
    let refresh = store
        .take(&refresh_value)
        .await?
        .ok_or(AuthError::InvalidGrant)?;
    let old_access = refresh.linked_token.clone();
    let updated_refresh = refresh.clone().linked_to(&access.value);

    let result = async {
        store.put(&access).await?;
        store.put(&updated_refresh).await?;
        if let Some(old_access) = &old_access {
            store.revoke(old_access).await?;
        }
        Ok::<(), AuthError>(())
    }
    .await;

    if let Err(e) = result {
        rollback(&store, &[access.value.as_str()]).await;
        if let Err(restore) = store.put(&refresh).await {
            tracing::error!(error = %restore, "Failed to restore refresh token after rollback");
        }
        return Err(e);
    }
    Ok(())
}
