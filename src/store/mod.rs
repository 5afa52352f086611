/// Token Store
///
/// Owns the mapping from token value to token record. Two backends exist:
/// a mutex-guarded in-memory map and Redis. Both honor expiry lazily on
/// every read, and both can additionally be swept periodically by the
/// eviction sweeper.

use std::sync::Arc;

use crate::auth::Token;
use crate::clock::Clock;
use crate::configuration::{StoreBackend, TokenStoreSettings};
use crate::error::AuthError;

#[cfg(test)]
pub mod faulty;
pub mod memory;
pub mod redis;
pub mod sweeper;

pub use memory::InMemoryTokenStore;
pub use self::redis::RedisTokenStore;
pub use sweeper::{spawn_eviction_sweeper, EvictionSweeper};

/// Contract every token store backend fulfills.
///
/// All single-key operations are atomic with respect to each other: once
/// `revoke` (or `take`) has returned, no later `get` can observe the token.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert or overwrite the record for `token.value`
    async fn put(&self, token: &Token) -> Result<(), AuthError>;

    /// Fetch a live record. Expired records are discarded and reported as `None`.
    async fn get(&self, value: &str) -> Result<Option<Token>, AuthError>;

    /// Atomically fetch and remove a live record
    async fn take(&self, value: &str) -> Result<Option<Token>, AuthError>;

    /// Remove a record. Removing an unknown token is not an error.
    async fn revoke(&self, value: &str) -> Result<(), AuthError>;

    /// Drop every expired record and return how many were dropped
    async fn evict_expired(&self) -> Result<usize, AuthError>;

    async fn health_check(&self) -> Result<(), String>;
}

/// Backend selected at runtime from configuration
#[derive(Clone)]
pub enum TokenStoreBackend {
    InMemory(InMemoryTokenStore),
    Redis(RedisTokenStore),
    #[cfg(test)]
    Faulty(faulty::FaultyTokenStore),
}

impl TokenStoreBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InMemory(_) => "in-memory",
            Self::Redis(_) => "redis",
            #[cfg(test)]
            Self::Faulty(_) => "faulty",
        }
    }
}

#[async_trait::async_trait]
impl TokenStore for TokenStoreBackend {
    async fn put(&self, token: &Token) -> Result<(), AuthError> {
        match self {
            Self::InMemory(store) => store.put(token).await,
            Self::Redis(store) => store.put(token).await,
            #[cfg(test)]
            Self::Faulty(store) => store.put(token).await,
        }
    }

    async fn get(&self, value: &str) -> Result<Option<Token>, AuthError> {
        match self {
            Self::InMemory(store) => store.get(value).await,
            Self::Redis(store) => store.get(value).await,
            #[cfg(test)]
            Self::Faulty(store) => store.get(value).await,
        }
    }

    async fn take(&self, value: &str) -> Result<Option<Token>, AuthError> {
        match self {
            Self::InMemory(store) => store.take(value).await,
            Self::Redis(store) => store.take(value).await,
            #[cfg(test)]
            Self::Faulty(store) => store.take(value).await,
        }
    }

    async fn revoke(&self, value: &str) -> Result<(), AuthError> {
        match self {
            Self::InMemory(store) => store.revoke(value).await,
            Self::Redis(store) => store.revoke(value).await,
            #[cfg(test)]
            Self::Faulty(store) => store.revoke(value).await,
        }
    }

    async fn evict_expired(&self) -> Result<usize, AuthError> {
        match self {
            Self::InMemory(store) => store.evict_expired().await,
            Self::Redis(store) => store.evict_expired().await,
            #[cfg(test)]
            Self::Faulty(store) => store.evict_expired().await,
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        match self {
            Self::InMemory(store) => store.health_check().await,
            Self::Redis(store) => store.health_check().await,
            #[cfg(test)]
            Self::Faulty(store) => store.health_check().await,
        }
    }
}

/// Build the configured backend
///
/// # Errors
/// Returns `StoreUnavailable` if the Redis backend cannot be reached, or
/// `Internal` if its settings are incomplete
pub async fn create_token_store(
    settings: &TokenStoreSettings,
    clock: Arc<dyn Clock>,
) -> Result<TokenStoreBackend, AuthError> {
    match settings.backend {
        StoreBackend::InMemory => Ok(TokenStoreBackend::InMemory(InMemoryTokenStore::new(clock))),
        StoreBackend::Redis => {
            if settings.redis.url.is_empty() {
                return Err(AuthError::Internal(
                    "Redis URL is required for the redis token store".to_string(),
                ));
            }
            let store = RedisTokenStore::connect(&settings.redis, clock).await?;
            Ok(TokenStoreBackend::Redis(store))
        }
    }
}
