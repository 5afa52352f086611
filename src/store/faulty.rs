/// Token store with injectable write failures
///
/// Wraps the in-memory store; the n-th `put` after arming fails with
/// `StoreUnavailable`, everything else is delegated.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{InMemoryTokenStore, TokenStore};
use crate::auth::Token;
use crate::clock::Clock;
use crate::error::AuthError;

#[derive(Clone)]
pub struct FaultyTokenStore {
    inner: InMemoryTokenStore,
    puts: Arc<AtomicUsize>,
    // 1-based index of the put that fails; 0 disarms
    fail_on_put: Arc<AtomicUsize>,
}

impl FaultyTokenStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: InMemoryTokenStore::new(clock),
            puts: Arc::new(AtomicUsize::new(0)),
            fail_on_put: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the `n`-th put from now on; later puts succeed again
    pub fn fail_nth_put(&self, n: usize) {
        self.puts.store(0, Ordering::SeqCst);
        self.fail_on_put.store(n, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl TokenStore for FaultyTokenStore {
    async fn put(&self, token: &Token) -> Result<(), AuthError> {
        let count = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .fail_on_put
            .compare_exchange(count, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return Err(AuthError::StoreUnavailable("injected write failure".to_string()));
        }
        self.inner.put(token).await
    }

    async fn get(&self, value: &str) -> Result<Option<Token>, AuthError> {
        self.inner.get(value).await
    }

    async fn take(&self, value: &str) -> Result<Option<Token>, AuthError> {
        self.inner.take(value).await
    }

    async fn revoke(&self, value: &str) -> Result<(), AuthError> {
        self.inner.revoke(value).await
    }

    async fn evict_expired(&self) -> Result<usize, AuthError> {
        self.inner.evict_expired().await
    }

    async fn health_check(&self) -> Result<(), String> {
        self.inner.health_check().await
    }
}
