use super::TokenStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::auth::Token;
use crate::clock::Clock;
use crate::error::AuthError;

/// Process-local token store.
///
/// A single mutex guards the map, so every operation on a key is
/// linearizable. The lock is never held across an await point.
#[derive(Clone)]
pub struct InMemoryTokenStore {
    tokens: Arc<Mutex<HashMap<String, Token>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTokenStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tokens: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Token>> {
        // A panic while holding the lock cannot leave a half-written entry.
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn put(&self, token: &Token) -> Result<(), AuthError> {
        self.lock().insert(token.value.clone(), token.clone());
        Ok(())
    }

    async fn get(&self, value: &str) -> Result<Option<Token>, AuthError> {
        let now = self.clock.now();
        let mut tokens = self.lock();
        match tokens.get(value) {
            Some(token) if token.is_expired_at(now) => {
                tokens.remove(value);
                Ok(None)
            }
            Some(token) => Ok(Some(token.clone())),
            None => Ok(None),
        }
    }

    async fn take(&self, value: &str) -> Result<Option<Token>, AuthError> {
        let now = self.clock.now();
        let taken = self.lock().remove(value);
        Ok(taken.filter(|token| !token.is_expired_at(now)))
    }

    async fn revoke(&self, value: &str) -> Result<(), AuthError> {
        self.lock().remove(value);
        Ok(())
    }

    async fn evict_expired(&self) -> Result<usize, AuthError> {
        let now = self.clock.now();
        let mut tokens = self.lock();
        let before = tokens.len();
        tokens.retain(|_, token| !token.is_expired_at(now));
        Ok(before - tokens.len())
    }

    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }
}
