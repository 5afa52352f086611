use super::TokenStore;
use async_trait::async_trait;
use log::error;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::Token;
use crate::clock::Clock;
use crate::configuration::RedisSettings;
use crate::error::AuthError;

const SCAN_BATCH: usize = 200;

/// Token store backed by Redis.
///
/// One JSON record per token under `<prefix><token value>`, written with
/// `SET .. EX` so Redis expires it natively. Every command is bounded by
/// the configured timeout and surfaces `StoreUnavailable` instead of hanging.
#[derive(Clone)]
pub struct RedisTokenStore {
    _client: Client,
    conn_manager: ConnectionManager,
    key_prefix: String,
    op_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl RedisTokenStore {
    /// Connect and ping the server
    ///
    /// # Errors
    /// Returns `StoreUnavailable` if the URL is invalid or the server does
    /// not answer within the timeout
    pub async fn connect(settings: &RedisSettings, clock: Arc<dyn Clock>) -> Result<Self, AuthError> {
        let op_timeout = Duration::from_millis(settings.timeout_ms);

        let client = Client::open(settings.url.as_str())
            .map_err(|err| AuthError::StoreUnavailable(format!("Invalid Redis URL: {}", err)))?;

        let conn_manager = tokio::time::timeout(op_timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| AuthError::StoreUnavailable("Redis connect timed out".to_string()))?
            .map_err(|err| {
                AuthError::StoreUnavailable(format!("Failed to create Redis connection manager: {}", err))
            })?;

        let store = Self {
            _client: client,
            conn_manager,
            key_prefix: settings.key_prefix.clone(),
            op_timeout,
            clock,
        };

        store
            .health_check()
            .await
            .map_err(AuthError::StoreUnavailable)?;

        Ok(store)
    }

    fn key(&self, value: &str) -> String {
        format!("{}{}", self.key_prefix, value)
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = RedisResult<T>>,
    ) -> Result<T, AuthError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                error!("Redis error during {}: {}", operation, err);
                Err(AuthError::StoreUnavailable(err.to_string()))
            }
            Err(_) => {
                error!("Redis {} timed out after {:?}", operation, self.op_timeout);
                Err(AuthError::StoreUnavailable(format!("{} timed out", operation)))
            }
        }
    }

    fn decode(&self, raw: &str) -> Result<Token, AuthError> {
        serde_json::from_str(raw)
            .map_err(|e| AuthError::Internal(format!("Unreadable token record: {}", e)))
    }

    async fn scan_keys(&self) -> Result<Vec<String>, AuthError> {
        let pattern = format!("{}*", self.key_prefix);
        let mut conn = self.conn_manager.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .bounded(
                    "scan",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn),
                )
                .await?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn put(&self, token: &Token) -> Result<(), AuthError> {
        let serialized = serde_json::to_string(token)
            .map_err(|e| AuthError::Internal(format!("Failed to serialize token: {}", e)))?;
        let ttl = token.ttl_seconds(self.clock.now());
        let mut conn = self.conn_manager.clone();

        self.bounded(
            "set",
            conn.set_ex::<_, _, ()>(self.key(&token.value), serialized, ttl),
        )
        .await
    }

    async fn get(&self, value: &str) -> Result<Option<Token>, AuthError> {
        let key = self.key(value);
        let mut conn = self.conn_manager.clone();

        let raw: Option<String> = self.bounded("get", conn.get(&key)).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let token = self.decode(&raw)?;
        if token.is_expired_at(self.clock.now()) {
            self.bounded("del", conn.del::<_, ()>(&key)).await?;
            return Ok(None);
        }
        Ok(Some(token))
    }

    async fn take(&self, value: &str) -> Result<Option<Token>, AuthError> {
        let mut conn = self.conn_manager.clone();

        let raw: Option<String> = self
            .bounded(
                "getdel",
                redis::cmd("GETDEL").arg(self.key(value)).query_async(&mut conn),
            )
            .await?;

        match raw {
            None => Ok(None),
            Some(raw) => {
                let token = self.decode(&raw)?;
                Ok((!token.is_expired_at(self.clock.now())).then_some(token))
            }
        }
    }

    async fn revoke(&self, value: &str) -> Result<(), AuthError> {
        let mut conn = self.conn_manager.clone();
        self.bounded("del", conn.del::<_, ()>(self.key(value))).await
    }

    async fn evict_expired(&self) -> Result<usize, AuthError> {
        let now = self.clock.now();
        let mut conn = self.conn_manager.clone();
        let mut evicted = 0;

        for key in self.scan_keys().await? {
            let raw: Option<String> = self.bounded("get", conn.get(&key)).await?;
            let expired = match raw {
                Some(raw) => self.decode(&raw).map(|t| t.is_expired_at(now)).unwrap_or(true),
                None => false,
            };
            if expired {
                self.bounded("del", conn.del::<_, ()>(&key)).await?;
                evicted += 1;
            }
        }

        Ok(evicted)
    }

    async fn health_check(&self) -> Result<(), String> {
        let mut conn = self.conn_manager.clone();
        match tokio::time::timeout(
            self.op_timeout,
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(format!("Redis health check failed: {}", err)),
            Err(_) => Err("Redis health check timed out".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenKind;
    use crate::clock::ManualClock;
    use chrono::Duration as ChronoDuration;
    use redis_test::server::RedisServer;
    use std::collections::BTreeSet;

    fn get_redis_url(server: &RedisServer) -> String {
        match &server.addr {
            redis::ConnectionAddr::Tcp(host, port) => {
                format!("redis://{}:{}/", host, port)
            }
            _ => "redis://127.0.0.1:6379/".to_string(),
        }
    }

    fn settings(url: String) -> RedisSettings {
        RedisSettings {
            url,
            key_prefix: "test:token:".to_string(),
            timeout_ms: 2000,
        }
    }

    fn token(clock: &ManualClock) -> Token {
        Token::mint(
            TokenKind::Access,
            "admin",
            "password",
            "rids",
            BTreeSet::from(["all".to_string()]),
            clock.now(),
            1800,
        )
        .unwrap()
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_token_operations() {
        // Start a Redis server for testing
        let server = RedisServer::new();
        let clock = ManualClock::default();
        let store = RedisTokenStore::connect(&settings(get_redis_url(&server)), Arc::new(clock.clone()))
            .await
            .unwrap();

        let token = token(&clock);
        store.put(&token).await.unwrap();
        assert_eq!(store.get(&token.value).await.unwrap(), Some(token.clone()));

        store.revoke(&token.value).await.unwrap();
        assert_eq!(store.get(&token.value).await.unwrap(), None);

        let token = self::token(&clock);
        store.put(&token).await.unwrap();
        assert_eq!(store.take(&token.value).await.unwrap(), Some(token.clone()));
        assert_eq!(store.take(&token.value).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_expiry_follows_clock() {
        let server = RedisServer::new();
        let clock = ManualClock::default();
        let store = RedisTokenStore::connect(&settings(get_redis_url(&server)), Arc::new(clock.clone()))
            .await
            .unwrap();

        let expiring = token(&clock);
        store.put(&expiring).await.unwrap();
        clock.advance(ChronoDuration::seconds(1800));
        assert_eq!(store.get(&expiring.value).await.unwrap(), None);

        let swept = token(&clock);
        store.put(&swept).await.unwrap();
        clock.advance(ChronoDuration::seconds(1800));
        assert_eq!(store.evict_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let settings = RedisSettings {
            url: "redis://127.0.0.1:1/".to_string(),
            key_prefix: "test:".to_string(),
            timeout_ms: 200,
        };
        let result = RedisTokenStore::connect(&settings, Arc::new(ManualClock::default())).await;
        assert!(matches!(result, Err(AuthError::StoreUnavailable(_))));
    }
}
