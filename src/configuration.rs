use std::collections::{BTreeSet, HashSet};

use crate::auth::{Client, GrantType, PasswordHasher, Role, User};
use crate::error::ConfigError;
use crate::middleware::RouteRule;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationSettings,
    #[serde(default)]
    pub token_store: TokenStoreSettings,
    #[serde(default)]
    pub tokens: TokenSettings,
    #[serde(default)]
    pub hashing: HashingSettings,
    #[serde(default)]
    pub clients: Vec<ClientSettings>,
    #[serde(default)]
    pub users: Vec<UserSettings>,
    #[serde(default)]
    pub routes: Vec<RouteSettings>,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ApplicationSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Which token store backend to run
#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    #[default]
    InMemory,
    Redis,
}

/// How expired tokens leave the store.
/// Expiry is always checked on read; `Sweep` also runs a periodic cleanup.
#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionMode {
    #[default]
    Lazy,
    Sweep,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct TokenStoreSettings {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub eviction: EvictionMode,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    #[serde(default)]
    pub redis: RedisSettings,
}

impl Default for TokenStoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::InMemory,
            eviction: EvictionMode::Lazy,
            sweep_interval_seconds: default_sweep_interval(),
            redis: RedisSettings::default(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct RedisSettings {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Upper bound for every Redis round trip
    #[serde(default = "default_redis_timeout")]
    pub timeout_ms: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            key_prefix: default_key_prefix(),
            timeout_ms: default_redis_timeout(),
        }
    }
}

fn default_key_prefix() -> String {
    "oauth2:token:".to_string()
}

fn default_redis_timeout() -> u64 {
    500
}

/// What happens to a refresh token when it is exchanged
#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshPolicy {
    /// Single use: the old refresh token is consumed and a new one issued
    #[default]
    Rotate,
    /// The refresh token stays valid until its own expiry
    Reuse,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct TokenSettings {
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_seconds: i64, // 30 days unless a client overrides it
    #[serde(default)]
    pub refresh_policy: RefreshPolicy,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            refresh_token_ttl_seconds: default_refresh_ttl(),
            refresh_policy: RefreshPolicy::Rotate,
        }
    }
}

impl TokenSettings {
    /// # Errors
    /// Returns error if the global refresh lifetime is out of range
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ttl("tokens", "refresh_token_ttl_seconds", self.refresh_token_ttl_seconds)
    }
}

fn default_refresh_ttl() -> i64 {
    2_592_000
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct HashingSettings {
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

impl Default for HashingSettings {
    fn default() -> Self {
        Self {
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

/// A registered client. Exactly one of `secret` (hashed at startup) or
/// `secret_hash` must be set.
#[derive(serde::Deserialize, Clone)]
pub struct ClientSettings {
    pub client_id: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub secret_hash: Option<String>,
    pub grant_types: Vec<GrantType>,
    pub access_token_ttl_seconds: i64,
    #[serde(default)]
    pub refresh_token_ttl_seconds: Option<i64>,
    pub resource_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ClientSettings {
    pub fn into_client(self, hasher: &PasswordHasher) -> Result<Client, ConfigError> {
        let what = format!("client {}", self.client_id);
        let secret_hash = resolve_hash(&what, self.secret, self.secret_hash, hasher)?;

        check_ttl(&what, "access_token_ttl_seconds", self.access_token_ttl_seconds)?;
        if let Some(ttl) = self.refresh_token_ttl_seconds {
            check_ttl(&what, "refresh_token_ttl_seconds", ttl)?;
        }
        if self.grant_types.is_empty() {
            return Err(ConfigError::MissingRequired(format!("{}: grant_types", what)));
        }

        let mut client = Client::new(
            self.client_id,
            secret_hash,
            self.grant_types.into_iter().collect::<HashSet<_>>(),
            self.access_token_ttl_seconds,
            self.resource_id,
            self.scopes.into_iter().collect::<BTreeSet<_>>(),
        );
        if let Some(ttl) = self.refresh_token_ttl_seconds {
            client = client.with_refresh_token_ttl(ttl);
        }
        Ok(client)
    }
}

/// A provisioned user. Exactly one of `password` (hashed at startup) or
/// `password_hash` must be set.
#[derive(serde::Deserialize, Clone)]
pub struct UserSettings {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl UserSettings {
    pub fn into_user(self, hasher: &PasswordHasher) -> Result<User, ConfigError> {
        let what = format!("user {}", self.username);
        let password_hash = resolve_hash(&what, self.password, self.password_hash, hasher)?;
        let roles = self.roles.into_iter().map(Role::new).collect();
        Ok(User::new(self.username, password_hash, roles))
    }
}

/// One protected path pattern, e.g. `/admin/**`
#[derive(serde::Deserialize, Clone, Debug)]
pub struct RouteSettings {
    pub pattern: String,
    pub resource_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl RouteSettings {
    pub fn into_rule(self) -> Result<RouteRule, ConfigError> {
        RouteRule::new(
            &self.pattern,
            self.resource_id,
            self.roles.into_iter().map(Role::new).collect(),
        )
    }
}

/// Longest lifetime any token may be configured with (10 years)
pub const MAX_TOKEN_TTL_SECONDS: i64 = 315_360_000;

fn check_ttl(what: &str, field: &str, seconds: i64) -> Result<(), ConfigError> {
    if !(1..=MAX_TOKEN_TTL_SECONDS).contains(&seconds) {
        return Err(ConfigError::InvalidValue(format!(
            "{}: {} must be between 1 and {}",
            what, field, MAX_TOKEN_TTL_SECONDS
        )));
    }
    Ok(())
}

fn resolve_hash(
    what: &str,
    plaintext: Option<String>,
    hash: Option<String>,
    hasher: &PasswordHasher,
) -> Result<String, ConfigError> {
    match (plaintext, hash) {
        (Some(plaintext), None) => hasher
            .hash(&plaintext)
            .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", what, e))),
        (None, Some(hash)) => {
            if !hash.starts_with("$2") {
                return Err(ConfigError::InvalidValue(format!(
                    "{}: stored hash is not a bcrypt hash",
                    what
                )));
            }
            Ok(hash)
        }
        (Some(_), Some(_)) => Err(ConfigError::InvalidValue(format!(
            "{}: set either the plaintext or the hash, not both",
            what
        ))),
        (None, None) => Err(ConfigError::MissingRequired(format!(
            "{}: credential",
            what
        ))),
    }
}

/// Load `configuration.{yaml,toml,json}` from the working directory (optional),
/// then apply `APP__SECTION__KEY` environment overrides.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;
    Ok(settings.try_deserialize::<Settings>()?)
}
