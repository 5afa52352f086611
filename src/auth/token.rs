/// Token records
///
/// Tokens are opaque random strings; everything the server knows about a
/// token lives in its `Token` record inside the token store. Values are
/// 64 alphanumeric characters drawn from the thread-local CSPRNG.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::AuthError;

const TOKEN_LENGTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub value: String,
    pub kind: TokenKind,
    /// Username the token was issued to
    pub subject: String,
    pub client_id: String,
    pub resource_id: String,
    pub scopes: BTreeSet<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// access -> its refresh token; refresh -> the access token last issued from it
    pub linked_token: Option<String>,
}

impl Token {
    /// Mint a token with a fresh random value
    ///
    /// # Errors
    /// Returns `Internal` if `issued_at + ttl_seconds` is not representable
    pub fn mint(
        kind: TokenKind,
        subject: &str,
        client_id: &str,
        resource_id: &str,
        scopes: BTreeSet<String>,
        issued_at: DateTime<Utc>,
        ttl_seconds: i64,
    ) -> Result<Self, AuthError> {
        let expires_at = Duration::try_seconds(ttl_seconds)
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
            .ok_or_else(|| {
                AuthError::Internal(format!("Token lifetime out of range: {}s", ttl_seconds))
            })?;

        Ok(Self {
            value: generate_token_value(),
            kind,
            subject: subject.to_string(),
            client_id: client_id.to_string(),
            resource_id: resource_id.to_string(),
            scopes,
            issued_at,
            expires_at,
            linked_token: None,
        })
    }

    pub fn linked_to(mut self, other: &str) -> Self {
        self.linked_token = Some(other.to_string());
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whole seconds left before expiry, never negative
    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    /// Remaining lifetime as a store TTL, at least one second
    pub fn ttl_seconds(&self, now: DateTime<Utc>) -> u64 {
        self.expires_in(now).max(1) as u64
    }

    /// Space-separated scope string as used on the wire
    pub fn scope_string(&self) -> String {
        join_scopes(&self.scopes)
    }
}

// Token values are bearer credentials; only a prefix is ever printed.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &redact(&self.value))
            .field("kind", &self.kind)
            .field("subject", &self.subject)
            .field("client_id", &self.client_id)
            .field("resource_id", &self.resource_id)
            .field("scopes", &self.scopes)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Generate a new cryptographically secure token value
pub fn generate_token_value() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

pub fn parse_scopes(raw: &str) -> BTreeSet<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

pub fn join_scopes(scopes: &BTreeSet<String>) -> String {
    scopes.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}

/// First six characters followed by an ellipsis
pub fn redact(value: &str) -> String {
    let prefix: String = value.chars().take(6).collect();
    format!("{}…", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access_token(now: DateTime<Utc>) -> Token {
        Token::mint(
            TokenKind::Access,
            "admin",
            "password",
            "rids",
            BTreeSet::from(["all".to_string()]),
            now,
            1800,
        )
        .unwrap()
    }

    #[test]
    fn test_generate_token_value() {
        let token = generate_token_value();

        // Token should be 64 characters
        assert_eq!(token.len(), TOKEN_LENGTH);
        // Token should be alphanumeric
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_token_value());
    }

    #[test]
    fn test_expiry_boundaries() {
        let now = Utc::now();
        let token = access_token(now);

        assert_eq!(token.expires_at, now + Duration::seconds(1800));
        assert!(!token.is_expired_at(now));
        assert!(!token.is_expired_at(now + Duration::seconds(1799)));
        assert!(token.is_expired_at(now + Duration::seconds(1800)));
        assert_eq!(token.expires_in(now), 1800);
        assert_eq!(token.expires_in(now + Duration::seconds(4000)), 0);
        assert_eq!(token.ttl_seconds(now + Duration::seconds(4000)), 1);
    }

    #[test]
    fn test_out_of_range_lifetime_is_an_error() {
        let result = Token::mint(
            TokenKind::Access,
            "admin",
            "password",
            "rids",
            BTreeSet::new(),
            Utc::now(),
            i64::MAX,
        );
        assert!(matches!(result, Err(AuthError::Internal(_))));
    }

    #[test]
    fn test_scope_parsing() {
        let scopes = parse_scopes("  write read\tall ");
        assert_eq!(join_scopes(&scopes), "all read write");
        assert!(parse_scopes("").is_empty());
    }

    #[test]
    fn test_debug_redacts_value() {
        let token = access_token(Utc::now());
        let printed = format!("{:?}", token);
        assert!(!printed.contains(&token.value));
    }

    #[test]
    fn test_record_serialization() {
        let token = access_token(Utc::now()).linked_to("refresh-value");
        let json = serde_json::to_string(&token).unwrap();
        assert!(json.contains("\"kind\":\"access\""));
        let back: Token = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }
}
