/// Error Handling Module
///
/// One typed failure per outcome the core can report:
/// 1. Credential errors (user lookup, password verification)
/// 2. Client and grant errors (token endpoint, mapped to OAuth2 error codes)
/// 3. Access errors (bearer validation, mapped to 401 / 403)
/// 4. Store errors (the only retryable kind)
/// 5. Configuration errors raised while provisioning at startup
///
/// No variant carries a password hash, a client secret or a token value.

use actix_web::{error::ResponseError, http::header, http::StatusCode, HttpResponse};
use std::error::Error as StdError;
use std::fmt;

/// ============================================================================
/// 1. CORE ERROR TYPE
/// ============================================================================

/// Every failure the authorization and resource cores can return
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No user with the given username
    UnknownPrincipal,
    /// User exists but the password does not match
    InvalidCredentials,
    /// The stored password or secret hash cannot be parsed
    CorruptCredentialRecord,
    /// No client with the given client_id
    ClientNotFound,
    /// Client authentication failed (unknown client or wrong secret)
    InvalidClient,
    /// The grant type is unknown or not allowed for this client
    UnsupportedGrantType,
    /// None of the requested scopes are granted to the client
    InvalidScope,
    /// User credentials or refresh token rejected
    InvalidGrant,
    /// A required request parameter is missing or malformed
    InvalidRequest(String),
    /// Bearer token absent, expired, revoked or of the wrong kind
    InvalidToken,
    /// Token was issued for another resource
    ResourceMismatch,
    /// Principal lacks every required role
    InsufficientRole,
    /// Token store could not be reached in time
    StoreUnavailable(String),
    Internal(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::UnknownPrincipal => write!(f, "Unknown principal"),
            AuthError::InvalidCredentials => write!(f, "Invalid credentials"),
            AuthError::CorruptCredentialRecord => write!(f, "Corrupt credential record"),
            AuthError::ClientNotFound => write!(f, "Client not found"),
            AuthError::InvalidClient => write!(f, "Client authentication failed"),
            AuthError::UnsupportedGrantType => write!(f, "Unsupported grant type"),
            AuthError::InvalidScope => write!(f, "Invalid scope"),
            AuthError::InvalidGrant => write!(f, "Invalid grant"),
            AuthError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            AuthError::InvalidToken => write!(f, "Invalid or expired token"),
            AuthError::ResourceMismatch => write!(f, "Token is not valid for this resource"),
            AuthError::InsufficientRole => write!(f, "Insufficient role"),
            AuthError::StoreUnavailable(msg) => write!(f, "Token store unavailable: {}", msg),
            AuthError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for AuthError {}

impl AuthError {
    /// Only store outages are worth retrying; everything else is final for the request
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::StoreUnavailable(_))
    }

    /// Standard OAuth2 / RFC 6750 error code
    pub fn oauth_code(&self) -> &'static str {
        match self {
            AuthError::UnknownPrincipal | AuthError::InvalidCredentials | AuthError::InvalidGrant => {
                "invalid_grant"
            }
            AuthError::ClientNotFound | AuthError::InvalidClient => "invalid_client",
            AuthError::UnsupportedGrantType => "unsupported_grant_type",
            AuthError::InvalidScope => "invalid_scope",
            AuthError::InvalidRequest(_) => "invalid_request",
            AuthError::InvalidToken => "invalid_token",
            AuthError::ResourceMismatch | AuthError::InsufficientRole => "access_denied",
            AuthError::StoreUnavailable(_) => "temporarily_unavailable",
            AuthError::CorruptCredentialRecord | AuthError::Internal(_) => "server_error",
        }
    }

    /// Description safe to hand back to the caller
    pub fn description(&self) -> String {
        match self {
            AuthError::UnknownPrincipal | AuthError::InvalidCredentials | AuthError::InvalidGrant => {
                "Bad credentials or invalid refresh token".to_string()
            }
            AuthError::InvalidRequest(msg) => msg.clone(),
            AuthError::StoreUnavailable(_) => "Token store temporarily unavailable".to_string(),
            AuthError::CorruptCredentialRecord | AuthError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// ============================================================================
/// 2. CONFIGURATION ERRORS
/// ============================================================================

/// Raised while turning configuration into users, clients and routes
#[derive(Debug)]
pub enum ConfigError {
    MissingRequired(String),
    InvalidValue(String),
    Load(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingRequired(msg) => write!(f, "Missing required config: {}", msg),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config value: {}", msg),
            ConfigError::Load(msg) => write!(f, "Config load error: {}", msg),
        }
    }
}

impl StdError for ConfigError {}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// OAuth2 error body: `{"error": ..., "error_description": ...}`
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    pub error_description: String,
}

impl From<&AuthError> for OAuthErrorResponse {
    fn from(err: &AuthError) -> Self {
        Self {
            error: err.oauth_code().to_string(),
            error_description: err.description(),
        }
    }
}

impl ResponseError for AuthError {
    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if matches!(self, AuthError::InvalidToken) {
            builder.insert_header((
                header::WWW_AUTHENTICATE,
                format!(
                    "Bearer error=\"{}\", error_description=\"{}\"",
                    self.oauth_code(),
                    self.description()
                ),
            ));
        }
        builder
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .json(OAuthErrorResponse::from(self))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::ClientNotFound | AuthError::InvalidClient | AuthError::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::ResourceMismatch | AuthError::InsufficientRole => StatusCode::FORBIDDEN,
            AuthError::UnknownPrincipal
            | AuthError::InvalidCredentials
            | AuthError::InvalidGrant
            | AuthError::UnsupportedGrantType
            | AuthError::InvalidScope
            | AuthError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::CorruptCredentialRecord | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// ============================================================================
// 4. ERROR CONTEXT ENRICHMENT
// ============================================================================

/// Per-request context attached to log lines
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub operation: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            client_id: None,
            username: None,
            operation: operation.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn log_error(&self, error: &AuthError) {
        let context = serde_json::json!({
            "request_id": self.request_id,
            "operation": self.operation,
            "client_id": self.client_id,
            "username": self.username,
            "timestamp": self.timestamp.to_rfc3339(),
        });

        match error {
            AuthError::StoreUnavailable(_)
            | AuthError::CorruptCredentialRecord
            | AuthError::Internal(_) => {
                tracing::error!(
                    error = %error,
                    retryable = error.is_retryable(),
                    context = ?context,
                    "Request failed"
                );
            }
            _ => {
                tracing::warn!(
                    error = %error,
                    context = ?context,
                    "Request rejected"
                );
            }
        }
    }
}
