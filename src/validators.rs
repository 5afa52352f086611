/// Input validators for the HTTP layer
///
/// Rejects oversized or malformed parameters before they reach the core.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::AuthError;

const MAX_FIELD_LENGTH: usize = 256;
const MAX_BEARER_LENGTH: usize = 4096;

lazy_static! {
    // RFC 6750 b64token
    static ref BEARER_TOKEN_REGEX: Regex = Regex::new(r"^[A-Za-z0-9\-._~+/]+=*$").unwrap();
}

/// Validates a required form parameter
/// - Must be present and non-empty
/// - At most 256 characters
/// - No control characters
pub fn require_field<'a>(name: &str, value: Option<&'a str>) -> Result<&'a str, AuthError> {
    let value = value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::InvalidRequest(format!("Missing parameter: {}", name)))?;

    if value.len() > MAX_FIELD_LENGTH {
        return Err(AuthError::InvalidRequest(format!("Parameter too long: {}", name)));
    }

    if value.chars().any(char::is_control) {
        return Err(AuthError::InvalidRequest(format!("Invalid characters in: {}", name)));
    }

    Ok(value)
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
/// The scheme is matched case-insensitively.
pub fn parse_bearer(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() || token.len() > MAX_BEARER_LENGTH || !BEARER_TOKEN_REGEX.is_match(token) {
        return None;
    }
    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_field() {
        assert_eq!(require_field("username", Some("admin")).unwrap(), "admin");
        assert!(require_field("username", None).is_err());
        assert!(require_field("username", Some("")).is_err());
        assert!(require_field("username", Some("ad\u{0}min")).is_err());
        assert!(require_field("username", Some(&"a".repeat(MAX_FIELD_LENGTH + 1))).is_err());
    }

    #[test]
    fn test_missing_field_names_parameter() {
        match require_field("client_id", None) {
            Err(AuthError::InvalidRequest(msg)) => assert!(msg.contains("client_id")),
            other => panic!("Expected InvalidRequest, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc123"), Some("abc123"));
        assert_eq!(parse_bearer("bearer abc123"), Some("abc123"));
        assert_eq!(parse_bearer("Basic abc123"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("Bearer abc def"), None);
        assert_eq!(parse_bearer("Bearer"), None);
    }
}
