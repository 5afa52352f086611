/// OAuth2 Token Endpoints
///
/// POST /oauth/token and POST /oauth/revoke. Both take form-encoded bodies
/// and authenticate the client either through form parameters or HTTP
/// Basic, never both.

use actix_web::{http::header, web, HttpRequest, HttpResponse};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;

use crate::auth::{parse_scopes, GrantType, TokenIssuer, TokenRequest};
use crate::error::{AuthError, ErrorContext};
use crate::validators::require_field;

/// Token endpoint form. Every field is optional so that missing
/// parameters surface as `invalid_request` instead of a bare 400.
#[derive(Deserialize)]
pub struct TokenForm {
    pub grant_type: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub scope: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Deserialize)]
pub struct RevokeForm {
    pub token: Option<String>,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// POST /oauth/token
///
/// # Errors
/// - 400: `invalid_request`, `invalid_grant`, `unsupported_grant_type`, `invalid_scope`
/// - 401: `invalid_client`
/// - 503: `temporarily_unavailable`
pub async fn issue_token(
    req: HttpRequest,
    form: web::Form<TokenForm>,
    issuer: web::Data<TokenIssuer>,
) -> Result<HttpResponse, AuthError> {
    let mut context = ErrorContext::new("issue_token");

    let request = token_request(&req, form.into_inner()).map_err(|e| {
        context.log_error(&e);
        e
    })?;

    context = context.with_client_id(request.client_id());
    if let TokenRequest::Password { username, .. } = &request {
        context = context.with_username(username.as_str());
    }

    tracing::debug!(
        request_id = %context.request_id,
        grant_type = %request.grant_type(),
        "Token request received"
    );

    let response = issuer.grant(request).await.map_err(|e| {
        context.log_error(&e);
        e
    })?;

    Ok(HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .insert_header((header::PRAGMA, "no-cache"))
        .json(response))
}

/// POST /oauth/revoke
///
/// Unknown tokens and tokens owned by another client still answer 200.
pub async fn revoke_token(
    req: HttpRequest,
    form: web::Form<RevokeForm>,
    issuer: web::Data<TokenIssuer>,
) -> Result<HttpResponse, AuthError> {
    let mut context = ErrorContext::new("revoke_token");
    let form = form.into_inner();

    let (client_id, client_secret) =
        client_credentials(&req, form.client_id.as_deref(), form.client_secret.as_deref())
            .map_err(|e| {
                context.log_error(&e);
                e
            })?;
    context = context.with_client_id(client_id.as_str());

    let token = require_field("token", form.token.as_deref()).map_err(|e| {
        context.log_error(&e);
        e
    })?;

    if let Some(hint) = form.token_type_hint.as_deref() {
        tracing::debug!(
            request_id = %context.request_id,
            client_id = %client_id,
            hint = %hint,
            "Revocation hint received"
        );
    }

    issuer
        .revoke(&client_id, &client_secret, token)
        .await
        .map_err(|e| {
            context.log_error(&e);
            e
        })?;
    Ok(HttpResponse::Ok().finish())
}

/// Turn a token endpoint form into a grant request
fn token_request(req: &HttpRequest, form: TokenForm) -> Result<TokenRequest, AuthError> {
    let (client_id, client_secret) =
        client_credentials(req, form.client_id.as_deref(), form.client_secret.as_deref())?;

    let grant_type: GrantType = require_field("grant_type", form.grant_type.as_deref())?.parse()?;
    let request = match grant_type {
        GrantType::Password => TokenRequest::Password {
            client_id,
            client_secret,
            username: require_field("username", form.username.as_deref())?.to_string(),
            password: require_field("password", form.password.as_deref())?.to_string(),
            scopes: parse_scopes(form.scope.as_deref().unwrap_or_default()),
        },
        GrantType::RefreshToken => TokenRequest::RefreshToken {
            client_id,
            client_secret,
            refresh_token: require_field("refresh_token", form.refresh_token.as_deref())?
                .to_string(),
        },
    };
    Ok(request)
}

/// Resolve client credentials from the Basic header or the form body
fn client_credentials(
    req: &HttpRequest,
    form_id: Option<&str>,
    form_secret: Option<&str>,
) -> Result<(String, String), AuthError> {
    let basic = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Basic "));

    match basic {
        Some(encoded) => {
            if form_id.is_some() || form_secret.is_some() {
                return Err(AuthError::InvalidRequest(
                    "Client credentials supplied more than once".to_string(),
                ));
            }
            parse_basic(encoded.trim())
        }
        None => {
            let id = require_field("client_id", form_id)?;
            let secret = require_field("client_secret", form_secret)?;
            Ok((id.to_string(), secret.to_string()))
        }
    }
}

fn parse_basic(encoded: &str) -> Result<(String, String), AuthError> {
    let decoded = STANDARD
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or(AuthError::InvalidClient)?;

    let (id, secret) = decoded.split_once(':').ok_or(AuthError::InvalidClient)?;
    let id = require_field("client_id", Some(id)).map_err(|_| AuthError::InvalidClient)?;
    let secret =
        require_field("client_secret", Some(secret)).map_err(|_| AuthError::InvalidClient)?;
    Ok((id.to_string(), secret.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_basic_credentials() {
        let encoded = STANDARD.encode("password:123456");
        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, format!("Basic {}", encoded)))
            .to_http_request();
        assert_eq!(
            client_credentials(&req, None, None).unwrap(),
            ("password".to_string(), "123456".to_string())
        );
    }

    #[test]
    fn test_form_credentials() {
        let req = TestRequest::default().to_http_request();
        assert_eq!(
            client_credentials(&req, Some("password"), Some("123456")).unwrap(),
            ("password".to_string(), "123456".to_string())
        );
        assert!(matches!(
            client_credentials(&req, Some("password"), None),
            Err(AuthError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_credentials_supplied_twice() {
        let encoded = STANDARD.encode("password:123456");
        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, format!("Basic {}", encoded)))
            .to_http_request();
        assert!(matches!(
            client_credentials(&req, Some("password"), Some("123456")),
            Err(AuthError::InvalidRequest(_))
        ));
    }

    fn form(grant_type: &str) -> TokenForm {
        TokenForm {
            grant_type: Some(grant_type.to_string()),
            client_id: Some("password".to_string()),
            client_secret: Some("123456".to_string()),
            username: Some("admin".to_string()),
            password: Some("123456".to_string()),
            scope: Some("all".to_string()),
            refresh_token: None,
        }
    }

    #[test]
    fn test_token_request_from_password_form() {
        let req = TestRequest::default().to_http_request();
        let request = token_request(&req, form("password")).unwrap();
        assert_eq!(request.grant_type(), GrantType::Password);
        assert_eq!(request.client_id(), "password");
        match request {
            TokenRequest::Password { username, scopes, .. } => {
                assert_eq!(username, "admin");
                assert!(scopes.contains("all"));
            }
            TokenRequest::RefreshToken { .. } => panic!("Expected a password request"),
        }
    }

    #[test]
    fn test_token_request_needs_refresh_token() {
        let req = TestRequest::default().to_http_request();
        assert!(matches!(
            token_request(&req, form("refresh_token")),
            Err(AuthError::InvalidRequest(_))
        ));

        let mut refresh = form("refresh_token");
        refresh.refresh_token = Some("abc".to_string());
        assert_eq!(
            token_request(&req, refresh).unwrap().grant_type(),
            GrantType::RefreshToken
        );
    }

    #[test]
    fn test_malformed_basic() {
        assert_eq!(parse_basic("not base64!").unwrap_err(), AuthError::InvalidClient);
        let no_colon = STANDARD.encode("password");
        assert_eq!(parse_basic(&no_colon).unwrap_err(), AuthError::InvalidClient);
    }
}
