//! Core-level scenarios against the reference deployment: client
//! `password`/123456 on resource `rids` with scope `all` and 1800 s access
//! tokens, user `admin` (role admin) and user `lin` (role user).

use chrono::Duration;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use oauth2_server::auth::{GrantType, Role, TokenKind, TokenRequest};
use oauth2_server::clock::ManualClock;
use oauth2_server::configuration::{
    ApplicationSettings, ClientSettings, HashingSettings, Settings, TokenSettings,
    TokenStoreSettings, UserSettings,
};
use oauth2_server::error::AuthError;
use oauth2_server::startup::{build_core, AuthCore};
use oauth2_server::store::{InMemoryTokenStore, TokenStore, TokenStoreBackend};

fn settings() -> Settings {
    Settings {
        application: ApplicationSettings::default(),
        token_store: TokenStoreSettings::default(),
        tokens: TokenSettings::default(),
        hashing: HashingSettings { bcrypt_cost: 4 },
        clients: vec![
            ClientSettings {
                client_id: "password".to_string(),
                secret: Some("123456".to_string()),
                secret_hash: None,
                grant_types: vec![GrantType::Password, GrantType::RefreshToken],
                access_token_ttl_seconds: 1800,
                refresh_token_ttl_seconds: None,
                resource_id: "rids".to_string(),
                scopes: vec!["all".to_string()],
            },
            ClientSettings {
                client_id: "mobile".to_string(),
                secret: Some("abcdef".to_string()),
                secret_hash: None,
                grant_types: vec![GrantType::Password, GrantType::RefreshToken],
                access_token_ttl_seconds: 600,
                refresh_token_ttl_seconds: Some(3600),
                resource_id: "rids".to_string(),
                scopes: vec!["all".to_string()],
            },
        ],
        users: vec![
            UserSettings {
                username: "admin".to_string(),
                password: Some("123456".to_string()),
                password_hash: None,
                roles: vec!["admin".to_string()],
            },
            UserSettings {
                username: "lin".to_string(),
                password: Some("123456".to_string()),
                password_hash: None,
                roles: vec!["user".to_string()],
            },
        ],
        routes: vec![],
    }
}

struct Harness {
    core: AuthCore,
    clock: ManualClock,
}

fn harness() -> Harness {
    let clock = ManualClock::default();
    let store = TokenStoreBackend::InMemory(InMemoryTokenStore::new(Arc::new(clock.clone())));
    let core = build_core(&settings(), store, Arc::new(clock.clone())).expect("Failed to provision core");
    Harness { core, clock }
}

fn password_request(username: &str) -> TokenRequest {
    TokenRequest::Password {
        client_id: "password".to_string(),
        client_secret: "123456".to_string(),
        username: username.to_string(),
        password: "123456".to_string(),
        scopes: BTreeSet::from(["all".to_string()]),
    }
}

fn refresh_request(client_id: &str, secret: &str, refresh_token: &str) -> TokenRequest {
    TokenRequest::RefreshToken {
        client_id: client_id.to_string(),
        client_secret: secret.to_string(),
        refresh_token: refresh_token.to_string(),
    }
}

fn role(label: &str) -> HashSet<Role> {
    HashSet::from([Role::from(label)])
}

#[tokio::test]
async fn admin_scenario() {
    let h = harness();
    let response = h.core.issuer.grant(password_request("admin")).await.unwrap();
    assert_eq!(response.expires_in, 1800);
    assert_eq!(response.scope, "all");

    let principal = h
        .core
        .validator
        .authorize(&response.access_token, "rids", &role("admin"))
        .await
        .unwrap();
    assert_eq!(principal.username, "admin");

    assert_eq!(
        h.core
            .validator
            .authorize(&response.access_token, "rids", &role("user"))
            .await
            .unwrap_err(),
        AuthError::InsufficientRole
    );
}

#[tokio::test]
async fn lin_scenario() {
    let h = harness();
    let response = h.core.issuer.grant(password_request("lin")).await.unwrap();

    assert_eq!(
        h.core
            .validator
            .authorize(&response.access_token, "rids", &role("admin"))
            .await
            .unwrap_err(),
        AuthError::InsufficientRole
    );
    assert!(h
        .core
        .validator
        .authorize(&response.access_token, "rids", &role("user"))
        .await
        .is_ok());
}

#[tokio::test]
async fn other_resource_is_mismatch() {
    let h = harness();
    let response = h.core.issuer.grant(password_request("admin")).await.unwrap();

    assert_eq!(
        h.core
            .validator
            .authorize(&response.access_token, "billing", &role("admin"))
            .await
            .unwrap_err(),
        AuthError::ResourceMismatch
    );
}

#[tokio::test]
async fn expiry_is_enforced_before_any_sweep() {
    let h = harness();
    let response = h.core.issuer.grant(password_request("admin")).await.unwrap();

    h.clock.advance(Duration::seconds(1800));
    assert_eq!(
        h.core
            .validator
            .authorize(&response.access_token, "rids", &role("admin"))
            .await
            .unwrap_err(),
        AuthError::InvalidToken
    );
}

#[tokio::test]
async fn refresh_invalidates_previous_access_token() {
    let h = harness();
    let first = h.core.issuer.grant(password_request("lin")).await.unwrap();
    let refresh = first.refresh_token.clone().unwrap();

    let second = h
        .core
        .issuer
        .grant(refresh_request("password", "123456", &refresh))
        .await
        .unwrap();
    assert_ne!(first.access_token, second.access_token);

    assert_eq!(
        h.core
            .validator
            .authorize(&first.access_token, "rids", &HashSet::new())
            .await
            .unwrap_err(),
        AuthError::InvalidToken
    );
    assert!(h
        .core
        .validator
        .authorize(&second.access_token, "rids", &role("user"))
        .await
        .is_ok());
}

#[tokio::test]
async fn refresh_by_another_client_is_invalid_grant() {
    let h = harness();
    let first = h.core.issuer.grant(password_request("admin")).await.unwrap();
    let refresh = first.refresh_token.unwrap();

    assert_eq!(
        h.core
            .issuer
            .grant(refresh_request("mobile", "abcdef", &refresh))
            .await
            .unwrap_err(),
        AuthError::InvalidGrant
    );

    // The rightful owner can still use it
    assert!(h
        .core
        .issuer
        .grant(refresh_request("password", "123456", &refresh))
        .await
        .is_ok());
}

#[tokio::test]
async fn revoke_removes_token_from_store() {
    let h = harness();
    let response = h.core.issuer.grant(password_request("admin")).await.unwrap();

    let stored = h.core.store.get(&response.access_token).await.unwrap().unwrap();
    assert_eq!(stored.kind, TokenKind::Access);

    h.core
        .issuer
        .revoke("password", "123456", &response.access_token)
        .await
        .unwrap();

    assert!(h.core.store.get(&response.access_token).await.unwrap().is_none());
    assert_eq!(
        h.core
            .validator
            .authorize(&response.access_token, "rids", &HashSet::new())
            .await
            .unwrap_err(),
        AuthError::InvalidToken
    );
}

#[tokio::test]
async fn client_refresh_ttl_overrides_default() {
    let h = harness();
    let response = h
        .core
        .issuer
        .grant(TokenRequest::Password {
            client_id: "mobile".to_string(),
            client_secret: "abcdef".to_string(),
            username: "lin".to_string(),
            password: "123456".to_string(),
            scopes: BTreeSet::new(),
        })
        .await
        .unwrap();
    assert_eq!(response.expires_in, 600);

    let refresh = response.refresh_token.unwrap();
    h.clock.advance(Duration::seconds(3600));
    assert_eq!(
        h.core
            .issuer
            .grant(refresh_request("mobile", "abcdef", &refresh))
            .await
            .unwrap_err(),
        AuthError::InvalidGrant
    );
}

#[tokio::test]
async fn concurrent_refresh_has_one_winner() {
    let h = harness();
    let first = h.core.issuer.grant(password_request("admin")).await.unwrap();
    let refresh = first.refresh_token.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let issuer = h.core.issuer.clone();
        let refresh = refresh.clone();
        handles.push(tokio::spawn(async move {
            issuer
                .grant(refresh_request("password", "123456", &refresh))
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert_eq!(e, AuthError::InvalidGrant),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn default_routes_apply_when_none_configured() {
    let h = harness();
    assert_eq!(h.core.routes.len(), 3);
    let rule = h.core.routes.resolve("/admin/hello").unwrap();
    assert_eq!(rule.resource_id, "rids");
    assert!(rule.required_roles.contains(&Role::from("admin")));
    assert!(h.core.routes.resolve("/hello").unwrap().required_roles.is_empty());
}
