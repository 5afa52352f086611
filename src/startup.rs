use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{AccessValidator, ClientRegistry, CredentialStore, PasswordHasher, Role, TokenIssuer};
use crate::clock::Clock;
use crate::configuration::Settings;
use crate::error::ConfigError;
use crate::logger::LoggerMiddleware;
use crate::middleware::{BearerAuth, RouteRule, RouteTable};
use crate::routes::{admin_hello, health_check, hello, issue_token, revoke_token, user_hello};
use crate::store::TokenStoreBackend;

/// Resource id of the bundled demo resource server
pub const DEMO_RESOURCE_ID: &str = "rids";

/// Everything the HTTP layer shares across workers
#[derive(Clone)]
pub struct AuthCore {
    pub store: TokenStoreBackend,
    pub issuer: Arc<TokenIssuer>,
    pub validator: Arc<AccessValidator>,
    pub routes: Arc<RouteTable>,
}

/// Provision users, clients and routes from configuration and wire them to
/// an already-connected token store.
///
/// # Errors
/// Returns error if a user, client or route entry is invalid or duplicated
pub fn build_core(
    settings: &Settings,
    store: TokenStoreBackend,
    clock: Arc<dyn Clock>,
) -> Result<AuthCore, ConfigError> {
    settings.tokens.validate()?;

    let hasher = PasswordHasher::new(settings.hashing.bcrypt_cost)
        .map_err(|e| ConfigError::InvalidValue(format!("hashing.bcrypt_cost: {}", e)))?;

    let users = settings
        .users
        .iter()
        .cloned()
        .map(|u| u.into_user(&hasher))
        .collect::<Result<Vec<_>, _>>()?;
    let credentials = Arc::new(
        CredentialStore::new(users, hasher)
            .map_err(|e| ConfigError::InvalidValue(format!("users: {}", e)))?,
    );

    let clients = settings
        .clients
        .iter()
        .cloned()
        .map(|c| c.into_client(&hasher))
        .collect::<Result<Vec<_>, _>>()?;
    let clients = Arc::new(
        ClientRegistry::new(clients, hasher)
            .map_err(|e| ConfigError::InvalidValue(format!("clients: {}", e)))?,
    );

    let rules = if settings.routes.is_empty() {
        default_route_rules()?
    } else {
        settings
            .routes
            .iter()
            .cloned()
            .map(|r| r.into_rule())
            .collect::<Result<Vec<_>, _>>()?
    };

    tracing::info!(
        users = credentials.len(),
        clients = clients.len(),
        routes = rules.len(),
        token_store = store.name(),
        refresh_policy = ?settings.tokens.refresh_policy,
        "Authorization core provisioned"
    );

    let issuer = TokenIssuer::new(
        clients,
        credentials.clone(),
        store.clone(),
        clock.clone(),
        settings.tokens.clone(),
    );
    let validator = AccessValidator::new(store.clone(), credentials, clock);

    Ok(AuthCore {
        store,
        issuer: Arc::new(issuer),
        validator: Arc::new(validator),
        routes: Arc::new(RouteTable::new(rules)),
    })
}

/// `/admin/**` needs `admin`, `/user/**` needs `user`, anything else any
/// authenticated principal. All on the demo resource.
pub fn default_route_rules() -> Result<Vec<RouteRule>, ConfigError> {
    Ok(vec![
        RouteRule::new(
            "/admin/**",
            DEMO_RESOURCE_ID.to_string(),
            HashSet::from([Role::from("admin")]),
        )?,
        RouteRule::new(
            "/user/**",
            DEMO_RESOURCE_ID.to_string(),
            HashSet::from([Role::from("user")]),
        )?,
        RouteRule::new("/**", DEMO_RESOURCE_ID.to_string(), HashSet::new())?,
    ])
}

pub fn run(listener: TcpListener, core: AuthCore) -> Result<Server, std::io::Error> {
    let store = web::Data::new(core.store.clone());
    let issuer = web::Data::from(core.issuer.clone());

    let server = HttpServer::new(move || {
        App::new()
            .wrap(LoggerMiddleware)
            .app_data(store.clone())
            .app_data(issuer.clone())
            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/oauth/token", web::post().to(issue_token))
            .route("/oauth/revoke", web::post().to(revoke_token))
            // Protected routes
            .service(
                web::scope("")
                    .wrap(BearerAuth::new(core.validator.clone(), core.routes.clone()))
                    .route("/admin/hello", web::get().to(admin_hello))
                    .route("/user/hello", web::get().to(user_hello))
                    .route("/hello", web::get().to(hello)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
