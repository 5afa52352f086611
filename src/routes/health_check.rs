use actix_web::{web, HttpResponse};

use crate::store::{TokenStore, TokenStoreBackend};

/// GET /health_check
///
/// 200 when the token store answers, 503 otherwise.
pub async fn health_check(store: web::Data<TokenStoreBackend>) -> HttpResponse {
    tracing::debug!("Health check endpoint called");
    match store.health_check().await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "token_store": store.name(),
        })),
        Err(e) => {
            tracing::error!(backend = %store.name(), error = %e, "Token store health check failed");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "unavailable",
                "token_store": store.name(),
            }))
        }
    }
}
