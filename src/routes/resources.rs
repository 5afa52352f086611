/// Protected demo resources
///
/// Served behind [`crate::middleware::BearerAuth`]; each handler echoes the
/// principal the middleware resolved.

use actix_web::{web, HttpResponse};
use serde::Serialize;

use crate::auth::Principal;

#[derive(Serialize)]
pub struct HelloResponse {
    pub message: String,
    pub principal: Principal,
}

fn greet(area: &str, principal: Principal) -> HttpResponse {
    HttpResponse::Ok().json(HelloResponse {
        message: format!("hello {} {}", area, principal.username),
        principal,
    })
}

/// GET /admin/hello (role `admin`)
pub async fn admin_hello(principal: web::ReqData<Principal>) -> HttpResponse {
    greet("admin", principal.into_inner())
}

/// GET /user/hello (role `user`)
pub async fn user_hello(principal: web::ReqData<Principal>) -> HttpResponse {
    greet("user", principal.into_inner())
}

/// GET /hello (any authenticated principal)
pub async fn hello(principal: web::ReqData<Principal>) -> HttpResponse {
    greet("from", principal.into_inner())
}
