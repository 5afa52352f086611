/// Bearer Token Middleware
///
/// Resolves the route rule for the request path, validates the bearer
/// token against it and injects the [`Principal`] into request extensions
/// for use by route handlers.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::sync::Arc;

use crate::auth::AccessValidator;
use crate::error::{AuthError, ErrorContext};
use crate::middleware::RouteTable;
use crate::validators::parse_bearer;

/// Protects every route of the scope it wraps.
///
/// Paths without a matching rule are denied.
pub struct BearerAuth {
    validator: Arc<AccessValidator>,
    routes: Arc<RouteTable>,
}

impl BearerAuth {
    pub fn new(validator: Arc<AccessValidator>, routes: Arc<RouteTable>) -> Self {
        Self { validator, routes }
    }
}

impl<S, B> Transform<S, ServiceRequest> for BearerAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = BearerAuthService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(BearerAuthService {
            service: Rc::new(service),
            validator: self.validator.clone(),
            routes: self.routes.clone(),
        }))
    }
}

pub struct BearerAuthService<S> {
    service: Rc<S>,
    validator: Arc<AccessValidator>,
    routes: Arc<RouteTable>,
}

impl<S, B> Service<ServiceRequest> for BearerAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let context = ErrorContext::new("authorize_request");

        let Some(rule) = self.routes.resolve(req.path()).cloned() else {
            tracing::warn!(
                request_id = %context.request_id,
                path = %req.path(),
                "No route rule matches path"
            );
            return Box::pin(async move { Err(AuthError::InsufficientRole.into()) });
        };

        let bearer = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(parse_bearer)
            .map(str::to_string);

        let Some(bearer) = bearer else {
            tracing::warn!(
                request_id = %context.request_id,
                "Missing or invalid Authorization header"
            );
            return Box::pin(async move { Err(AuthError::InvalidToken.into()) });
        };

        let validator = self.validator.clone();
        let service = self.service.clone();

        Box::pin(async move {
            let principal = validator
                .authorize(&bearer, &rule.resource_id, &rule.required_roles)
                .await
                .map_err(|e| {
                    tracing::warn!(
                        request_id = %context.request_id,
                        pattern = %rule.pattern(),
                        error = %e,
                        "Bearer validation failed"
                    );
                    e
                })?;

            tracing::debug!(
                request_id = %context.request_id,
                username = %principal.username,
                client_id = %principal.client_id,
                "Bearer token validated"
            );

            req.extensions_mut().insert(principal);
            service.call(req).await
        })
    }
}
