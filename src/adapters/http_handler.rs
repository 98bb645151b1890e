//! Axum handlers for the gateway's HTTP surface.
//!
//! `HttpHandler` is the shared router state: every collaborator a handler
//! needs, behind an `Arc`, constructed once at startup.
use std::{sync::Arc, time::Duration};

use axum::{
    Extension, Json,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    adapters::{middleware::client_ip, token::TokenService},
    core::{
        GatewayService, TokenBucketLimiter,
        error::{ApiResponse, GatewayError},
    },
    ports::identity::{Claims, IdentityProvider, User},
};

/// Path prefix of every API route; the proxied service name follows it.
pub const API_PREFIX: &str = "/api/v1";

/// Bound on each dependency check in `/ready`.
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP handler state for the Waypoint API gateway
#[derive(Clone)]
pub struct HttpHandler {
    pub gateway: Arc<GatewayService>,
    pub identity: Arc<dyn IdentityProvider>,
    pub tokens: Arc<TokenService>,
    pub limiter: TokenBucketLimiter,
}

impl HttpHandler {
    pub fn new(
        gateway: Arc<GatewayService>,
        identity: Arc<dyn IdentityProvider>,
        tokens: Arc<TokenService>,
        limiter: TokenBucketLimiter,
    ) -> Self {
        Self {
            gateway,
            identity,
            tokens,
            limiter,
        }
    }

    fn auth_payload(&self, user: User) -> Result<AuthPayload, GatewayError> {
        let token = self.tokens.issue(&user)?;
        Ok(AuthPayload {
            token,
            token_type: "Bearer",
            expires_in: self.tokens.expiry().as_secs(),
            user,
        })
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, GatewayError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| GatewayError::Validation(rejection.body_text()))
}

#[derive(Debug, Serialize)]
pub struct AuthPayload {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub urls: Vec<String>,
    #[serde(default)]
    pub health_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServiceRequest {
    pub active: bool,
}

/// `GET /health`
pub async fn health() -> Response {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

/// `GET /ready`: every dependency must answer within [`READINESS_TIMEOUT`].
pub async fn ready(State(handler): State<HttpHandler>) -> Response {
    let store = handler.limiter.store();
    let store_check = match tokio::time::timeout(READINESS_TIMEOUT, store.ping()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("timed out".to_string()),
    };
    let identity_check =
        match tokio::time::timeout(READINESS_TIMEOUT, handler.identity.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("timed out".to_string()),
        };

    let mut failed = Vec::new();
    if let Err(e) = &store_check {
        tracing::warn!(store = store.name(), error = %e, "Rate limit store not ready");
        failed.push("rate_limit_store");
    }
    if let Err(e) = &identity_check {
        tracing::warn!(error = %e, "Identity provider not ready");
        failed.push("identity");
    }

    let status = if failed.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let check = |r: &Result<(), String>| if r.is_ok() { "ok" } else { "unavailable" };

    (
        status,
        Json(json!({
            "status": if failed.is_empty() { "ready" } else { "not ready" },
            "failed": failed,
            "checks": {
                "rate_limit_store": check(&store_check),
                "identity": check(&identity_check),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

/// `POST /api/v1/auth/register`
pub async fn register(
    State(handler): State<HttpHandler>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let body = json_body(payload)?;
    let user = handler
        .identity
        .register(&body.username, &body.email, &body.password)
        .await?;
    let payload = handler.auth_payload(user)?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::with_message("User registered successfully", payload),
    )
        .into_response())
}

/// `POST /api/v1/auth/login`
pub async fn login(
    State(handler): State<HttpHandler>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let body = json_body(payload)?;
    let user = handler
        .identity
        .verify_credentials(&body.username, &body.password)
        .await?;
    tracing::info!(user_id = %user.id, "User logged in");
    let payload = handler.auth_payload(user)?;
    Ok(ApiResponse::with_message("Login successful", payload).into_response())
}

/// `POST /api/v1/auth/refresh`: exchange a valid token for a fresh one.
pub async fn refresh(
    State(handler): State<HttpHandler>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let body = json_body(payload)?;
    let claims = handler.tokens.verify(&body.token)?;
    let user = handler.identity.find(&claims.sub).await?;
    if !user.active {
        return Err(GatewayError::Forbidden("Account is inactive".to_string()));
    }
    let payload = handler.auth_payload(user)?;
    Ok(ApiResponse::with_message("Token refreshed", payload).into_response())
}

/// `GET /api/v1/profile`
pub async fn profile(
    State(handler): State<HttpHandler>,
    Extension(claims): Extension<Claims>,
) -> Result<Response, GatewayError> {
    let user = handler.identity.find(&claims.sub).await?;
    Ok(ApiResponse::data(user).into_response())
}

/// `ANY /api/v1/{service}/{*path}`
pub async fn proxy(State(handler): State<HttpHandler>, req: Request) -> Response {
    let ip = client_ip(&req);
    // Nesting under the API prefix has already removed it from the path.
    let path = req.uri().path().to_string();

    match handler.gateway.forwarder().forward(&path, req, ip).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// `GET /api/v1/admin/services`
pub async fn list_services(State(handler): State<HttpHandler>) -> Response {
    ApiResponse::data(handler.gateway.service_views()).into_response()
}

/// `POST /api/v1/admin/services`
pub async fn create_service(
    State(handler): State<HttpHandler>,
    payload: Result<Json<CreateServiceRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let body = json_body(payload)?;
    if body.name.trim().is_empty() || body.name.contains('/') {
        return Err(GatewayError::Validation(
            "Service name is required and may not contain '/'".to_string(),
        ));
    }
    if body.urls.is_empty() {
        return Err(GatewayError::Validation(
            "At least one instance URL is required".to_string(),
        ));
    }

    let health_path = body.health_path.unwrap_or_else(|| "/health".to_string());
    handler
        .gateway
        .register_service(&body.name, body.urls, health_path)?;
    let service = handler.gateway.registry().get(&body.name)?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::with_message("Service registered successfully", service),
    )
        .into_response())
}

/// `DELETE /api/v1/admin/services/{name}`
pub async fn delete_service(
    State(handler): State<HttpHandler>,
    Path(name): Path<String>,
) -> Result<Response, GatewayError> {
    handler.gateway.registry().unregister(&name)?;
    Ok(ApiResponse::message("Service unregistered successfully").into_response())
}

/// `PATCH /api/v1/admin/services/{name}`
pub async fn update_service(
    State(handler): State<HttpHandler>,
    Path(name): Path<String>,
    payload: Result<Json<UpdateServiceRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let body = json_body(payload)?;
    handler.gateway.registry().set_active(&name, body.active)?;
    let message = if body.active {
        "Service activated"
    } else {
        "Service deactivated"
    };
    Ok(ApiResponse::message(message).into_response())
}
