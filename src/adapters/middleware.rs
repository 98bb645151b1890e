//! Request pipeline stages for the gateway router.
//!
//! Stateless stages are plain `from_fn` functions; the limiter and the
//! authenticator take their collaborator through `from_fn_with_state`.
//! [`crate::adapters::router`] stacks them in a fixed order: panic recovery,
//! logging, request id, CORS, security headers, rate limiting,
//! authentication and finally the admin check.
use std::{
    any::Any,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
        header::{AUTHORIZATION, RETRY_AFTER, USER_AGENT},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::Instrument;

use crate::{
    adapters::token::TokenService,
    config::models::CorsConfig,
    core::{
        TokenBucketLimiter,
        error::{GatewayError, INTERNAL_ERROR_MESSAGE, error_response},
        rate_limiter::RateDecision,
    },
    ports::identity::Claims,
    tracing_setup::request_span,
};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Body of the 500 returned when the bucket store fails or times out.
pub const RATE_LIMITER_ERROR_MESSAGE: &str = "Rate limiter error";

/// Longest inbound `X-Request-ID` that is echoed instead of replaced.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Peer address recorded by the server's connect-info layer, if any.
pub fn client_ip(req: &Request) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Response for a panic caught by `CatchPanicLayer`.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    tracing::error!(panic = %detail, "Handler panicked");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
}

/// Log one line per completed request.
pub async fn request_logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or_default().to_string();
    let client_ip = client_ip(&req).map(|ip| ip.to_string()).unwrap_or_default();
    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let response = next.run(req).await;

    let request_id = response
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        query = %query,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_secs_f64() * 1000.0,
        client_ip = %client_ip,
        user_agent = %user_agent,
        "Request completed"
    );

    response
}

/// Reuse the caller's `X-Request-ID` or mint a UUID, forward it upstream,
/// echo it on the response and attach it to the request span.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let inbound = req
        .headers()
        .get(X_REQUEST_ID)
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let request_id = inbound.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header_value {
        req.headers_mut().insert(X_REQUEST_ID, value.clone());
    }

    let span = request_span(&request_id);
    let mut response = next.run(req).instrument(span).await;

    if let Some(value) = header_value {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

/// Add common security hardening headers.
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-XSS-Protection",
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}

/// Build the CORS layer from configuration. `"*"` in any list means "any";
/// entries that do not parse are skipped with a warning.
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let wildcard = |list: &[String]| list.iter().any(|v| v.trim() == "*");

    let origins = if wildcard(&config.allowed_origins) {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(config.allowed_origins.iter().filter_map(|origin| {
            HeaderValue::from_str(origin.trim())
                .inspect_err(|_| tracing::warn!(origin = %origin, "Ignoring invalid CORS origin"))
                .ok()
        }))
    };

    let methods = if wildcard(&config.allowed_methods) {
        AllowMethods::any()
    } else {
        AllowMethods::list(config.allowed_methods.iter().filter_map(|method| {
            method
                .trim()
                .to_ascii_uppercase()
                .parse::<Method>()
                .inspect_err(|_| tracing::warn!(method = %method, "Ignoring invalid CORS method"))
                .ok()
        }))
    };

    let headers = if wildcard(&config.allowed_headers) {
        AllowHeaders::any()
    } else {
        AllowHeaders::list(config.allowed_headers.iter().filter_map(|header| {
            header
                .trim()
                .parse::<HeaderName>()
                .inspect_err(|_| tracing::warn!(header = %header, "Ignoring invalid CORS header"))
                .ok()
        }))
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
        .expose_headers([
            X_REQUEST_ID,
            X_RATELIMIT_LIMIT,
            X_RATELIMIT_REMAINING,
            X_RATELIMIT_RESET,
            RETRY_AFTER,
        ])
        .max_age(Duration::from_secs(86400))
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset));
    if let Some(retry_after) = decision.retry_after {
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    }
}

/// Token-bucket admission keyed by client IP.
pub async fn rate_limit_middleware(
    State(limiter): State<TokenBucketLimiter>,
    req: Request,
    next: Next,
) -> Response {
    let client = client_ip(&req).map(|ip| ip.to_string());

    let decision = match limiter.check(client.as_deref()).await {
        Ok(decision) => decision,
        Err(e) => {
            tracing::error!(error = %e, store = limiter.store().name(), "Rate limiter failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                RATE_LIMITER_ERROR_MESSAGE,
            );
        }
    };

    if !decision.allowed {
        tracing::warn!(
            client = client.as_deref().unwrap_or("unknown"),
            retry_after = decision.retry_after,
            "Rate limit exceeded"
        );
        let mut response = GatewayError::RateLimited.into_response();
        apply_rate_limit_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(req).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    response
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Verify the bearer token and expose its [`Claims`] to later stages.
pub async fn auth_middleware(
    State(tokens): State<Arc<TokenService>>,
    mut req: Request,
    next: Next,
) -> Response {
    let verified = match bearer_token(req.headers()) {
        Some(token) => tokens.verify(token),
        None => {
            return GatewayError::Unauthorized(
                "Missing or invalid authorization header".to_string(),
            )
            .into_response();
        }
    };

    match verified {
        Ok(claims) => {
            tracing::debug!(user_id = %claims.sub, "Authenticated request");
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!(error = %e, "Rejected bearer token");
            GatewayError::from(e).into_response()
        }
    }
}

/// Admit only callers whose verified token carries the admin role.
pub async fn require_admin(req: Request, next: Next) -> Response {
    let caller = req
        .extensions()
        .get::<Claims>()
        .map(|claims| (claims.is_admin(), claims.sub.clone()));

    match caller {
        Some((true, _)) => next.run(req).await,
        Some((false, user_id)) => {
            tracing::warn!(user_id = %user_id, path = %req.uri().path(), "Admin access denied");
            GatewayError::Forbidden("Admin access required".to_string()).into_response()
        }
        None => GatewayError::Unauthorized("Authentication required".to_string()).into_response(),
    }
}
