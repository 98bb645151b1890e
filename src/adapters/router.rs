use std::time::Duration;

use axum::{
    Router,
    http::StatusCode,
    middleware,
    routing::{any, delete, get, post},
};
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer};

use crate::{
    adapters::{
        http_handler::{self, API_PREFIX, HttpHandler},
        middleware::{
            auth_middleware, cors_layer, panic_response, rate_limit_middleware,
            request_id_middleware, request_logging_middleware, require_admin,
            security_headers_middleware,
        },
    },
    config::models::{GatewayConfig, TimeoutConfig},
};

/// Bounds how long a handler may take to produce its response.
fn write_timeout_layer(timeouts: &TimeoutConfig) -> TimeoutLayer {
    TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(timeouts.write_secs),
    )
}

/// Assemble the gateway router.
///
/// Layers apply outermost first: panic recovery, request logging, request
/// id, CORS, security headers. Everything under `/api/v1` is rate limited;
/// authentication and the admin check are route layers so unmatched paths
/// still get a plain 404. Proxied routes are exempt from the write timeout
/// because the forwarder enforces its own upstream deadline.
pub fn build_router(handler: HttpHandler, config: &GatewayConfig) -> Router {
    let authenticate = middleware::from_fn_with_state(handler.tokens.clone(), auth_middleware);
    let write_timeout = write_timeout_layer(&config.timeouts);

    let auth = Router::new()
        .route("/auth/register", post(http_handler::register))
        .route("/auth/login", post(http_handler::login))
        .route("/auth/refresh", post(http_handler::refresh))
        .layer(write_timeout.clone());

    let profile = Router::new()
        .route("/profile", get(http_handler::profile))
        .route_layer(authenticate.clone())
        .layer(write_timeout.clone());

    let admin = Router::new()
        .route(
            "/services",
            get(http_handler::list_services).post(http_handler::create_service),
        )
        .route(
            "/services/{name}",
            delete(http_handler::delete_service).patch(http_handler::update_service),
        )
        .route_layer(
            ServiceBuilder::new()
                .layer(authenticate.clone())
                .layer(middleware::from_fn(require_admin)),
        )
        .layer(write_timeout.clone());

    let proxy = Router::new()
        .route("/{service}", any(http_handler::proxy))
        .route("/{service}/{*path}", any(http_handler::proxy))
        .route_layer(authenticate);

    let api = Router::new()
        .merge(auth)
        .merge(profile)
        .nest("/admin", admin)
        .merge(proxy)
        .layer(middleware::from_fn_with_state(
            handler.limiter.clone(),
            rate_limit_middleware,
        ));

    let probes = Router::new()
        .route("/health", get(http_handler::health))
        .route("/ready", get(http_handler::ready))
        .layer(write_timeout);

    Router::new()
        .merge(probes)
        .nest(API_PREFIX, api)
        .with_state(handler)
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(panic_response))
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(middleware::from_fn(request_id_middleware))
                .layer(cors_layer(&config.cors))
                .layer(middleware::from_fn(security_headers_middleware)),
        )
}
