//! Waypoint - an API gateway in front of clusters of backend services.
//!
//! A request to `/api/v1/{service}/{rest}` is authenticated, admitted by a
//! per-client token bucket, and forwarded to one instance of `service`
//! chosen round-robin, behind a per-service circuit breaker. Admin routes
//! manage the service registry at runtime.
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping the gateway logic inside `core`:
//! - `core`: service registry, load balancing, circuit breakers, token
//!   buckets and the proxy forwarder
//! - `ports`: bucket store, upstream HTTP client and identity provider
//! - `adapters`: in-memory and Redis bucket stores, the hyper client, the
//!   argon2/JWT identity provider, middleware, handlers and the router
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use waypoint::{
//!     GatewayService, HttpClientAdapter, HttpHandler,
//!     adapters::{InMemoryIdentityProvider, MemoryBucketStore, TokenService, build_router},
//!     config::load_config,
//!     core::TokenBucketLimiter,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = load_config(Some("waypoint.yaml"))?;
//! let gateway = Arc::new(GatewayService::new(&config, Arc::new(HttpClientAdapter::new()?)));
//! let limiter =
//!     TokenBucketLimiter::from_config(Arc::new(MemoryBucketStore::new()), &config.rate_limit);
//! let handler = HttpHandler::new(
//!     gateway,
//!     Arc::new(InMemoryIdentityProvider::with_seed_users(&config.users)?),
//!     Arc::new(TokenService::from_config(&config.jwt)?),
//!     limiter,
//! );
//! let app = build_router(handler, &config);
//! # let _ = app;
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Startup paths return `eyre::Result<T>`; request paths use domain error
//! types that convert into [`core::GatewayError`] and its JSON envelope.
//!
//! # Concurrency & Data Structures
//! The in-memory bucket store uses `scc::HashMap` so concurrent checks on
//! one client serialize on that entry only; the registry and breaker map
//! are read-mostly and sit behind `RwLock`s.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler},
    core::GatewayService,
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
