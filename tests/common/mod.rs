// Shared harness: real axum backends on loopback ports and an in-process
// gateway driven through `oneshot`.
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, Request},
    http::{
        HeaderMap, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{Map, Value, json};
use tower::ServiceExt;
use waypoint::{
    GatewayService, HttpClientAdapter, HttpHandler,
    adapters::{InMemoryIdentityProvider, MemoryBucketStore, TokenService, build_router},
    config::{GatewayConfig, ServiceConfig},
    core::TokenBucketLimiter,
    ports::identity::{ROLE_ADMIN, ROLE_USER, User},
};

pub const DEFAULT_CLIENT: [u8; 4] = [127, 0, 0, 1];

pub struct Backend {
    pub url: String,
    pub name: &'static str,
    /// Paths received, in arrival order
    pub hits: Arc<Mutex<Vec<String>>>,
}

impl Backend {
    pub fn hit_count(&self) -> usize {
        self.hits.lock().unwrap().len()
    }
}

/// Backend that echoes what it received as JSON.
pub async fn spawn_echo_backend(name: &'static str) -> Backend {
    spawn_backend(name, StatusCode::OK).await
}

/// Backend that answers every request with `status` and the echo body.
pub async fn spawn_backend(name: &'static str, status: StatusCode) -> Backend {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let log = hits.clone();

    let app = Router::new().fallback(move |req: Request| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(req.uri().path().to_string());

            let (parts, body) = req.into_parts();
            let headers: Map<String, Value> = parts
                .headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        Value::String(value.to_str().unwrap_or_default().to_string()),
                    )
                })
                .collect();
            let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();

            (
                status,
                Json(json!({
                    "backend": name,
                    "method": parts.method.as_str(),
                    "path": parts.uri.path(),
                    "query": parts.uri.query(),
                    "headers": headers,
                    "body": body.to_vec(),
                })),
            )
                .into_response()
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Backend {
        url: format!("http://{addr}"),
        name,
        hits,
    }
}

/// Backend that answers every request with a fixed body and content type.
pub async fn spawn_raw_backend(
    name: &'static str,
    content_type: &'static str,
    body: &'static [u8],
) -> Backend {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let log = hits.clone();

    let app = Router::new().fallback(move |req: Request| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(req.uri().path().to_string());
            ([(CONTENT_TYPE, content_type)], body).into_response()
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Backend {
        url: format!("http://{addr}"),
        name,
        hits,
    }
}

pub fn service(name: &str, backends: &[&Backend]) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        urls: backends.iter().map(|b| b.url.clone()).collect(),
        health_path: "/health".to_string(),
    }
}

pub struct TestGateway {
    pub app: Router,
    pub gateway: Arc<GatewayService>,
    pub tokens: Arc<TokenService>,
}

impl TestGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let gateway = Arc::new(GatewayService::new(
            &config,
            Arc::new(HttpClientAdapter::new().unwrap()),
        ));
        let tokens = Arc::new(TokenService::new(
            "integration-secret",
            Duration::from_secs(3600),
        ));
        let limiter =
            TokenBucketLimiter::from_config(Arc::new(MemoryBucketStore::new()), &config.rate_limit);
        let handler = HttpHandler::new(
            gateway.clone(),
            Arc::new(InMemoryIdentityProvider::new()),
            tokens.clone(),
            limiter,
        );

        Self {
            app: build_router(handler, &config),
            gateway,
            tokens,
        }
    }

    pub fn token(&self, role: &str) -> String {
        let now = Utc::now();
        self.tokens
            .issue(&User {
                id: format!("{role}-id"),
                username: format!("{role}-name"),
                email: format!("{role}@example.com"),
                role: role.to_string(),
                active: true,
                created_at: now,
                updated_at: now,
            })
            .unwrap()
    }

    pub fn admin_token(&self) -> String {
        self.token(ROLE_ADMIN)
    }

    pub fn user_token(&self) -> String {
        self.token(ROLE_USER)
    }

    /// Send `req` as if it arrived from `client`.
    pub async fn send_from(&self, client: [u8; 4], mut req: Request<Body>) -> Response {
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((client, 50000))));
        self.app.clone().oneshot(req).await.unwrap()
    }

    pub async fn send(&self, req: Request<Body>) -> Response {
        self.send_from(DEFAULT_CLIENT, req).await
    }

    /// Send `req` with no peer address attached.
    pub async fn send_without_peer(&self, req: Request<Body>) -> Response {
        self.app.clone().oneshot(req).await.unwrap()
    }

    /// JSON request helper returning status, headers and parsed body.
    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        read_json(self.send(req).await).await
    }
}

pub async fn read_body(response: Response) -> axum::body::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn read_json(response: Response) -> (StatusCode, HeaderMap, Value) {
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = read_body(response).await;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, body)
}
