//! Reverse-proxy forwarding engine.
//!
//! A proxied path `{service}/{rest...}` is resolved through the registry,
//! an instance is picked by the load balancer, and the outbound call runs
//! under the service's circuit breaker with a fixed upstream timeout. Request
//! and response bodies are streamed through untouched.
use std::{net::IpAddr, sync::Arc, time::Duration};

use axum::body::Body;
use hyper::{
    HeaderMap, Request, Response, Uri,
    header::{HOST, HeaderName, HeaderValue},
};

use crate::{
    core::{
        circuit_breaker::{BreakerError, CircuitBreakerManager},
        error::GatewayError,
        load_balancer::LoadBalancingStrategy,
        registry::ServiceRegistry,
    },
    ports::http_client::{HttpClient, HttpClientError},
};

/// Bound on every outbound backend call.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Message for breaker rejections and transport failures.
pub const UNAVAILABLE_MESSAGE: &str = "Service temporarily unavailable";

/// Headers meaningful only for a single transport leg.
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

/// Split `users/v1/items` into `("users", "/v1/items")`. A leading `/` is
/// ignored; the remainder keeps its own leading `/` and may be empty.
pub fn split_service_path(path: &str) -> Result<(&str, &str), GatewayError> {
    let path = path.trim_start_matches('/');
    let (service, remainder) = match path.find('/') {
        Some(idx) => path.split_at(idx),
        None => (path, ""),
    };
    if service.is_empty() {
        return Err(GatewayError::Validation(
            "Service name is required".to_string(),
        ));
    }
    Ok((service, remainder))
}

/// `base + remainder`, with the inbound query string appended verbatim.
pub fn build_target_uri(
    base: &str,
    remainder: &str,
    query: Option<&str>,
) -> Result<Uri, GatewayError> {
    let base = if remainder.starts_with('/') {
        base.trim_end_matches('/')
    } else {
        base
    };

    let mut target = String::with_capacity(base.len() + remainder.len() + 1);
    target.push_str(base);
    target.push_str(remainder);
    if let Some(query) = query {
        target.push('?');
        target.push_str(query);
    }

    target
        .parse::<Uri>()
        .map_err(|e| GatewayError::Internal(format!("invalid upstream URI {target}: {e}")))
}

/// Copy inbound headers minus the hop-by-hop set, then set the forwarding
/// headers. Client-supplied `X-Forwarded-*` values are overwritten.
pub fn outbound_headers(inbound: &HeaderMap, client_ip: Option<IpAddr>, proto: &str) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len() + 3);
    for (name, value) in inbound {
        if !is_hop_by_hop(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }

    headers.remove(X_FORWARDED_FOR);
    if let Some(ip) = client_ip {
        if let Ok(value) = HeaderValue::from_str(&ip.to_string()) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(proto) {
        headers.insert(X_FORWARDED_PROTO, value);
    }
    match inbound.get(HOST) {
        Some(host) => {
            headers.insert(X_FORWARDED_HOST, host.clone());
        }
        None => {
            headers.remove(X_FORWARDED_HOST);
        }
    }

    headers
}

/// Forwards proxied requests to backend instances.
#[derive(Clone)]
pub struct ProxyForwarder {
    registry: Arc<ServiceRegistry>,
    balancer: Arc<dyn LoadBalancingStrategy>,
    breakers: Arc<CircuitBreakerManager>,
    client: Arc<dyn HttpClient>,
    upstream_timeout: Duration,
}

impl ProxyForwarder {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        balancer: Arc<dyn LoadBalancingStrategy>,
        breakers: Arc<CircuitBreakerManager>,
        client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            registry,
            balancer,
            breakers,
            client,
            upstream_timeout: UPSTREAM_TIMEOUT,
        }
    }

    /// Override the upstream timeout (tests use short bounds).
    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    /// Forward `req` to the service named by the first segment of
    /// `proxied_path` (the path after the API prefix).
    pub async fn forward(
        &self,
        proxied_path: &str,
        req: Request<Body>,
        client_ip: Option<IpAddr>,
    ) -> Result<Response<Body>, GatewayError> {
        let (service_name, remainder) = split_service_path(proxied_path)?;

        let service = self.registry.get(service_name).inspect_err(|e| {
            tracing::debug!(service = %service_name, error = %e, "Service lookup failed");
        })?;
        let base = self.balancer.select(&service)?;
        let target = build_target_uri(&base, remainder, req.uri().query())?;

        let (parts, body) = req.into_parts();
        let proto = parts.uri.scheme_str().unwrap_or("http");
        let headers = outbound_headers(&parts.headers, client_ip, proto);

        let mut outbound = Request::builder()
            .method(parts.method)
            .uri(target)
            .body(body)
            .map_err(|e| GatewayError::Internal(format!("failed to build upstream request: {e}")))?;
        *outbound.headers_mut() = headers;

        tracing::debug!(
            service = %service_name,
            backend = %base,
            uri = %outbound.uri(),
            "Forwarding request"
        );

        let client = self.client.clone();
        let upstream_timeout = self.upstream_timeout;
        let result = self
            .breakers
            .execute_classified(
                service_name,
                || async move {
                    match tokio::time::timeout(upstream_timeout, client.send_request(outbound))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(HttpClientError::Timeout(upstream_timeout.as_secs())),
                    }
                },
                // Backend 5xx trips the breaker but is still relayed.
                |result| matches!(result, Ok(response) if !response.status().is_server_error()),
            )
            .await;

        match result {
            Ok(response) => {
                if response.status().is_server_error() {
                    tracing::warn!(
                        service = %service_name,
                        backend = %base,
                        status = response.status().as_u16(),
                        "Backend returned server error"
                    );
                }
                Ok(response)
            }
            Err(BreakerError::Operation(e)) => {
                tracing::error!(
                    service = %service_name,
                    backend = %base,
                    error = %e,
                    "Backend request failed"
                );
                Err(GatewayError::Unavailable(UNAVAILABLE_MESSAGE.to_string()))
            }
            Err(rejection) => {
                tracing::warn!(
                    service = %service_name,
                    reason = %rejection,
                    "Circuit breaker rejected request"
                );
                Err(GatewayError::Unavailable(UNAVAILABLE_MESSAGE.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use hyper::StatusCode;

    use super::*;
    use crate::{
        core::{circuit_breaker::BreakerSettings, load_balancer::RoundRobinBalancer},
        ports::http_client::HttpClientResult,
    };

    /// Records every outbound request and answers with a fixed status.
    struct RecordingClient {
        status: StatusCode,
        seen: Mutex<Vec<(Uri, HeaderMap)>>,
    }

    impl RecordingClient {
        fn new(status: StatusCode) -> Self {
            Self {
                status,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn send_request(&self, req: Request<Body>) -> HttpClientResult<Response<Body>> {
            self.seen
                .lock()
                .unwrap()
                .push((req.uri().clone(), req.headers().clone()));
            Ok(Response::builder()
                .status(self.status)
                .header("content-type", "text/plain")
                .body(Body::from("backend"))
                .unwrap())
        }
    }

    struct FailingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for FailingClient {
        async fn send_request(&self, _req: Request<Body>) -> HttpClientResult<Response<Body>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(HttpClientError::ConnectionError("connection refused".into()))
        }
    }

    fn forwarder(client: Arc<dyn HttpClient>, threshold: u32) -> ProxyForwarder {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register(
            "users",
            vec!["http://users-1:8080".into(), "http://users-2:8080/".into()],
            "/health",
        );
        let breakers = Arc::new(CircuitBreakerManager::new(BreakerSettings {
            failure_threshold: threshold,
            open_timeout: Duration::from_secs(30),
            half_open_max_requests: 1,
        }));
        ProxyForwarder::new(
            registry,
            Arc::new(RoundRobinBalancer::new()),
            breakers,
            client,
        )
    }

    fn request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_split_service_path() {
        assert_eq!(split_service_path("users").unwrap(), ("users", ""));
        assert_eq!(split_service_path("users/").unwrap(), ("users", "/"));
        assert_eq!(
            split_service_path("/users/v1/items").unwrap(),
            ("users", "/v1/items")
        );
        assert!(matches!(
            split_service_path(""),
            Err(GatewayError::Validation(_))
        ));
        assert!(split_service_path("/").is_err());
    }

    #[test]
    fn test_hop_by_hop_is_case_insensitive() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(is_hop_by_hop("te"));
        assert!(!is_hop_by_hop("content-type"));
        assert!(!is_hop_by_hop("x-request-id"));
    }

    #[test]
    fn test_build_target_uri() {
        assert_eq!(
            build_target_uri("http://a:1", "/items", Some("q=1&r=%20x")).unwrap(),
            "http://a:1/items?q=1&r=%20x"
        );
        assert_eq!(
            build_target_uri("http://a:1/", "/items", None).unwrap(),
            "http://a:1/items"
        );
        assert_eq!(
            build_target_uri("http://a:1/base", "", None).unwrap(),
            "http://a:1/base"
        );
    }

    #[test]
    fn test_outbound_headers() {
        let mut inbound = HeaderMap::new();
        inbound.insert("connection", HeaderValue::from_static("keep-alive"));
        inbound.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        inbound.insert("upgrade", HeaderValue::from_static("websocket"));
        inbound.insert("x-forwarded-for", HeaderValue::from_static("6.6.6.6"));
        inbound.insert(HOST, HeaderValue::from_static("gateway.example.com"));
        inbound.append("accept", HeaderValue::from_static("text/html"));
        inbound.append("accept", HeaderValue::from_static("application/json"));

        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        let out = outbound_headers(&inbound, Some(ip), "http");

        assert!(out.get("connection").is_none());
        assert!(out.get("keep-alive").is_none());
        assert!(out.get("upgrade").is_none());
        assert_eq!(out.get(X_FORWARDED_FOR).unwrap(), "10.1.2.3");
        assert_eq!(out.get(X_FORWARDED_PROTO).unwrap(), "http");
        assert_eq!(out.get(X_FORWARDED_HOST).unwrap(), "gateway.example.com");
        assert_eq!(out.get_all("accept").iter().count(), 2);
    }

    #[test]
    fn test_client_forwarded_for_dropped_without_peer_address() {
        let mut inbound = HeaderMap::new();
        inbound.insert("x-forwarded-for", HeaderValue::from_static("6.6.6.6"));
        inbound.append("x-forwarded-for", HeaderValue::from_static("7.7.7.7"));
        inbound.insert("x-forwarded-host", HeaderValue::from_static("evil.example"));

        let out = outbound_headers(&inbound, None, "https");

        assert!(out.get(X_FORWARDED_FOR).is_none());
        assert!(out.get(X_FORWARDED_HOST).is_none());
        assert_eq!(out.get(X_FORWARDED_PROTO).unwrap(), "https");
    }

    #[tokio::test]
    async fn test_forward_round_robin_and_query() {
        let client = Arc::new(RecordingClient::new(StatusCode::OK));
        let proxy = forwarder(client.clone(), 5);

        for _ in 0..2 {
            let response = proxy
                .forward("users/items", request("/api/v1/users/items?page=2"), None)
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].0, "http://users-1:8080/items?page=2");
        assert_eq!(seen[1].0, "http://users-2:8080/items?page=2");
    }

    #[tokio::test]
    async fn test_forward_unknown_and_inactive_service() {
        let proxy = forwarder(Arc::new(RecordingClient::new(StatusCode::OK)), 5);
        let err = proxy
            .forward("orders/x", request("/api/v1/orders/x"), None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        proxy.registry.set_active("users", false).unwrap();
        let err = proxy
            .forward("users/x", request("/api/v1/users/x"), None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_forward_empty_instance_list_is_unavailable() {
        let proxy = forwarder(Arc::new(RecordingClient::new(StatusCode::OK)), 5);
        proxy.registry.register("empty", vec![], "/health");
        let err = proxy
            .forward("empty", request("/api/v1/empty"), None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_transport_failure_is_generic_503() {
        let client = Arc::new(FailingClient {
            calls: AtomicUsize::new(0),
        });
        let proxy = forwarder(client.clone(), 2);

        for _ in 0..2 {
            let err = proxy
                .forward("users", request("/api/v1/users"), None)
                .await
                .unwrap_err();
            assert_eq!(
                err,
                GatewayError::Unavailable(UNAVAILABLE_MESSAGE.to_string())
            );
        }

        // Breaker is open now: the backend is not called again
        let err = proxy
            .forward("users", request("/api/v1/users"), None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_backend_5xx_is_relayed_and_counted() {
        let client = Arc::new(RecordingClient::new(StatusCode::BAD_GATEWAY));
        let proxy = forwarder(client.clone(), 2);

        for _ in 0..2 {
            let response = proxy
                .forward("users", request("/api/v1/users"), None)
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        }

        assert!(proxy
            .forward("users", request("/api/v1/users"), None)
            .await
            .is_err());
        assert_eq!(client.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_backend_4xx_does_not_trip_breaker() {
        let client = Arc::new(RecordingClient::new(StatusCode::NOT_FOUND));
        let proxy = forwarder(client.clone(), 1);

        for _ in 0..3 {
            let response = proxy
                .forward("users/missing", request("/api/v1/users/missing"), None)
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
        assert_eq!(client.seen.lock().unwrap().len(), 3);
    }
}
