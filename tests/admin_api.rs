mod common;

use axum::http::StatusCode;
use common::{TestGateway, spawn_echo_backend};
use serde_json::json;
use waypoint::config::GatewayConfig;

#[tokio::test(flavor = "multi_thread")]
async fn test_service_lifecycle() {
    let backend = spawn_echo_backend("orders").await;
    let gw = TestGateway::new(GatewayConfig::default());
    let admin = gw.admin_token();
    let user = gw.user_token();

    let (status, _, body) = gw
        .call(
            "POST",
            "/api/v1/admin/services",
            Some(&admin),
            Some(json!({ "name": "orders", "urls": [backend.url] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["name"], "orders");
    assert_eq!(body["data"]["health_path"], "/health");

    let (status, _, body) = gw
        .call("GET", "/api/v1/admin/services", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let services = body["data"].as_array().unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["active"], true);
    assert_eq!(services[0]["circuit_breaker"], "closed");

    let (status, _, _) = gw.call("GET", "/api/v1/orders/1", Some(&user), None).await;
    assert_eq!(status, StatusCode::OK);

    // Deactivated services are known but refuse traffic.
    let (status, _, _) = gw
        .call(
            "PATCH",
            "/api/v1/admin/services/orders",
            Some(&admin),
            Some(json!({ "active": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, body) = gw.call("GET", "/api/v1/orders/1", Some(&user), None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Service is inactive");

    let (status, _, body) = gw
        .call("DELETE", "/api/v1/admin/services/orders", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _, body) = gw.call("GET", "/api/v1/orders/1", Some(&user), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Service not found");

    let (status, _, _) = gw
        .call("DELETE", "/api/v1/admin/services/orders", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(backend.hit_count(), 1);
}

#[tokio::test]
async fn test_create_service_validation() {
    let gw = TestGateway::new(GatewayConfig::default());
    let admin = gw.admin_token();

    for payload in [
        json!({ "name": "", "urls": ["http://a:80"] }),
        json!({ "name": "orders", "urls": [] }),
        json!({ "name": "orders", "urls": ["not a url"] }),
        json!({ "urls": ["http://a:80"] }),
    ] {
        let (status, _, body) = gw
            .call("POST", "/api/v1/admin/services", Some(&admin), Some(payload))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }
    assert!(gw.gateway.registry().is_empty());
}

#[tokio::test]
async fn test_admin_routes_require_admin_role() {
    let gw = TestGateway::new(GatewayConfig::default());

    let (status, _, _) = gw.call("GET", "/api/v1/admin/services", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, body) = gw
        .call(
            "GET",
            "/api/v1/admin/services",
            Some(&gw.user_token()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Admin access required");

    let (status, _, _) = gw
        .call(
            "PATCH",
            "/api/v1/admin/services/missing",
            Some(&gw.admin_token()),
            Some(json!({ "active": true })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rate_limit_per_client() {
    let mut config = GatewayConfig::default();
    config.rate_limit.requests = 2;
    config.rate_limit.window_secs = 60;
    let gw = TestGateway::new(config);
    let admin = gw.admin_token();

    for remaining in ["1", "0"] {
        let (status, headers, _) = gw
            .call("GET", "/api/v1/admin/services", Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-ratelimit-limit"], "2");
        assert_eq!(headers["x-ratelimit-remaining"], remaining);
    }

    let (status, headers, body) = gw
        .call("GET", "/api/v1/admin/services", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(headers["retry-after"], "30");
    assert_eq!(headers["x-ratelimit-remaining"], "0");
    assert_eq!(body["error"], "Rate limit exceeded");

    // Another client has its own bucket.
    let req = axum::http::Request::builder()
        .uri("/api/v1/admin/services")
        .header("authorization", format!("Bearer {admin}"))
        .body(axum::body::Body::empty())
        .unwrap();
    let response = gw.send_from([192, 168, 1, 7], req).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Probes are outside the limited prefix.
    for _ in 0..5 {
        let (status, _, _) = gw.call("GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }
}

#[tokio::test]
async fn test_probes() {
    let gw = TestGateway::new(GatewayConfig::default());

    let (status, headers, body) = gw.call("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(headers.contains_key("x-request-id"));

    let (status, _, body) = gw.call("GET", "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["checks"]["rate_limit_store"], "ok");
}
