use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware,
    routing::get as route_get,
    Router,
};
use gatewatch::api::{create_router, AppState};
use gatewatch::audit::AuditLogger;
use gatewatch::clock::SystemClock;
use gatewatch::config::GateWatchConfig;
use gatewatch::rate_limiter::RateLimiter;
use gatewatch::security::{middleware::threat_detection_middleware, DecisionEngine};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

// The whole HTTP surface driven in-process.

const BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0";
const ADMIN_KEY: &str = "integration-admin-key";

struct TestApp {
    _dir: TempDir,
    engine: Arc<DecisionEngine>,
    router: Router,
}

async fn setup(customize: impl FnOnce(&mut GateWatchConfig)) -> TestApp {
    let dir = tempfile::tempdir().unwrap();

    let mut config = GateWatchConfig::default();
    config.corpus.enabled = false;
    config.ip_banning.ban_file = dir.path().join("banned_ips.txt").to_string_lossy().to_string();
    customize(&mut config);

    let clock = Arc::new(SystemClock);
    let engine = Arc::new(
        DecisionEngine::new(config, clock.clone(), Arc::new(AuditLogger::in_memory()))
            .await
            .unwrap(),
    );
    let rate_limiter = Arc::new(RateLimiter::new(true, clock));
    let router = create_router(AppState::new(engine.clone(), rate_limiter));

    TestApp {
        _dir: dir,
        engine,
        router,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_bearer(mut request: Request<Body>, key: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert("authorization", format!("Bearer {}", key).parse().unwrap());
    request
}

fn clean_analysis(ip: &str) -> Value {
    json!({
        "ip": ip,
        "method": "GET",
        "url": "/home",
        "user_agent": BROWSER,
    })
}

fn sqli_analysis(ip: &str) -> Value {
    json!({
        "ip": ip,
        "method": "get",
        "url": "/products",
        "query_params": {"id": "1' OR '1'='1"},
        "user_agent": BROWSER,
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = setup(|_| {}).await;

    let (status, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "gatewatch");
    assert!(body["timestamp"].is_string());
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_endpoint_reports_counts() {
    let app = setup(|_| {}).await;
    app.engine.ban("198.51.100.1", "manual", false).await;

    let (status, body) = send(&app.router, get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "operational");
    assert_eq!(body["statistics"]["banned_ips"], 1);
    assert_eq!(body["statistics"]["payloads_loaded"], 0);
    assert!(body["statistics"]["patterns_loaded"].as_u64().unwrap() > 0);
    assert_eq!(body["configuration"]["ip_banning_enabled"], true);
}

#[tokio::test]
async fn test_analyze_accepts_clean_request() {
    let app = setup(|_| {}).await;

    let (status, body) = send(&app.router, post_json("/analyze", clean_analysis("192.0.2.10"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);
    assert_eq!(body["decision"], "ACCEPT");
    assert_eq!(body["reason"], "clean request");
}

#[tokio::test]
async fn test_analyze_bans_injection_and_hides_payload() {
    let app = setup(|_| {}).await;

    let (status, body) = send(&app.router, post_json("/analyze", sqli_analysis("192.0.2.20"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["allowed"], false);
    assert_eq!(body["decision"], "BANNED");
    assert_eq!(body["attack_type"], "SQL_INJECTION");
    assert!(body.get("payload").is_none());

    // The address stays banned for clean traffic too
    let (status, body) = send(&app.router, post_json("/analyze", clean_analysis("192.0.2.20"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reason"], "IP address is banned");
}

#[tokio::test]
async fn test_analyze_shows_payload_to_admin() {
    let app = setup(|config| config.server.admin_api_key = Some(ADMIN_KEY.to_string())).await;

    let request = with_bearer(post_json("/analyze", sqli_analysis("192.0.2.21")), ADMIN_KEY);
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["payload"].is_string());
}

#[tokio::test]
async fn test_analyze_rejects_malformed_input() {
    let app = setup(|_| {}).await;

    let (status, body) = send(&app.router, post_json("/analyze", json!({"url": "/"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "IP address is required");

    let (status, body) = send(&app.router, post_json("/analyze", json!({"ip": "300.1.1.1"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid IP address format");

    let not_json = Request::builder()
        .method("POST")
        .uri("/analyze")
        .body(Body::from("ip=1.2.3.4"))
        .unwrap();
    let (status, body) = send(&app.router, not_json).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "JSON payload required");
}

#[tokio::test]
async fn test_oversized_request_is_rejected() {
    let app = setup(|config| config.api_security.max_request_size_mb = 1).await;

    let body = "a".repeat(1024 * 1024 + 16);
    let request = Request::builder()
        .method("POST")
        .uri("/analyze")
        .header("content-type", "application/json")
        .header("content-length", body.len())
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["message"], "Maximum request size is 1MB");
}

#[tokio::test]
async fn test_analyze_rate_limit() {
    let app = setup(|config| config.api_security.rate_limit_per_minute = 3).await;

    for i in 0..3 {
        let (status, _) = send(&app.router, post_json("/analyze", clean_analysis(&format!("192.0.2.{}", 30 + i)))).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&app.router, post_json("/analyze", clean_analysis("192.0.2.40"))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Rate limit exceeded");
    assert_eq!(body["message"], "Maximum 3 requests per minute allowed");

    // Other routes keep their own budget
    let (status, _) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_ignores_spoofed_forwarding_headers() {
    let app = setup(|config| config.api_security.rate_limit_per_minute = 3).await;

    let from_peer = |peer: &str, forwarded_for: String| {
        let mut request = post_json("/analyze", clean_analysis("192.0.2.45"));
        request
            .headers_mut()
            .insert("x-forwarded-for", forwarded_for.parse().unwrap());
        request
            .extensions_mut()
            .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        request
    };

    let mut allowed = 0;
    for i in 0..20 {
        let (status, _) = send(&app.router, from_peer("192.0.2.200:40000", format!("198.51.100.{}", i))).await;
        if status == StatusCode::OK {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 3);

    // A different peer has its own budget
    let (status, _) = send(&app.router, from_peer("192.0.2.201:40000", "198.51.100.1".to_string())).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_ban_lifecycle() {
    let app = setup(|_| {}).await;
    let ip = "203.0.113.9";

    let (status, body) = send(
        &app.router,
        post_json(&format!("/ip/{}/ban", ip), json!({"reason": "abuse", "permanent": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], format!("IP {} has been banned", ip));
    assert_eq!(body["permanent"], true);

    let (status, body) = send(&app.router, post_json(&format!("/ip/{}/ban", ip), json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], format!("IP {} is already banned", ip));

    let (status, body) = send(&app.router, get("/banned")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["banned_ips"][0]["ip"], ip);
    assert_eq!(body["banned_ips"][0]["reason"], "abuse");

    let (status, body) = send(&app.router, get(&format!("/ip/{}", ip))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["banned"], true);
    assert_eq!(body["ban_info"]["permanent"], true);

    let (status, body) = send(&app.router, post_json(&format!("/ip/{}/unban", ip), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], format!("IP {} has been unbanned", ip));

    let (status, body) = send(&app.router, post_json(&format!("/ip/{}/unban", ip), json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], format!("IP {} is not banned", ip));
}

#[tokio::test]
async fn test_admin_routes_require_key_when_configured() {
    let app = setup(|config| config.server.admin_api_key = Some(ADMIN_KEY.to_string())).await;

    let response = app.router.clone().oneshot(get("/banned")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .clone()
        .oneshot(with_bearer(get("/banned"), "wrong-key"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app.router, with_bearer(get("/banned"), ADMIN_KEY)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);

    // Public routes stay open
    let (status, _) = send(&app.router, post_json("/analyze", clean_analysis("192.0.2.50"))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup(|_| {}).await;
    send(&app.router, post_json("/analyze", clean_analysis("192.0.2.60"))).await;

    let response = app.router.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("gatewatch_decisions_total"));
}

#[tokio::test]
async fn test_threat_detection_middleware_guards_routes() {
    let app = setup(|_| {}).await;
    let protected = Router::new()
        .route("/hello", route_get(|| async { "hello" }))
        .layer(middleware::from_fn_with_state(app.engine.clone(), threat_detection_middleware));

    let clean = Request::builder()
        .uri("/hello?page=intro")
        .header("user-agent", BROWSER)
        .header("x-forwarded-for", "203.0.113.70")
        .body(Body::empty())
        .unwrap();
    let response = protected.clone().oneshot(clean).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let attack = Request::builder()
        .uri("/hello?q=%3Cscript%3Ealert(1)%3C%2Fscript%3E")
        .header("user-agent", BROWSER)
        .header("x-forwarded-for", "203.0.113.71")
        .body(Body::empty())
        .unwrap();
    let response = protected.clone().oneshot(attack).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(app.engine.ban_store().is_banned("203.0.113.71").await);
}
