use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, MatchedPath, Request, State},
    http::{
        header::{CONTENT_LENGTH, X_CONTENT_TYPE_OPTIONS},
        HeaderValue, StatusCode,
    },
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{limit::RequestBodyLimitLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};

use crate::auth::{auth_middleware, ApiKeyValidator};
use crate::health::HealthCheckManager;
use crate::metrics;
use crate::rate_limiter::RateLimiter;
use crate::security::{api as security_api, DecisionEngine};

/// Shared handles for every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DecisionEngine>,
    pub rate_limiter: Arc<RateLimiter>,
    pub validator: Arc<ApiKeyValidator>,
    pub health: Arc<HealthCheckManager>,
}

impl AppState {
    pub fn new(engine: Arc<DecisionEngine>, rate_limiter: Arc<RateLimiter>) -> Self {
        let validator = Arc::new(ApiKeyValidator::new(engine.config().server.admin_api_key.clone()));
        let health = Arc::new(HealthCheckManager::new(engine.clone()));

        Self {
            engine,
            rate_limiter,
            validator,
            health,
        }
    }

    pub fn max_request_bytes(&self) -> usize {
        self.engine.config().api_security.max_request_size_mb * 1024 * 1024
    }
}

/// Per-minute budget for one caller on one route. `/analyze` follows the
/// configured limit.
pub fn route_limit(route: &str, analyze_limit: usize) -> usize {
    match route {
        "/health" => 120,
        "/analyze" => analyze_limit,
        "/ip/:ip" => 60,
        _ => 30,
    }
}

pub fn create_router(state: AppState) -> Router {
    let max_request_bytes = state.max_request_bytes();

    let admin = security_api::admin_routes().route_layer(middleware::from_fn_with_state(
        state.validator.clone(),
        auth_middleware,
    ));

    security_api::public_routes()
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .with_state(state)
        .merge(metrics::create_metrics_router())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_request_bytes))
        .layer(middleware::from_fn(move |request: Request, next: Next| {
            request_size_middleware(max_request_bytes, request, next)
        }))
        .layer(SetResponseHeaderLayer::overriding(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(TraceLayer::new_for_http())
}

/// Answers 413 with a JSON body when the declared length is over the limit.
async fn request_size_middleware(max_request_bytes: usize, request: Request, next: Next) -> Response {
    let declared = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());

    if declared.is_some_and(|length| length > max_request_bytes) {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(json!({
                "error": "Request too large",
                "message": format!("Maximum request size is {}MB", max_request_bytes / (1024 * 1024)),
            })),
        )
            .into_response();
    }

    next.run(request).await
}

/// Budget key for the API limiter: the peer IP from the socket. Forwarding
/// headers are caller-controlled and ignored here.
fn caller_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn rate_limit_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let caller = caller_key(&request);

    let limit = route_limit(&route, state.engine.config().api_security.rate_limit_per_minute);
    let response = state
        .rate_limiter
        .check(&format!("{}:{}", caller, route), limit)
        .await;

    if response.allowed {
        return next.run(request).await;
    }

    metrics::API_RATE_LIMITED.with_label_values(&[route.as_str()]).inc();
    state
        .engine
        .audit_logger()
        .log_api_rejection(&caller, &route, "Rate limit exceeded")
        .await;
    tracing::warn!(caller = %caller, route = %route, limit = limit, "API rate limit exceeded");

    (
        StatusCode::TOO_MANY_REQUESTS,
        [("retry-after", response.retry_after.unwrap_or(60).to_string())],
        Json(json!({
            "error": "Rate limit exceeded",
            "message": format!("Maximum {} requests per minute allowed", limit),
        })),
    )
        .into_response()
}
