use crate::api::AppState;
use crate::security::request::RequestDescriptor;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::{error, info};

const DEFAULT_BAN_REASON: &str = "Manual ban";

#[derive(Debug, Default, Deserialize)]
pub struct BanRequest {
    pub reason: Option<String>,
    pub permanent: Option<bool>,
}

/// Routes open to any caller.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/analyze", post(analyze))
}

/// Routes that require the admin key when one is configured.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/ip/:ip", get(address_report))
        .route("/ip/:ip/ban", post(ban_address))
        .route("/ip/:ip/unban", post(unban_address))
        .route("/banned", get(list_banned))
}

fn error_response(status: StatusCode, error: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": error,
            "message": message.into(),
        })),
    )
        .into_response()
}

fn invalid_request(message: &str) -> Response {
    error_response(StatusCode::BAD_REQUEST, "Invalid request", message)
}

pub fn is_valid_ip(value: &str) -> bool {
    value == "localhost" || value.parse::<IpAddr>().is_ok()
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let checks = state.health.check_health().await;

    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "service": "gatewatch",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": checks.metrics.uptime_seconds,
        "checks": checks,
    }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.engine.status().await))
}

/// Build a descriptor from the analyze payload, or the 400 response to send.
fn descriptor_from_json(payload: &Value) -> Result<RequestDescriptor, Response> {
    let Some(object) = payload.as_object() else {
        return Err(invalid_request("JSON payload required"));
    };

    let ip = object
        .get("ip")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if ip.is_empty() {
        return Err(invalid_request("IP address is required"));
    }
    if !is_valid_ip(ip) {
        return Err(invalid_request("Invalid IP address format"));
    }

    let text = |key: &str| object.get(key).and_then(Value::as_str).unwrap_or_default();
    let method = match text("method") {
        "" => "GET",
        method => method,
    };
    let url = match text("url") {
        "" => "/",
        url => url,
    };

    let body = match object.get("body") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(body)) => body.clone(),
        Some(other) => other.to_string(),
    };

    let mut descriptor = RequestDescriptor::new(ip, url, method)
        .with_headers(string_map(object, "headers"))
        .with_query_params(string_map(object, "query_params"))
        .with_body(body)
        .with_user_agent(text("user_agent"));

    if let Some(timestamp) = object
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
    {
        descriptor = descriptor.with_timestamp(timestamp.with_timezone(&Utc));
    }

    Ok(descriptor)
}

fn string_map(object: &Map<String, Value>, key: &str) -> BTreeMap<String, String> {
    object
        .get(key)
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

async fn analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(_) => return invalid_request("JSON payload required"),
    };

    let descriptor = match descriptor_from_json(&payload) {
        Ok(descriptor) => descriptor,
        Err(response) => return response,
    };

    let engine = state.engine.clone();
    let address = descriptor.ip_address.clone();
    let evaluation = tokio::spawn(async move { engine.evaluate(&descriptor.ip_address, &descriptor).await });

    match evaluation.await {
        Ok(verdict) => {
            let status = if verdict.allowed {
                StatusCode::OK
            } else {
                StatusCode::FORBIDDEN
            };
            let verdict = if state.validator.is_admin(&headers) {
                verdict
            } else {
                verdict.redacted()
            };
            (status, Json(json!(verdict))).into_response()
        }
        Err(e) => {
            // Fail open for the protected service
            error!(ip = %address, error = %e, "Request analysis failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Internal server error",
                    "allowed": true,
                })),
            )
                .into_response()
        }
    }
}

async fn address_report(State(state): State<AppState>, Path(ip): Path<String>) -> Response {
    Json(json!(state.engine.address_report(&ip).await)).into_response()
}

async fn ban_address(
    State(state): State<AppState>,
    Path(ip): Path<String>,
    body: Bytes,
) -> Response {
    if !is_valid_ip(&ip) {
        return invalid_request("Invalid IP address format");
    }
    if !state.engine.ban_store().is_enabled() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "IP banning is disabled"})),
        )
            .into_response();
    }

    let request: BanRequest = serde_json::from_slice(&body).unwrap_or_default();
    let reason = request
        .reason
        .filter(|reason| !reason.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BAN_REASON.to_string());
    let permanent = request.permanent.unwrap_or(false);

    if state.engine.ban(&ip, &reason, permanent).await {
        info!(ip = %ip, reason = %reason, permanent = permanent, "Manual ban");
        Json(json!({
            "success": true,
            "message": format!("IP {} has been banned", ip),
            "reason": reason,
            "permanent": permanent,
        }))
        .into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "message": format!("IP {} is already banned", ip),
            })),
        )
            .into_response()
    }
}

async fn unban_address(State(state): State<AppState>, Path(ip): Path<String>) -> Response {
    if state.engine.unban(&ip).await {
        Json(json!({
            "success": true,
            "message": format!("IP {} has been unbanned", ip),
        }))
        .into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "message": format!("IP {} is not banned", ip),
            })),
        )
            .into_response()
    }
}

async fn list_banned(State(state): State<AppState>) -> Json<Value> {
    let banned = state.engine.list_banned_details().await;

    Json(json!({
        "count": banned.len(),
        "banned_ips": banned,
    }))
}
