use crate::security::request::{RequestDescriptor, MAX_BODY_LEN};
use crate::security::DecisionEngine;
use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Transport headers that carry no request content worth scanning.
const UNSCANNED_HEADERS: &[&str] = &[
    "accept",
    "accept-encoding",
    "accept-language",
    "authorization",
    "connection",
    "content-length",
    "host",
];

/// Middleware that runs the decision engine on every request passing through
/// a protected router and answers 403 when the verdict disallows it.
pub async fn threat_detection_middleware(
    State(engine): State<Arc<DecisionEngine>>,
    request: Request,
    next: Next,
) -> Response {
    let ip_address = client_ip(request.headers(), connect_info(&request));
    let (parts, body) = request.into_parts();

    let max_body = engine.config().api_security.max_request_size_mb * 1024 * 1024;
    let bytes = match to_bytes(body, max_body).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(ip_address = %ip_address, error = %e, "Request body rejected before analysis");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let query_params = Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(params)| params)
        .unwrap_or_default();

    let headers: BTreeMap<String, String> = parts
        .headers
        .iter()
        .filter(|(name, _)| !UNSCANNED_HEADERS.contains(&name.as_str()))
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
        .collect();

    let descriptor = RequestDescriptor::new(ip_address.clone(), parts.uri.path(), parts.method.as_str())
        .with_headers(headers)
        .with_query_params(query_params)
        .with_body(String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_BODY_LEN)]).to_string());

    let verdict = engine.evaluate(&ip_address, &descriptor).await;
    debug!(
        ip_address = %ip_address,
        decision = %verdict.decision,
        correlation_id = %descriptor.correlation_id,
        "Request analyzed"
    );

    if !verdict.allowed {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "Forbidden",
                "decision": verdict.decision,
            })),
        )
            .into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

fn connect_info(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Caller address from proxy headers, falling back to the socket address.
pub fn client_ip(headers: &HeaderMap, socket: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    // First hop of the forwarded chain
    if let Some(first_ip) = header("x-forwarded-for").and_then(|value| value.split(',').next()) {
        return first_ip.trim().to_string();
    }

    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.to_string();
    }

    if let Some(cf_ip) = header("cf-connecting-ip") {
        return cf_ip.to_string();
    }

    socket
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_precedence() {
        let socket: SocketAddr = "192.0.2.1:4000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(socket)), "192.0.2.1");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert("cf-connecting-ip", HeaderValue::from_static("198.51.100.3"));
        assert_eq!(client_ip(&headers, Some(socket)), "198.51.100.3");

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers, Some(socket)), "198.51.100.2");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_ip(&headers, Some(socket)), "203.0.113.7");
    }
}
