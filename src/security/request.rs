use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const MAX_URL_LEN: usize = 2000;
pub const MAX_BODY_LEN: usize = 50_000;
pub const MAX_USER_AGENT_LEN: usize = 500;

const ALLOWED_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Normalized view of one inbound request, as handed to the decision engine.
///
/// Headers and query parameters are kept in ordered maps so that the text
/// fragments scanned by the payload detector are stable between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub correlation_id: Uuid,
    pub ip_address: String,
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query_params: BTreeMap<String, String>,
    pub body: String,
    pub user_agent: String,
    pub timestamp: DateTime<Utc>,
}

impl RequestDescriptor {
    pub fn new(ip_address: impl Into<String>, url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            ip_address: ip_address.into(),
            method: normalize_method(&method.into()),
            url: truncate_chars(&url.into(), MAX_URL_LEN),
            headers: BTreeMap::new(),
            query_params: BTreeMap::new(),
            body: String::new(),
            user_agent: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = truncate_chars(&user_agent.into(), MAX_USER_AGENT_LEN);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    pub fn with_query_params(mut self, query_params: BTreeMap<String, String>) -> Self {
        self.query_params = query_params;
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = truncate_bytes(&body.into(), MAX_BODY_LEN);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// User agent from the explicit field, falling back to the header map.
    pub fn effective_user_agent(&self) -> &str {
        if !self.user_agent.is_empty() {
            return &self.user_agent;
        }
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("user-agent"))
            .map(|(_, value)| value.as_str())
            .unwrap_or("")
    }

    /// Query parameters rendered as `k=v` pairs joined by spaces.
    pub fn query_string(&self) -> String {
        self.query_params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Headers rendered as `k: v` pairs joined by spaces.
    pub fn header_string(&self) -> String {
        self.headers
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Upper-cases the method; anything outside the usual verbs becomes GET.
pub fn normalize_method(method: &str) -> String {
    let upper = method.trim().to_uppercase();
    if ALLOWED_METHODS.contains(&upper.as_str()) {
        upper
    } else {
        "GET".to_string()
    }
}

pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

pub fn truncate_bytes(value: &str, max_bytes: usize) -> String {
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}
