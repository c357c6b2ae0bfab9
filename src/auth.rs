use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use blake3::Hasher;
use constant_time_eq::constant_time_eq;
use std::sync::Arc;

const KEY_CONTEXT: &[u8] = b"gatewatch admin api key";

/// Guards the admin routes. Only the digest of the configured key is kept.
pub struct ApiKeyValidator {
    expected_hash: Option<String>,
}

impl ApiKeyValidator {
    pub fn new(admin_api_key: Option<String>) -> Self {
        let expected_hash = admin_api_key
            .filter(|key| !key.is_empty())
            .map(|key| hash_api_key(&key));

        Self { expected_hash }
    }

    /// Whether admin routes require a bearer token at all.
    pub fn is_required(&self) -> bool {
        self.expected_hash.is_some()
    }

    pub fn validate_key(&self, api_key: &str) -> bool {
        match &self.expected_hash {
            Some(expected) => {
                let presented = hash_api_key(api_key);
                constant_time_eq(presented.as_bytes(), expected.as_bytes())
            }
            None => true,
        }
    }

    /// True only when a key is configured and the headers present it.
    pub fn is_admin(&self, headers: &HeaderMap) -> bool {
        self.is_required() && bearer_token(headers).is_some_and(|token| self.validate_key(token))
    }
}

pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(KEY_CONTEXT);
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

pub async fn auth_middleware(
    State(validator): State<Arc<ApiKeyValidator>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !validator.is_required() {
        return Ok(next.run(request).await);
    }

    let Some(api_key) = bearer_token(&headers) else {
        tracing::warn!("Missing or invalid Authorization header");
        return Err(StatusCode::UNAUTHORIZED);
    };

    if validator.validate_key(api_key) {
        tracing::debug!("API key validation successful");
        Ok(next.run(request).await)
    } else {
        tracing::warn!("API key validation failed");
        Err(StatusCode::UNAUTHORIZED)
    }
}
