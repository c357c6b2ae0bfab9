use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

const MAX_PAYLOAD_CHARS: usize = 200;
const MAX_USER_AGENT_CHARS: usize = 100;

/// One structured record in the decision log.
///
/// Carries enough to explain a decision after the fact without re-running
/// detection: who, what was requested, what fired and how strongly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub ip: Option<String>,
    pub decision: String,
    pub reason: String,
    pub attack_type: Option<String>,
    pub payload: Option<String>,
    pub endpoint: Option<String>,
    pub method: Option<String>,
    pub user_agent: Option<String>,
    pub behavior_score: Option<f64>,
    pub request_count: Option<usize>,
    pub correlation_id: Option<Uuid>,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Decision,
    IpBan,
    IpUnban,
    System,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, decision: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            ip: None,
            decision: decision.into(),
            reason: reason.into(),
            attack_type: None,
            payload: None,
            endpoint: None,
            method: None,
            user_agent: None,
            behavior_score: None,
            request_count: None,
            correlation_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_attack_type(mut self, attack_type: impl Into<String>) -> Self {
        self.attack_type = Some(attack_type.into());
        self
    }

    /// Stores the matched payload, truncated for the log.
    pub fn with_payload(mut self, payload: &str) -> Self {
        self.payload = Some(truncate_for_log(payload, MAX_PAYLOAD_CHARS));
        self
    }

    pub fn with_request(mut self, endpoint: &str, method: &str, user_agent: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self.method = Some(method.to_string());
        self.user_agent = Some(truncate_for_log(user_agent, MAX_USER_AGENT_CHARS));
        self
    }

    pub fn with_behavior_score(mut self, score: f64) -> Self {
        self.behavior_score = Some(score);
        self
    }

    pub fn with_request_count(mut self, count: usize) -> Self {
        self.request_count = Some(count);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether the record belongs in the accept log.
    pub fn is_accept(&self) -> bool {
        matches!(self.decision.as_str(), "ACCEPT" | "ALLOWED")
    }

    /// Whether the record belongs in the reject log.
    pub fn is_reject(&self) -> bool {
        matches!(self.decision.as_str(), "REJECT" | "BANNED" | "BLOCKED")
    }
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}... [truncated]", &value[..idx]),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_and_user_agent_are_truncated() {
        let event = AuditEvent::new(AuditEventType::Decision, "REJECT", "test")
            .with_payload(&"x".repeat(500))
            .with_request("/", "GET", &"u".repeat(300));

        assert!(event.payload.unwrap().ends_with("... [truncated]"));
        assert!(event.user_agent.unwrap().starts_with(&"u".repeat(100)));
    }

    #[test]
    fn test_log_routing_by_decision() {
        let accept = AuditEvent::new(AuditEventType::Decision, "ACCEPT", "clean request");
        let banned = AuditEvent::new(AuditEventType::IpBan, "BANNED", "manual");
        let system = AuditEvent::new(AuditEventType::System, "SYSTEM", "start");

        assert!(accept.is_accept() && !accept.is_reject());
        assert!(banned.is_reject() && !banned.is_accept());
        assert!(!system.is_accept() && !system.is_reject());
    }

    #[test]
    fn test_event_type_serializes_snake_case() {
        let json = serde_json::to_string(&AuditEventType::IpUnban).unwrap();
        assert_eq!(json, "\"ip_unban\"");
    }
}
