use serde::{Deserialize, Serialize};
use std::fmt;

/// Final outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Accept,
    Reject,
    Banned,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Accept => "ACCEPT",
            Decision::Reject => "REJECT",
            Decision::Banned => "BANNED",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttackType {
    SqlInjection,
    Xss,
    CommandInjection,
    PathTraversal,
    LfiRfi,
    Ssrf,
    WebFuzzing,
    Enumeration,
    /// Corpus literal that no indicator could classify.
    MaliciousPayload,
    /// Rule hit outside any known category.
    MaliciousPattern,
}

impl AttackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackType::SqlInjection => "SQL_INJECTION",
            AttackType::Xss => "XSS",
            AttackType::CommandInjection => "COMMAND_INJECTION",
            AttackType::PathTraversal => "PATH_TRAVERSAL",
            AttackType::LfiRfi => "LFI_RFI",
            AttackType::Ssrf => "SSRF",
            AttackType::WebFuzzing => "WEB_FUZZING",
            AttackType::Enumeration => "ENUMERATION",
            AttackType::MaliciousPayload => "MALICIOUS_PAYLOAD",
            AttackType::MaliciousPattern => "MALICIOUS_PATTERN",
        }
    }
}

impl fmt::Display for AttackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyType {
    HighRequestRate,
    EndpointEnumeration,
    SuspiciousUserAgent,
    BurstAttack,
    BehavioralAnomaly,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::HighRequestRate => "HIGH_REQUEST_RATE",
            AnomalyType::EndpointEnumeration => "ENDPOINT_ENUMERATION",
            AnomalyType::SuspiciousUserAgent => "SUSPICIOUS_USER_AGENT",
            AnomalyType::BurstAttack => "BURST_ATTACK",
            AnomalyType::BehavioralAnomaly => "BEHAVIORAL_ANOMALY",
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer handed back to the caller of `DecisionEngine::evaluate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub allowed: bool,
    pub decision: Decision,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attack_type: Option<AttackType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_type: Option<AnomalyType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior_score: Option<f64>,
    pub ip: String,
}

impl Verdict {
    pub fn accept(ip: impl Into<String>, behavior_score: f64) -> Self {
        Self {
            allowed: true,
            decision: Decision::Accept,
            reason: "clean request".to_string(),
            attack_type: None,
            anomaly_type: None,
            payload: None,
            behavior_score: Some(behavior_score),
            ip: ip.into(),
        }
    }

    pub fn banned(ip: impl Into<String>) -> Self {
        Self {
            allowed: false,
            decision: Decision::Banned,
            reason: "IP address is banned".to_string(),
            attack_type: None,
            anomaly_type: None,
            payload: None,
            behavior_score: None,
            ip: ip.into(),
        }
    }

    pub fn payload_block(ip: impl Into<String>, newly_banned: bool, attack_type: AttackType, payload: Option<String>) -> Self {
        Self {
            allowed: false,
            decision: if newly_banned { Decision::Banned } else { Decision::Reject },
            reason: format!("Malicious payload detected: {}", attack_type),
            attack_type: Some(attack_type),
            anomaly_type: None,
            payload,
            behavior_score: None,
            ip: ip.into(),
        }
    }

    pub fn anomaly_block(ip: impl Into<String>, newly_banned: bool, anomaly_type: AnomalyType, behavior_score: f64) -> Self {
        Self {
            allowed: false,
            decision: if newly_banned { Decision::Banned } else { Decision::Reject },
            reason: format!(
                "Behavioral anomaly detected: {} (Score: {:.1})",
                anomaly_type, behavior_score
            ),
            attack_type: None,
            anomaly_type: Some(anomaly_type),
            payload: None,
            behavior_score: Some(behavior_score),
            ip: ip.into(),
        }
    }

    /// Strips details only administrators may see.
    pub fn redacted(mut self) -> Self {
        self.payload = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_serializes_upper_case_labels() {
        let verdict = Verdict::payload_block("1.2.3.4", true, AttackType::SqlInjection, Some("union select".into()));
        let json = serde_json::to_value(&verdict).unwrap();

        assert_eq!(json["decision"], "BANNED");
        assert_eq!(json["attack_type"], "SQL_INJECTION");
        assert_eq!(json["reason"], "Malicious payload detected: SQL_INJECTION");
        assert_eq!(json["allowed"], false);
        assert!(json.get("anomaly_type").is_none());
    }

    #[test]
    fn test_anomaly_reason_has_one_decimal_score() {
        let verdict = Verdict::anomaly_block("1.2.3.4", false, AnomalyType::HighRequestRate, 55.0);
        assert_eq!(verdict.decision, Decision::Reject);
        assert_eq!(
            verdict.reason,
            "Behavioral anomaly detected: HIGH_REQUEST_RATE (Score: 55.0)"
        );
    }

    #[test]
    fn test_redacted_drops_payload() {
        let verdict = Verdict::payload_block("1.2.3.4", false, AttackType::Xss, Some("<script>".into()));
        assert!(verdict.redacted().payload.is_none());
    }
}
