use crate::config::{AnomalyDetectionConfig, DetectionConfig};
use crate::security::activity_tracker::ActivityTracker;
use crate::security::request::RequestDescriptor;
use crate::security::rules::{
    compile_patterns, ENUMERATION_PATH_PATTERN, ENUMERATION_QUERY_KEYS, LOGIN_ENDPOINT_PATTERNS,
    SUSPICIOUS_ENDPOINT_PATTERNS, SUSPICIOUS_USER_AGENT_PATTERNS,
};
use crate::security::verdict::AnomalyType;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

const RATE_EXCESS_CAP: f64 = 30.0;
const DIVERSITY_EXCESS_CAP: f64 = 20.0;
const USER_AGENT_CAP: f64 = 30.0;
const MISSING_USER_AGENT_SCORE: f64 = 10.0;
const OVERSIZED_USER_AGENT_LEN: usize = 500;
const OVERSIZED_USER_AGENT_SCORE: f64 = 5.0;
const USER_AGENT_CHURN_LIMIT: usize = 5;
const USER_AGENT_CHURN_CAP: f64 = 15.0;
const BURST_SCORE: f64 = 15.0;
const SUSTAINED_RATE_PER_MINUTE: f64 = 60.0;
const SUSTAINED_RATE_SCORE: f64 = 10.0;
const SUSPICIOUS_ENDPOINT_SCORE: f64 = 10.0;
const ENUMERATION_SCORE: f64 = 15.0;
const BRUTE_FORCE_WINDOW_SECONDS: u64 = 60;
const BRUTE_FORCE_MIN_REQUESTS: usize = 10;
const BRUTE_FORCE_SCORE: f64 = 20.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAssessment {
    pub is_anomalous: bool,
    pub anomaly_type: Option<AnomalyType>,
    pub behavior_score: f64,
    /// Human-readable description of every signal that fired.
    pub signals: Vec<String>,
}

/// Composite behavior scoring over the tracker's statistics and the current
/// request.
pub struct AnomalyDetector {
    config: AnomalyDetectionConfig,
    brute_force_enabled: bool,
    enumeration_enabled: bool,
    tracker: Arc<ActivityTracker>,
    user_agent_patterns: Vec<Regex>,
    endpoint_patterns: Vec<Regex>,
    enumeration_path: Vec<Regex>,
    login_patterns: Vec<Regex>,
}

impl AnomalyDetector {
    pub fn new(config: &AnomalyDetectionConfig, detection: &DetectionConfig, tracker: Arc<ActivityTracker>) -> Self {
        Self {
            config: config.clone(),
            brute_force_enabled: detection.brute_force,
            enumeration_enabled: detection.enumeration,
            tracker,
            user_agent_patterns: compile_patterns(SUSPICIOUS_USER_AGENT_PATTERNS),
            endpoint_patterns: compile_patterns(SUSPICIOUS_ENDPOINT_PATTERNS),
            enumeration_path: compile_patterns(&[ENUMERATION_PATH_PATTERN]),
            login_patterns: compile_patterns(LOGIN_ENDPOINT_PATTERNS),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Whether a positive verdict should lead to a ban, as far as this
    /// detector is concerned.
    pub fn auto_ban(&self) -> bool {
        self.config.auto_ban_on_anomaly
    }

    pub async fn evaluate(&self, address: &str, request: &RequestDescriptor) -> AnomalyAssessment {
        if !self.config.enabled {
            return AnomalyAssessment::default();
        }

        let mut score = 0.0;
        let mut signals = Vec::new();

        let window = self.config.request_rate_window_seconds;
        let request_count = self.tracker.request_count(address, Some(window)).await;
        let rate_exceeded = request_count > self.config.request_rate_threshold;
        if rate_exceeded {
            let excess = (request_count - self.config.request_rate_threshold) as f64;
            score += (excess * 2.0).min(RATE_EXCESS_CAP);
            signals.push(format!("High request rate: {} requests in {}s", request_count, window));
        }

        let endpoint_diversity = self.tracker.endpoint_diversity(address).await;
        let diversity_exceeded = endpoint_diversity > self.config.endpoint_diversity_threshold;
        if diversity_exceeded {
            let excess = (endpoint_diversity - self.config.endpoint_diversity_threshold) as f64;
            score += (excess * 1.5).min(DIVERSITY_EXCESS_CAP);
            signals.push(format!("High endpoint diversity: {} unique endpoints", endpoint_diversity));
        }

        let user_agent = request.effective_user_agent();
        let user_agent_score = self.user_agent_score(user_agent);
        if user_agent_score > 0.0 {
            score += user_agent_score;
            signals.push(format!(
                "Suspicious user agent: {}",
                user_agent.chars().take(50).collect::<String>()
            ));
        }

        let user_agent_diversity = self.tracker.user_agent_diversity(address).await;
        if user_agent_diversity > USER_AGENT_CHURN_LIMIT {
            score += (user_agent_diversity as f64 * 2.0).min(USER_AGENT_CHURN_CAP);
            signals.push(format!("Multiple user agents: {} unique UAs", user_agent_diversity));
        }

        let pattern = self.tracker.time_pattern(address).await;
        if pattern.burst_detected {
            score += BURST_SCORE;
            signals.push("Burst pattern detected".to_string());
        }
        if pattern.requests_per_minute > SUSTAINED_RATE_PER_MINUTE {
            score += SUSTAINED_RATE_SCORE;
            signals.push(format!("High request rate: {:.1} req/min", pattern.requests_per_minute));
        }

        if self.is_suspicious_endpoint(&request.url) {
            score += SUSPICIOUS_ENDPOINT_SCORE;
            signals.push(format!(
                "Suspicious endpoint: {}",
                request.url.chars().take(100).collect::<String>()
            ));
        }

        if self.enumeration_enabled && self.is_enumeration(request) {
            score += ENUMERATION_SCORE;
            signals.push("Enumeration pattern detected".to_string());
        }

        if self.brute_force_enabled && self.is_brute_force(address, &request.url).await {
            score += BRUTE_FORCE_SCORE;
            signals.push("Brute force pattern detected".to_string());
        }

        let is_anomalous = score >= self.config.behavior_score_threshold;
        let anomaly_type = is_anomalous.then(|| {
            if rate_exceeded {
                AnomalyType::HighRequestRate
            } else if diversity_exceeded {
                AnomalyType::EndpointEnumeration
            } else if user_agent_score > 0.0 {
                AnomalyType::SuspiciousUserAgent
            } else if pattern.burst_detected {
                AnomalyType::BurstAttack
            } else {
                AnomalyType::BehavioralAnomaly
            }
        });

        debug!(
            ip = address,
            behavior_score = score,
            signals = signals.len(),
            anomalous = is_anomalous,
            "Behavior scored"
        );

        AnomalyAssessment {
            is_anomalous,
            anomaly_type,
            behavior_score: score,
            signals,
        }
    }

    /// Score for the user agent alone, capped at 30.
    pub fn user_agent_score(&self, user_agent: &str) -> f64 {
        if user_agent.chars().count() < 3 {
            return MISSING_USER_AGENT_SCORE;
        }

        let families = self
            .user_agent_patterns
            .iter()
            .filter(|pattern| pattern.is_match(user_agent))
            .count();
        let mut score = families as f64 * self.config.suspicious_user_agent_score;

        if user_agent.chars().count() > OVERSIZED_USER_AGENT_LEN {
            score += OVERSIZED_USER_AGENT_SCORE;
        }

        score.min(USER_AGENT_CAP)
    }

    pub fn is_suspicious_endpoint(&self, endpoint: &str) -> bool {
        self.endpoint_patterns.iter().any(|pattern| pattern.is_match(endpoint))
    }

    pub fn is_enumeration(&self, request: &RequestDescriptor) -> bool {
        let numeric_key = request.query_params.iter().any(|(key, value)| {
            ENUMERATION_QUERY_KEYS.contains(&key.to_lowercase().as_str())
                && !value.is_empty()
                && value.chars().all(|c| c.is_ascii_digit())
        });

        numeric_key || self.enumeration_path.iter().any(|pattern| pattern.is_match(&request.url))
    }

    async fn is_brute_force(&self, address: &str, endpoint: &str) -> bool {
        if !self.login_patterns.iter().any(|pattern| pattern.is_match(endpoint)) {
            return false;
        }

        self.tracker
            .request_count(address, Some(BRUTE_FORCE_WINDOW_SECONDS))
            .await
            > BRUTE_FORCE_MIN_REQUESTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ActivityTrackingConfig;
    use chrono::Duration;

    const BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0";

    fn setup() -> (ManualClock, Arc<ActivityTracker>, AnomalyDetector) {
        let clock = ManualClock::default();
        let tracker = Arc::new(ActivityTracker::new(
            &ActivityTrackingConfig::default(),
            Arc::new(clock.clone()),
        ));
        let detector = AnomalyDetector::new(
            &AnomalyDetectionConfig::default(),
            &DetectionConfig::default(),
            tracker.clone(),
        );
        (clock, tracker, detector)
    }

    #[tokio::test]
    async fn test_quiet_browser_is_not_anomalous() {
        let (_, tracker, detector) = setup();
        tracker.record("10.0.0.1", "/home", "GET", BROWSER).await;

        let request = RequestDescriptor::new("10.0.0.1", "/home", "GET").with_user_agent(BROWSER);
        let assessment = detector.evaluate("10.0.0.1", &request).await;

        assert!(!assessment.is_anomalous);
        assert_eq!(assessment.behavior_score, 0.0);
        assert!(assessment.signals.is_empty());
    }

    #[tokio::test]
    async fn test_request_flood_is_high_request_rate() {
        let (_, tracker, detector) = setup();
        for _ in 0..120 {
            tracker.record("10.0.0.2", "/home", "GET", BROWSER).await;
        }

        let request = RequestDescriptor::new("10.0.0.2", "/home", "GET").with_user_agent(BROWSER);
        let assessment = detector.evaluate("10.0.0.2", &request).await;

        // rate excess 30 + burst 15 + sustained rate 10
        assert_eq!(assessment.behavior_score, 55.0);
        assert!(assessment.is_anomalous);
        assert_eq!(assessment.anomaly_type, Some(AnomalyType::HighRequestRate));
    }

    fn with_threshold(tracker: &Arc<ActivityTracker>, threshold: f64) -> AnomalyDetector {
        let config = AnomalyDetectionConfig {
            behavior_score_threshold: threshold,
            ..AnomalyDetectionConfig::default()
        };
        AnomalyDetector::new(&config, &DetectionConfig::default(), tracker.clone())
    }

    #[tokio::test]
    async fn test_endpoint_diversity_is_endpoint_enumeration() {
        let (clock, tracker, _) = setup();
        let detector = with_threshold(&tracker, 20.0);

        // 34 distinct pages, 2s apart: no burst, 30 req/min
        for i in 0..34 {
            tracker.record("10.0.0.7", &format!("/page/{}", i), "GET", BROWSER).await;
            clock.advance(Duration::seconds(2));
        }

        let request = RequestDescriptor::new("10.0.0.7", "/page/0", "GET").with_user_agent(BROWSER);
        let assessment = detector.evaluate("10.0.0.7", &request).await;

        // excess 14 * 1.5 = 21, capped at 20
        assert_eq!(assessment.behavior_score, 20.0);
        assert!(assessment.is_anomalous);
        assert_eq!(assessment.anomaly_type, Some(AnomalyType::EndpointEnumeration));
        assert_eq!(assessment.signals, vec!["High endpoint diversity: 34 unique endpoints"]);
    }

    #[tokio::test]
    async fn test_user_agent_churn_is_capped() {
        let (clock, tracker, detector) = setup();
        let request = RequestDescriptor::new("10.0.0.8", "/home", "GET").with_user_agent(BROWSER);

        for i in 0..6 {
            let user_agent = format!("Mozilla/5.0 (X11; Linux x86_64) Firefox/10{}.0", i);
            tracker.record("10.0.0.8", "/home", "GET", &user_agent).await;
            clock.advance(Duration::seconds(10));
        }
        let assessment = detector.evaluate("10.0.0.8", &request).await;
        assert_eq!(assessment.behavior_score, 12.0);
        assert_eq!(assessment.signals, vec!["Multiple user agents: 6 unique UAs"]);

        for i in 6..9 {
            let user_agent = format!("Mozilla/5.0 (X11; Linux x86_64) Firefox/10{}.0", i);
            tracker.record("10.0.0.8", "/home", "GET", &user_agent).await;
            clock.advance(Duration::seconds(10));
        }
        let assessment = detector.evaluate("10.0.0.8", &request).await;
        assert_eq!(assessment.behavior_score, 15.0);
        assert!(!assessment.is_anomalous);
    }

    #[tokio::test]
    async fn test_user_agent_label_outranks_burst() {
        let (_, tracker, _) = setup();
        let detector = with_threshold(&tracker, 15.0);
        let scanner = "sqlmap/1.7 scanner";

        for _ in 0..25 {
            tracker.record("10.0.0.10", "/home", "GET", scanner).await;
        }
        let request = RequestDescriptor::new("10.0.0.10", "/home", "GET").with_user_agent(scanner);
        let assessment = detector.evaluate("10.0.0.10", &request).await;

        // two user-agent families (10) plus burst (15)
        assert_eq!(assessment.behavior_score, 25.0);
        assert_eq!(assessment.anomaly_type, Some(AnomalyType::SuspiciousUserAgent));
    }

    #[tokio::test]
    async fn test_burst_alone_is_burst_attack() {
        let (_, tracker, _) = setup();
        let detector = with_threshold(&tracker, 15.0);

        for _ in 0..25 {
            tracker.record("10.0.0.11", "/home", "GET", BROWSER).await;
        }
        let request = RequestDescriptor::new("10.0.0.11", "/home", "GET").with_user_agent(BROWSER);
        let assessment = detector.evaluate("10.0.0.11", &request).await;

        assert_eq!(assessment.behavior_score, 15.0);
        assert!(assessment.is_anomalous);
        assert_eq!(assessment.anomaly_type, Some(AnomalyType::BurstAttack));
    }

    #[tokio::test]
    async fn test_user_agent_scoring() {
        let (_, _, detector) = setup();

        assert_eq!(detector.user_agent_score(""), 10.0);
        assert_eq!(detector.user_agent_score("ab"), 10.0);
        assert_eq!(detector.user_agent_score(BROWSER), 0.0);
        assert_eq!(detector.user_agent_score("sqlmap/1.7"), 5.0);
        // scripted client plus attack word
        assert_eq!(detector.user_agent_score("python-requests exploit"), 10.0);
        assert_eq!(detector.user_agent_score(&"a".repeat(501)), 5.0);
    }

    #[tokio::test]
    async fn test_enumeration_and_suspicious_endpoints() {
        let (_, _, detector) = setup();

        let by_query = RequestDescriptor::new("10.0.0.3", "/orders", "GET").with_query_param("ID", "42");
        let by_path = RequestDescriptor::new("10.0.0.3", "/api/users/17", "GET");
        let non_numeric = RequestDescriptor::new("10.0.0.3", "/orders", "GET").with_query_param("id", "abc");

        assert!(detector.is_enumeration(&by_query));
        assert!(detector.is_enumeration(&by_path));
        assert!(!detector.is_enumeration(&non_numeric));

        assert!(detector.is_suspicious_endpoint("/.env"));
        assert!(detector.is_suspicious_endpoint("/wp-admin/setup.php"));
        assert!(!detector.is_suspicious_endpoint("/home"));
    }

    #[tokio::test]
    async fn test_brute_force_needs_login_endpoint_and_volume() {
        let (clock, tracker, detector) = setup();
        for _ in 0..11 {
            tracker.record("10.0.0.4", "/login", "POST", BROWSER).await;
            clock.advance(Duration::seconds(5));
        }

        assert!(detector.is_brute_force("10.0.0.4", "/login").await);
        assert!(!detector.is_brute_force("10.0.0.4", "/home").await);

        clock.advance(Duration::seconds(120));
        assert!(!detector.is_brute_force("10.0.0.4", "/login").await);
    }

    #[tokio::test]
    async fn test_label_falls_back_to_behavioral_anomaly() {
        let (clock, tracker, _) = setup();
        let config = AnomalyDetectionConfig {
            behavior_score_threshold: 20.0,
            ..AnomalyDetectionConfig::default()
        };
        let detector = AnomalyDetector::new(&config, &DetectionConfig::default(), tracker.clone());

        tracker.record("10.0.0.5", "/api/users/1", "GET", BROWSER).await;
        clock.advance(Duration::seconds(30));
        let request = RequestDescriptor::new("10.0.0.5", "/api/users/1", "GET").with_user_agent(BROWSER);
        let assessment = detector.evaluate("10.0.0.5", &request).await;

        // enumeration only
        assert_eq!(assessment.behavior_score, 15.0);
        assert!(!assessment.is_anomalous);

        // enumeration plus suspicious endpoint
        let admin = RequestDescriptor::new("10.0.0.5", "/admin/users/2", "GET").with_user_agent(BROWSER);
        let assessment = detector.evaluate("10.0.0.5", &admin).await;
        assert_eq!(assessment.behavior_score, 25.0);
        assert!(assessment.is_anomalous);
        assert_eq!(assessment.anomaly_type, Some(AnomalyType::BehavioralAnomaly));
        assert_eq!(assessment.signals.len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_detector_scores_zero() {
        let (_, tracker, _) = setup();
        let config = AnomalyDetectionConfig {
            enabled: false,
            ..AnomalyDetectionConfig::default()
        };
        let detector = AnomalyDetector::new(&config, &DetectionConfig::default(), tracker.clone());
        for _ in 0..200 {
            tracker.record("10.0.0.6", "/", "GET", "").await;
        }

        let request = RequestDescriptor::new("10.0.0.6", "/", "GET");
        assert_eq!(detector.evaluate("10.0.0.6", &request).await, AnomalyAssessment::default());
    }
}
