use crate::audit::AuditLogger;
use crate::clock::Clock;
use crate::config::GateWatchConfig;
use crate::metrics;
use crate::security::activity_tracker::{ActivitySummary, ActivityTracker, TimePattern};
use crate::security::anomaly_detector::AnomalyDetector;
use crate::security::ban_store::{BanInfo, BanStore};
use crate::security::payload_detector::PayloadDetector;
use crate::security::request::RequestDescriptor;
use crate::security::verdict::{AnomalyType, AttackType, Verdict};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Everything known about one address, for the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressReport {
    pub ip: String,
    pub banned: bool,
    pub ban_info: Option<BanInfo>,
    pub activity: ActivitySummary,
    pub time_pattern: TimePattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatistics {
    pub banned_ips: usize,
    pub tracked_ips: usize,
    pub payloads_loaded: usize,
    pub patterns_loaded: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineFeatures {
    pub corpus_enabled: bool,
    pub anomaly_detection_enabled: bool,
    pub ip_banning_enabled: bool,
    pub activity_tracking_enabled: bool,
    pub logging_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub statistics: EngineStatistics,
    pub configuration: EngineFeatures,
}

/// Sequences ban check, activity recording, payload detection and anomaly
/// scoring into one verdict per request.
pub struct DecisionEngine {
    config: GateWatchConfig,
    clock: Arc<dyn Clock>,
    ban_store: Arc<BanStore>,
    tracker: Arc<ActivityTracker>,
    payload_detector: Arc<PayloadDetector>,
    anomaly_detector: AnomalyDetector,
    audit_logger: Arc<AuditLogger>,
}

impl DecisionEngine {
    /// Build every component from the configuration.
    pub async fn new(config: GateWatchConfig, clock: Arc<dyn Clock>, audit_logger: Arc<AuditLogger>) -> Result<Self> {
        let ban_store = Arc::new(BanStore::load(&config.ip_banning, clock.clone()).await?);

        // Corpus loading walks the filesystem
        let corpus = config.corpus.clone();
        let detection = config.detection.clone();
        let payload_detector = tokio::task::spawn_blocking(move || PayloadDetector::new(&corpus, &detection)).await?;

        if config.corpus.enabled && !payload_detector.corpus_available() {
            audit_logger
                .log_system(&format!(
                    "Payload corpus not found at {}; running with detection rules only",
                    config.corpus.path
                ))
                .await;
        }

        Ok(Self::from_parts(config, clock, ban_store, Arc::new(payload_detector), audit_logger))
    }

    /// Assemble an engine around an existing ban store and detector.
    pub fn from_parts(
        config: GateWatchConfig,
        clock: Arc<dyn Clock>,
        ban_store: Arc<BanStore>,
        payload_detector: Arc<PayloadDetector>,
        audit_logger: Arc<AuditLogger>,
    ) -> Self {
        let tracker = Arc::new(ActivityTracker::new(&config.activity_tracking, clock.clone()));
        let anomaly_detector = AnomalyDetector::new(&config.anomaly_detection, &config.detection, tracker.clone());

        Self {
            config,
            clock,
            ban_store,
            tracker,
            payload_detector,
            anomaly_detector,
            audit_logger,
        }
    }

    pub fn config(&self) -> &GateWatchConfig {
        &self.config
    }

    pub fn ban_store(&self) -> &Arc<BanStore> {
        &self.ban_store
    }

    pub fn tracker(&self) -> &Arc<ActivityTracker> {
        &self.tracker
    }

    pub fn payload_detector(&self) -> &Arc<PayloadDetector> {
        &self.payload_detector
    }

    pub fn audit_logger(&self) -> &Arc<AuditLogger> {
        &self.audit_logger
    }

    pub async fn evaluate(&self, address: &str, request: &RequestDescriptor) -> Verdict {
        let start_time = Instant::now();
        let verdict = self.decide(address, request).await;

        metrics::EVALUATION_DURATION.observe(start_time.elapsed().as_secs_f64());
        metrics::DECISIONS_TOTAL
            .with_label_values(&[verdict.decision.as_str()])
            .inc();

        verdict
    }

    async fn decide(&self, address: &str, request: &RequestDescriptor) -> Verdict {
        if self.ban_store.is_banned(address).await {
            let verdict = Verdict::banned(address);
            info!(ip = address, decision = %verdict.decision, "Request from banned address");
            self.record_decision(&verdict, request, &[]).await;
            return verdict;
        }

        self.tracker
            .record(address, &request.url, &request.method, request.effective_user_agent())
            .await;

        let detection = self.payload_detector.detect(request);
        if detection.is_malicious {
            let attack_type = detection
                .attack_type
                .unwrap_or(AttackType::MaliciousPayload);
            metrics::PAYLOAD_DETECTIONS
                .with_label_values(&[attack_type.as_str()])
                .inc();

            let reason = format!("Malicious payload detected: {}", attack_type);
            let newly_banned = self.config.ip_banning.auto_ban_on_payload && self.ban(address, &reason, false).await;

            let verdict = Verdict::payload_block(address, newly_banned, attack_type, detection.matched_payload);
            warn!(
                ip = address,
                decision = %verdict.decision,
                attack_type = %attack_type,
                "Malicious payload detected"
            );
            self.record_decision(&verdict, request, &[]).await;
            return verdict;
        }

        let assessment = self.anomaly_detector.evaluate(address, request).await;
        if assessment.is_anomalous {
            let anomaly_type = assessment
                .anomaly_type
                .unwrap_or(AnomalyType::BehavioralAnomaly);
            metrics::ANOMALY_DETECTIONS
                .with_label_values(&[anomaly_type.as_str()])
                .inc();

            let ban_allowed = self.config.ip_banning.auto_ban_on_anomaly && self.anomaly_detector.auto_ban();
            let mut verdict = Verdict::anomaly_block(address, false, anomaly_type, assessment.behavior_score);
            let reason = verdict.reason.clone();
            if ban_allowed && self.ban(address, &reason, false).await {
                verdict = Verdict::anomaly_block(address, true, anomaly_type, assessment.behavior_score);
            }

            warn!(
                ip = address,
                decision = %verdict.decision,
                anomaly_type = %anomaly_type,
                behavior_score = assessment.behavior_score,
                "Behavioral anomaly detected"
            );
            self.record_decision(&verdict, request, &assessment.signals).await;
            return verdict;
        }

        let verdict = Verdict::accept(address, assessment.behavior_score);
        info!(
            ip = address,
            decision = %verdict.decision,
            behavior_score = assessment.behavior_score,
            "Request accepted"
        );
        self.record_decision(&verdict, request, &[]).await;
        verdict
    }

    async fn record_decision(&self, verdict: &Verdict, request: &RequestDescriptor, signals: &[String]) {
        let request_count = self.tracker.request_count(&verdict.ip, None).await;
        self.audit_logger
            .log_decision(verdict, request, request_count, signals, self.clock.now())
            .await;
    }

    /// Ban an address and log it. Returns false when it was already banned.
    pub async fn ban(&self, address: &str, reason: &str, permanent: bool) -> bool {
        if !self.ban_store.ban(address, reason, permanent).await {
            return false;
        }

        metrics::BANS_TOTAL.inc();
        metrics::BANNED_ADDRESSES.set(self.ban_store.len().await as i64);
        self.audit_logger
            .log_ban(address, reason, permanent, self.clock.now())
            .await;
        true
    }

    pub async fn unban(&self, address: &str) -> bool {
        if !self.ban_store.unban(address).await {
            return false;
        }

        metrics::BANNED_ADDRESSES.set(self.ban_store.len().await as i64);
        self.audit_logger.log_unban(address, self.clock.now()).await;
        true
    }

    pub async fn list_banned_details(&self) -> Vec<BanInfo> {
        self.ban_store.list_banned_details().await
    }

    pub async fn address_report(&self, address: &str) -> AddressReport {
        let ban_info = self.ban_store.ban_info(address).await;

        AddressReport {
            ip: address.to_string(),
            banned: ban_info.is_some(),
            ban_info,
            activity: self.tracker.summary(address).await,
            time_pattern: self.tracker.time_pattern(address).await,
        }
    }

    pub async fn status(&self) -> EngineStatus {
        let banned_ips = self.ban_store.len().await;
        let tracked_ips = self.tracker.tracked_count().await;
        metrics::BANNED_ADDRESSES.set(banned_ips as i64);
        metrics::TRACKED_ADDRESSES.set(tracked_ips as i64);

        EngineStatus {
            status: "operational".to_string(),
            timestamp: self.clock.now(),
            statistics: EngineStatistics {
                banned_ips,
                tracked_ips,
                payloads_loaded: self.payload_detector.payload_count(),
                patterns_loaded: self.payload_detector.pattern_count(),
            },
            configuration: EngineFeatures {
                corpus_enabled: self.config.corpus.enabled,
                anomaly_detection_enabled: self.anomaly_detector.is_enabled(),
                ip_banning_enabled: self.ban_store.is_enabled(),
                activity_tracking_enabled: self.tracker.is_enabled(),
                logging_enabled: self.audit_logger.is_enabled(),
            },
        }
    }
}
