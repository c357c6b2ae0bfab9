use crate::audit::{
    audit_event::{AuditEvent, AuditEventType},
    audit_storage::{AuditStorage, FileAuditStorage, MemoryAuditStorage},
};
use crate::config::LoggingConfig;
use crate::security::{request::RequestDescriptor, verdict::Verdict};
use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Writes decision records to the main log and, depending on the decision,
/// to the accept or reject log as well.
pub struct AuditLogger {
    enabled: bool,
    main: Box<dyn AuditStorage>,
    accept: Box<dyn AuditStorage>,
    reject: Box<dyn AuditStorage>,
}

impl AuditLogger {
    pub fn new(
        main: Box<dyn AuditStorage>,
        accept: Box<dyn AuditStorage>,
        reject: Box<dyn AuditStorage>,
    ) -> Self {
        Self {
            enabled: true,
            main,
            accept,
            reject,
        }
    }

    /// File-backed logger for the configured paths. Disabled logging drops
    /// every record.
    pub fn from_config(config: &LoggingConfig) -> Result<Self> {
        if !config.enabled {
            return Ok(Self::disabled());
        }

        Ok(Self::new(
            Box::new(FileAuditStorage::new(config.log_file.clone())?),
            Box::new(FileAuditStorage::new(config.accept_log_file.clone())?),
            Box::new(FileAuditStorage::new(config.reject_log_file.clone())?),
        ))
    }

    pub fn in_memory() -> Self {
        Self::new(
            Box::new(MemoryAuditStorage::new()),
            Box::new(MemoryAuditStorage::new()),
            Box::new(MemoryAuditStorage::new()),
        )
    }

    pub fn disabled() -> Self {
        let mut logger = Self::in_memory();
        logger.enabled = false;
        logger
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Store one record. Storage failures are logged and swallowed.
    pub async fn log_event(&self, event: AuditEvent) {
        if !self.enabled {
            return;
        }

        if let Err(e) = self.main.store_event(&event).await {
            warn!(
                event_id = %event.id,
                location = %self.main.location(),
                error = %e,
                "Failed to write decision log"
            );
        }

        let secondary = if event.is_accept() {
            Some(&self.accept)
        } else if event.is_reject() {
            Some(&self.reject)
        } else {
            None
        };

        if let Some(storage) = secondary {
            if let Err(e) = storage.store_event(&event).await {
                warn!(
                    event_id = %event.id,
                    location = %storage.location(),
                    error = %e,
                    "Failed to write decision log"
                );
            }
        }

        debug!(event_id = %event.id, event_type = ?event.event_type, "Decision record stored");
    }

    /// Record the outcome of one evaluation. Anomaly signals, when present,
    /// ride along in the record's metadata.
    pub async fn log_decision(
        &self,
        verdict: &Verdict,
        request: &RequestDescriptor,
        request_count: usize,
        signals: &[String],
        timestamp: DateTime<Utc>,
    ) {
        let mut event = AuditEvent::new(AuditEventType::Decision, verdict.decision.as_str(), &verdict.reason)
            .with_ip(&verdict.ip)
            .with_timestamp(timestamp)
            .with_request(&request.url, &request.method, request.effective_user_agent())
            .with_request_count(request_count)
            .with_correlation_id(request.correlation_id);

        if let Some(attack_type) = verdict.attack_type {
            event = event.with_attack_type(attack_type.as_str());
        }
        if let Some(anomaly_type) = verdict.anomaly_type {
            event = event.with_attack_type(anomaly_type.as_str());
        }
        if let Some(payload) = &verdict.payload {
            event = event.with_payload(payload);
        }
        if let Some(score) = verdict.behavior_score {
            event = event.with_behavior_score(score);
        }
        if !signals.is_empty() {
            event = event.with_metadata("signals", serde_json::json!(signals));
        }

        self.log_event(event).await;
    }

    pub async fn log_ban(&self, ip: &str, reason: &str, permanent: bool, timestamp: DateTime<Utc>) {
        let event = AuditEvent::new(AuditEventType::IpBan, "BANNED", reason)
            .with_ip(ip)
            .with_timestamp(timestamp)
            .with_metadata("permanent", serde_json::Value::Bool(permanent));

        self.log_event(event).await;
    }

    pub async fn log_unban(&self, ip: &str, timestamp: DateTime<Utc>) {
        let event = AuditEvent::new(AuditEventType::IpUnban, "UNBANNED", "IP unbanned")
            .with_ip(ip)
            .with_timestamp(timestamp);

        self.log_event(event).await;
    }

    /// Rejection issued by the API surface itself, e.g. rate limiting.
    pub async fn log_api_rejection(&self, ip: &str, endpoint: &str, reason: &str) {
        let event = AuditEvent::new(AuditEventType::Decision, "REJECT", reason)
            .with_ip(ip)
            .with_metadata("endpoint", serde_json::Value::String(endpoint.to_string()));

        self.log_event(event).await;
    }

    pub async fn log_system(&self, message: &str) {
        self.log_event(AuditEvent::new(AuditEventType::System, "SYSTEM", message))
            .await;
    }

    /// Records for one address from the main log.
    pub async fn events_for_ip(&self, ip: &str) -> Result<Vec<AuditEvent>> {
        self.main.get_events_by_ip(ip).await
    }

    pub async fn events_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<AuditEvent>> {
        self.main.get_events_by_timerange(start, end).await
    }

    pub async fn accepted_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<AuditEvent>> {
        self.accept.get_events_by_timerange(start, end).await
    }

    pub async fn rejected_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<AuditEvent>> {
        self.reject.get_events_by_timerange(start, end).await
    }
}
