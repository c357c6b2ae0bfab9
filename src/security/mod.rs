pub mod activity_tracker;
pub mod anomaly_detector;
pub mod api;
pub mod ban_store;
pub mod decision_engine;
pub mod middleware;
pub mod payload_detector;
pub mod request;
pub mod rules;
pub mod verdict;

pub use activity_tracker::{ActivitySummary, ActivityTracker, TimePattern};
pub use anomaly_detector::{AnomalyAssessment, AnomalyDetector};
pub use ban_store::{BanInfo, BanStore};
pub use decision_engine::{AddressReport, DecisionEngine, EngineStatus};
pub use payload_detector::{Detection, PayloadDetector};
pub use request::RequestDescriptor;
pub use verdict::{AnomalyType, AttackType, Decision, Verdict};

use crate::audit::AuditLogger;
use crate::clock::SystemClock;
use crate::config::GateWatchConfig;
use anyhow::Result;
use std::sync::Arc;

/// Initialize the decision engine with the wall clock.
pub async fn initialize_security_engine(
    config: GateWatchConfig,
    audit_logger: Arc<AuditLogger>,
) -> Result<Arc<DecisionEngine>> {
    let engine = DecisionEngine::new(config, Arc::new(SystemClock), audit_logger).await?;
    let status = engine.status().await;

    tracing::info!(
        banned_ips = status.statistics.banned_ips,
        payloads_loaded = status.statistics.payloads_loaded,
        patterns_loaded = status.statistics.patterns_loaded,
        anomaly_detection = status.configuration.anomaly_detection_enabled,
        ip_banning = status.configuration.ip_banning_enabled,
        "Decision engine initialized"
    );

    Ok(Arc::new(engine))
}
