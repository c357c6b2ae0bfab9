use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::security::DecisionEngine;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: ServiceStatus,
    pub last_check: DateTime<Utc>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub uptime_seconds: u64,
    pub banned_addresses: usize,
    pub tracked_addresses: usize,
    pub payloads_loaded: usize,
    pub patterns_loaded: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: ServiceStatus,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub components: BTreeMap<String, ComponentHealth>,
    pub metrics: HealthMetrics,
    pub startup_time: DateTime<Utc>,
}

pub struct HealthCheckManager {
    engine: Arc<DecisionEngine>,
    startup_time: Instant,
    startup_timestamp: DateTime<Utc>,
}

impl HealthCheckManager {
    pub fn new(engine: Arc<DecisionEngine>) -> Self {
        Self {
            engine,
            startup_time: Instant::now(),
            startup_timestamp: Utc::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.startup_time.elapsed().as_secs()
    }

    /// Full component report.
    pub async fn check_health(&self) -> HealthStatus {
        let mut components = BTreeMap::new();

        for component in [self.check_corpus(), self.check_ban_file().await] {
            components.insert(component.name.clone(), component);
        }

        let status = components
            .values()
            .map(|component| component.status.clone())
            .fold(ServiceStatus::Healthy, worst);

        let engine_status = self.engine.status().await;
        let health_status = HealthStatus {
            status,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            components,
            metrics: HealthMetrics {
                uptime_seconds: self.uptime_seconds(),
                banned_addresses: engine_status.statistics.banned_ips,
                tracked_addresses: engine_status.statistics.tracked_ips,
                payloads_loaded: engine_status.statistics.payloads_loaded,
                patterns_loaded: engine_status.statistics.patterns_loaded,
            },
            startup_time: self.startup_timestamp,
        };

        tracing::debug!(status = ?health_status.status, "Health check completed");
        health_status
    }

    fn check_corpus(&self) -> ComponentHealth {
        let detector = self.engine.payload_detector();
        let corpus = &self.engine.config().corpus;

        let (status, message) = if !corpus.enabled {
            (ServiceStatus::Healthy, Some("corpus disabled; detection rules only".to_string()))
        } else if !detector.corpus_available() {
            (
                ServiceStatus::Degraded,
                Some(format!("corpus not found at {}", corpus.path)),
            )
        } else {
            (
                ServiceStatus::Healthy,
                Some(format!(
                    "{} payloads from {} files",
                    detector.payload_count(),
                    detector.files_loaded()
                )),
            )
        };

        ComponentHealth {
            name: "corpus".to_string(),
            status,
            last_check: Utc::now(),
            message,
        }
    }

    async fn check_ban_file(&self) -> ComponentHealth {
        let ban_store = self.engine.ban_store();

        let (status, message) = if !ban_store.is_enabled() {
            (ServiceStatus::Healthy, Some("ip banning disabled".to_string()))
        } else {
            match timeout(Duration::from_secs(2), ban_store.is_writable()).await {
                Ok(true) => (ServiceStatus::Healthy, None),
                Ok(false) => (
                    ServiceStatus::Degraded,
                    Some(format!(
                        "ban file {} is not writable; bans are kept in memory",
                        ban_store.ban_file().display()
                    )),
                ),
                Err(_) => (
                    ServiceStatus::Degraded,
                    Some("ban file check timed out".to_string()),
                ),
            }
        };

        ComponentHealth {
            name: "ban_file".to_string(),
            status,
            last_check: Utc::now(),
            message,
        }
    }

    /// Check if the service is ready to accept traffic.
    pub async fn is_ready(&self) -> bool {
        self.check_health().await.status != ServiceStatus::Unhealthy
    }
}

fn worst(current: ServiceStatus, next: ServiceStatus) -> ServiceStatus {
    match (current, next) {
        (ServiceStatus::Unhealthy, _) | (_, ServiceStatus::Unhealthy) => ServiceStatus::Unhealthy,
        (ServiceStatus::Degraded, _) | (_, ServiceStatus::Degraded) => ServiceStatus::Degraded,
        _ => ServiceStatus::Healthy,
    }
}
