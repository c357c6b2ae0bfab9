use crate::clock::Clock;
use crate::config::ActivityTrackingConfig;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

const SUMMARY_ENDPOINT_LIMIT: usize = 20;
const SUMMARY_USER_AGENT_LIMIT: usize = 10;
const SUMMARY_RECENT_LIMIT: usize = 10;
const BURST_MIN_RETAINED: usize = 10;
const BURST_MIN_RECENT: usize = 20;
const BURST_WINDOW_SECONDS: i64 = 10;

#[derive(Debug, Clone)]
struct RequestEntry {
    timestamp: DateTime<Utc>,
    endpoint: String,
    method: String,
}

#[derive(Debug)]
struct ActivityRecord {
    requests: VecDeque<RequestEntry>,
    endpoints: BTreeSet<String>,
    user_agents: BTreeSet<String>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    total_requests: u64,
}

impl ActivityRecord {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            requests: VecDeque::new(),
            endpoints: BTreeSet::new(),
            user_agents: BTreeSet::new(),
            first_seen: now,
            last_seen: now,
            total_requests: 0,
        }
    }

    fn purge(&mut self, cutoff: DateTime<Utc>) {
        while let Some(front) = self.requests.front() {
            if front.timestamp >= cutoff {
                break;
            }
            self.requests.pop_front();
        }
    }

    fn count_since(&self, cutoff: DateTime<Utc>) -> usize {
        self.requests.iter().filter(|entry| entry.timestamp >= cutoff).count()
    }
}

/// Request rate shape over the retained window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimePattern {
    pub requests_per_minute: f64,
    pub requests_per_hour: f64,
    pub burst_detected: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub request_count: usize,
    pub endpoint_diversity: usize,
    pub user_agent_diversity: usize,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub endpoints: Vec<String>,
    pub user_agents: Vec<String>,
    /// Retained requests per HTTP method.
    pub methods: BTreeMap<String, usize>,
    /// Most recent retained `METHOD endpoint` pairs, newest first.
    pub recent_requests: Vec<String>,
}

/// Per-address sliding-window history of requests.
///
/// The outer map lock is only held to find or insert a record; each record
/// has its own lock so different addresses progress independently.
pub struct ActivityTracker {
    enabled: bool,
    window: Duration,
    max_requests: usize,
    clock: Arc<dyn Clock>,
    records: RwLock<HashMap<String, Arc<Mutex<ActivityRecord>>>>,
}

impl ActivityTracker {
    pub fn new(config: &ActivityTrackingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled: config.enabled,
            window: Duration::seconds(config.track_window_seconds as i64),
            max_requests: config.max_requests_per_ip,
            clock,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn record_for(&self, address: &str) -> Option<Arc<Mutex<ActivityRecord>>> {
        self.records.read().await.get(address).cloned()
    }

    async fn record_or_insert(&self, address: &str, now: DateTime<Utc>) -> Arc<Mutex<ActivityRecord>> {
        if let Some(record) = self.record_for(address).await {
            return record;
        }

        let mut records = self.records.write().await;
        records
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ActivityRecord::new(now))))
            .clone()
    }

    pub async fn record(&self, address: &str, endpoint: &str, method: &str, user_agent: &str) {
        if !self.enabled {
            return;
        }

        let now = self.clock.now();
        let record = self.record_or_insert(address, now).await;
        let mut record = record.lock().await;

        record.requests.push_back(RequestEntry {
            timestamp: now,
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        });
        record.endpoints.insert(endpoint.to_string());
        if !user_agent.is_empty() {
            record.user_agents.insert(user_agent.to_string());
        }
        record.last_seen = now;
        record.total_requests += 1;

        record.purge(now - self.window);
        while record.requests.len() > self.max_requests {
            record.requests.pop_front();
        }

        debug!(
            ip = address,
            endpoint = endpoint,
            retained = record.requests.len(),
            "Recorded activity"
        );
    }

    /// Requests inside `window_seconds` (default: the tracking window).
    pub async fn request_count(&self, address: &str, window_seconds: Option<u64>) -> usize {
        let Some(record) = self.record_for(address).await else {
            return 0;
        };

        let now = self.clock.now();
        let mut record = record.lock().await;
        record.purge(now - self.window);

        match window_seconds {
            Some(seconds) => record.count_since(now - Duration::seconds(seconds as i64)),
            None => record.requests.len(),
        }
    }

    pub async fn endpoint_diversity(&self, address: &str) -> usize {
        let Some(record) = self.record_for(address).await else {
            return 0;
        };
        let record = record.lock().await;
        record.endpoints.len()
    }

    pub async fn user_agent_diversity(&self, address: &str) -> usize {
        let Some(record) = self.record_for(address).await else {
            return 0;
        };
        let record = record.lock().await;
        record.user_agents.len()
    }

    pub async fn time_pattern(&self, address: &str) -> TimePattern {
        let Some(record) = self.record_for(address).await else {
            return TimePattern::default();
        };

        let now = self.clock.now();
        let mut record = record.lock().await;
        record.purge(now - self.window);

        let Some(oldest) = record.requests.front() else {
            return TimePattern::default();
        };

        let count = record.requests.len() as f64;
        let span_seconds = (now - oldest.timestamp).num_milliseconds() as f64 / 1000.0;
        let requests_per_minute = if span_seconds > 0.0 {
            count / span_seconds * 60.0
        } else {
            count
        };

        let recent = record.count_since(now - Duration::seconds(BURST_WINDOW_SECONDS));
        let burst_detected = record.requests.len() >= BURST_MIN_RETAINED && recent >= BURST_MIN_RECENT;

        TimePattern {
            requests_per_minute: round2(requests_per_minute),
            requests_per_hour: round2(requests_per_minute * 60.0),
            burst_detected,
        }
    }

    pub async fn summary(&self, address: &str) -> ActivitySummary {
        let Some(record) = self.record_for(address).await else {
            return ActivitySummary::default();
        };

        let now = self.clock.now();
        let mut record = record.lock().await;
        record.purge(now - self.window);

        ActivitySummary {
            request_count: record.requests.len(),
            endpoint_diversity: record.endpoints.len(),
            user_agent_diversity: record.user_agents.len(),
            first_seen: Some(record.first_seen),
            last_seen: Some(record.last_seen),
            total_requests: record.total_requests,
            endpoints: record.endpoints.iter().take(SUMMARY_ENDPOINT_LIMIT).cloned().collect(),
            user_agents: record.user_agents.iter().take(SUMMARY_USER_AGENT_LIMIT).cloned().collect(),
            methods: record.requests.iter().fold(BTreeMap::new(), |mut counts, entry| {
                *counts.entry(entry.method.clone()).or_insert(0) += 1;
                counts
            }),
            recent_requests: record
                .requests
                .iter()
                .rev()
                .take(SUMMARY_RECENT_LIMIT)
                .map(|entry| format!("{} {}", entry.method, entry.endpoint))
                .collect(),
        }
    }

    /// Forget everything about an address.
    pub async fn clear(&self, address: &str) -> bool {
        self.records.write().await.remove(address).is_some()
    }

    pub async fn tracked_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.records.read().await.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub async fn tracked_count(&self) -> usize {
        self.records.read().await.len()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
