use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

pub mod sources;
pub mod validation;

use sources::*;
use validation::ConfigValidator;

/// Loads the typed configuration once at startup from layered sources.
pub struct ConfigManager {
    sources: Vec<Box<dyn ConfigSource>>,
    validator: ConfigValidator,
    merged: ConfigMap,
    current_config: GateWatchConfig,
}

impl ConfigManager {
    pub async fn new() -> Result<Self> {
        let config_path =
            std::env::var("GATEWATCH_CONFIG").unwrap_or_else(|_| "gatewatch.toml".to_string());

        let sources: Vec<Box<dyn ConfigSource>> = vec![
            Box::new(FileConfigSource::new(config_path)?),
            Box::new(EnvConfigSource::new()),
        ];

        Self::with_sources(sources).await
    }

    pub async fn with_sources(sources: Vec<Box<dyn ConfigSource>>) -> Result<Self> {
        let validator = ConfigValidator::new();
        let merged = Self::load_merged_map(&sources).await;
        let config = GateWatchConfig::from_overrides(merged.clone())?;
        validator.validate(&config)?;

        Ok(Self {
            sources,
            validator,
            merged,
            current_config: config,
        })
    }

    pub fn config(&self) -> &GateWatchConfig {
        &self.current_config
    }

    pub fn into_config(self) -> GateWatchConfig {
        self.current_config
    }

    /// Dotted-key lookup over the effective configuration, e.g. `ip_banning.ban_file`.
    pub fn get(&self, key_path: &str) -> Option<serde_json::Value> {
        let mut value = serde_json::to_value(&self.current_config).ok()?;
        for part in key_path.split('.') {
            value = value.get(part)?.clone();
        }
        Some(value)
    }

    /// Keys explicitly provided by a source, as opposed to defaults.
    pub fn overridden_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.merged.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn reload(&mut self) -> Result<()> {
        tracing::info!("Reloading configuration from all sources");

        let merged = Self::load_merged_map(&self.sources).await;
        let config = GateWatchConfig::from_overrides(merged.clone())?;
        self.validator.validate(&config)?;

        self.merged = merged;
        self.current_config = config;
        tracing::info!("Configuration reloaded successfully");
        Ok(())
    }

    async fn load_merged_map(sources: &[Box<dyn ConfigSource>]) -> ConfigMap {
        let mut merged_config = ConfigMap::new();

        // Later sources override earlier ones
        for source in sources {
            match source.load_config().await {
                Ok(config) => {
                    tracing::debug!(source = source.name(), keys = config.len(), "Loaded configuration source");
                    merged_config.merge(config);
                }
                Err(e) => {
                    tracing::warn!(source = source.name(), error = %e, "Failed to load configuration source, using defaults");
                }
            }
        }

        merged_config
    }
}

/// Configuration source trait
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load_config(&self) -> Result<ConfigMap>;
    fn name(&self) -> &str;
}

/// Flattened `section.key -> value` map produced by every source.
pub type ConfigMap = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GateWatchConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub corpus: CorpusConfig,
    pub detection: DetectionConfig,
    #[validate(nested)]
    pub anomaly_detection: AnomalyDetectionConfig,
    #[validate(nested)]
    pub ip_banning: IpBanningConfig,
    #[validate(nested)]
    pub logging: LoggingConfig,
    #[validate(nested)]
    pub activity_tracking: ActivityTrackingConfig,
    #[validate(nested)]
    pub api_security: ApiSecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    /// Bearer key required on admin routes; admin routes are open when unset.
    pub admin_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CorpusConfig {
    #[validate(length(min = 1))]
    pub path: String,
    pub enabled: bool,
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub sql_injection: bool,
    pub xss: bool,
    pub command_injection: bool,
    pub path_traversal: bool,
    pub lfi_rfi: bool,
    pub ssrf: bool,
    pub web_fuzzing: bool,
    pub brute_force: bool,
    pub enumeration: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AnomalyDetectionConfig {
    pub enabled: bool,
    #[validate(range(min = 1))]
    pub request_rate_threshold: usize,
    #[validate(range(min = 1, max = 2_592_000))]
    pub request_rate_window_seconds: u64,
    #[validate(range(min = 1))]
    pub endpoint_diversity_threshold: usize,
    #[validate(range(min = 0.0))]
    pub suspicious_user_agent_score: f64,
    #[validate(range(min = 1.0))]
    pub behavior_score_threshold: f64,
    pub auto_ban_on_anomaly: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct IpBanningConfig {
    pub enabled: bool,
    #[validate(length(min = 1))]
    pub ban_file: String,
    pub auto_ban_on_payload: bool,
    pub auto_ban_on_anomaly: bool,
    /// Capped at ten years.
    #[validate(range(min = 1, max = 315_360_000))]
    pub ban_duration_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    #[validate(length(min = 1))]
    pub log_file: String,
    #[validate(length(min = 1))]
    pub accept_log_file: String,
    #[validate(length(min = 1))]
    pub reject_log_file: String,
    #[validate(length(min = 1))]
    pub log_level: String,
    #[validate(length(min = 1))]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ActivityTrackingConfig {
    pub enabled: bool,
    /// Capped at thirty days.
    #[validate(range(min = 1, max = 2_592_000))]
    pub track_window_seconds: u64,
    #[validate(range(min = 1))]
    pub max_requests_per_ip: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ApiSecurityConfig {
    #[validate(range(min = 1))]
    pub rate_limit_per_minute: usize,
    #[validate(range(min = 1, max = 1024))]
    pub max_request_size_mb: usize,
    pub enable_rate_limiting: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            admin_api_key: None,
        }
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: "./seclists".to_string(),
            enabled: true,
            case_sensitive: false,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            sql_injection: true,
            xss: true,
            command_injection: true,
            path_traversal: true,
            lfi_rfi: true,
            ssrf: true,
            web_fuzzing: true,
            brute_force: true,
            enumeration: true,
        }
    }
}

impl Default for AnomalyDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            request_rate_threshold: 100,
            request_rate_window_seconds: 60,
            endpoint_diversity_threshold: 20,
            suspicious_user_agent_score: 5.0,
            behavior_score_threshold: 50.0,
            auto_ban_on_anomaly: true,
        }
    }
}

impl Default for IpBanningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ban_file: "./banned_ips.txt".to_string(),
            auto_ban_on_payload: true,
            auto_ban_on_anomaly: true,
            ban_duration_seconds: 86_400,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_file: "./log.txt".to_string(),
            accept_log_file: "./accept_log.txt".to_string(),
            reject_log_file: "./reject_log.txt".to_string(),
            log_level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Default for ActivityTrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            track_window_seconds: 300,
            max_requests_per_ip: 1000,
        }
    }
}

impl Default for ApiSecurityConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 60,
            max_request_size_mb: 10,
            enable_rate_limiting: true,
        }
    }
}

impl GateWatchConfig {
    /// Layers flattened overrides on top of the defaults.
    pub fn from_overrides(overrides: ConfigMap) -> Result<Self> {
        let mut base = serde_json::to_value(Self::default())
            .context("Failed to serialize default configuration")?;
        let nested = Self::unflatten_config(overrides);
        merge_json(&mut base, nested);

        serde_json::from_value(base).context("Failed to deserialize configuration")
    }

    fn unflatten_config(config_map: ConfigMap) -> serde_json::Value {
        let mut nested = serde_json::Map::new();

        for (key, value) in config_map {
            let parts: Vec<&str> = key.split('.').collect();
            Self::insert_nested(&mut nested, &parts, value);
        }

        serde_json::Value::Object(nested)
    }

    fn insert_nested(map: &mut serde_json::Map<String, serde_json::Value>, parts: &[&str], value: serde_json::Value) {
        if parts.is_empty() {
            return;
        }

        if parts.len() == 1 {
            map.insert(parts[0].to_string(), value);
            return;
        }

        let entry = map
            .entry(parts[0].to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));

        if let serde_json::Value::Object(ref mut obj) = entry {
            Self::insert_nested(obj, &parts[1..], value);
        }
    }
}

fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

trait ConfigMapExt {
    fn merge(&mut self, other: ConfigMap);
}

impl ConfigMapExt for ConfigMap {
    fn merge(&mut self, other: ConfigMap) {
        for (key, value) in other {
            self.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StaticSource(ConfigMap);

    #[async_trait]
    impl ConfigSource for StaticSource {
        async fn load_config(&self) -> Result<ConfigMap> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    struct FailingSource;

    #[async_trait]
    impl ConfigSource for FailingSource {
        async fn load_config(&self) -> Result<ConfigMap> {
            Err(anyhow::anyhow!("unreadable"))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn test_defaults_match_reference_values() {
        let config = GateWatchConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.anomaly_detection.behavior_score_threshold, 50.0);
        assert_eq!(config.ip_banning.ban_duration_seconds, 86_400);
        assert_eq!(config.activity_tracking.track_window_seconds, 300);
        assert!(config.detection.sql_injection);
    }

    #[test]
    fn test_dotted_overrides_are_nested() {
        let mut overrides = ConfigMap::new();
        overrides.insert("ip_banning.ban_duration_seconds".to_string(), json!(60));
        overrides.insert("detection.xss".to_string(), json!(false));

        let config = GateWatchConfig::from_overrides(overrides).unwrap();

        assert_eq!(config.ip_banning.ban_duration_seconds, 60);
        assert!(!config.detection.xss);
        // untouched siblings keep their defaults
        assert!(config.ip_banning.auto_ban_on_payload);
        assert!(config.detection.sql_injection);
    }

    #[tokio::test]
    async fn test_later_sources_win_and_failures_degrade() {
        let mut first = ConfigMap::new();
        first.insert("server.port".to_string(), json!(9000));
        let mut second = ConfigMap::new();
        second.insert("server.port".to_string(), json!(9100));

        let manager = ConfigManager::with_sources(vec![
            Box::new(StaticSource(first)),
            Box::new(FailingSource),
            Box::new(StaticSource(second)),
        ])
        .await
        .unwrap();

        assert_eq!(manager.config().server.port, 9100);
        assert_eq!(manager.get("server.port"), Some(json!(9100)));
        assert_eq!(manager.get("corpus.case_sensitive"), Some(json!(false)));
        assert_eq!(manager.get("nope.missing"), None);
        assert_eq!(manager.overridden_keys(), vec!["server.port".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_configuration_is_rejected() {
        let mut overrides = ConfigMap::new();
        overrides.insert("activity_tracking.track_window_seconds".to_string(), json!(0));

        let result = ConfigManager::with_sources(vec![Box::new(StaticSource(overrides))]).await;
        assert!(result.is_err());
    }
}
