use super::GateWatchConfig;
use anyhow::{Context, Result};
use validator::Validate;

/// Configuration validator: derive-based range checks followed by cross-field rules.
pub struct ConfigValidator {
    validators: Vec<Box<dyn CustomValidator>>,
}

impl ConfigValidator {
    pub fn new() -> Self {
        Self {
            validators: vec![
                Box::new(DetectionValidator),
                Box::new(BanningValidator),
                Box::new(LoggingValidator),
            ],
        }
    }

    pub fn validate(&self, config: &GateWatchConfig) -> Result<()> {
        config.validate().context("Configuration validation failed")?;

        for validator in &self.validators {
            validator
                .validate(config)
                .with_context(|| format!("{} validation failed", validator.name()))?;
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Custom validator trait
pub trait CustomValidator: Send + Sync {
    fn validate(&self, config: &GateWatchConfig) -> Result<()>;
    fn name(&self) -> &str;
}

pub struct DetectionValidator;

impl CustomValidator for DetectionValidator {
    fn validate(&self, config: &GateWatchConfig) -> Result<()> {
        let anomaly = &config.anomaly_detection;
        let tracking = &config.activity_tracking;

        // The rate window is a sub-window of what the tracker retains
        if anomaly.enabled && anomaly.request_rate_window_seconds > tracking.track_window_seconds {
            return Err(anyhow::anyhow!(
                "request_rate_window_seconds ({}) cannot exceed track_window_seconds ({})",
                anomaly.request_rate_window_seconds,
                tracking.track_window_seconds
            ));
        }

        if anomaly.enabled && !tracking.enabled {
            tracing::warn!("Anomaly detection is enabled but activity tracking is off; behavioral signals will stay at zero");
        }

        if tracking.max_requests_per_ip < anomaly.request_rate_threshold {
            tracing::warn!(
                max_requests_per_ip = tracking.max_requests_per_ip,
                request_rate_threshold = anomaly.request_rate_threshold,
                "Retained request cap is below the rate threshold; rate excess can never fire"
            );
        }

        if config.corpus.enabled && config.corpus.path.trim().is_empty() {
            return Err(anyhow::anyhow!("corpus.path must be set when the corpus is enabled"));
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "detection"
    }
}

pub struct BanningValidator;

impl CustomValidator for BanningValidator {
    fn validate(&self, config: &GateWatchConfig) -> Result<()> {
        let banning = &config.ip_banning;

        if banning.enabled && banning.ban_file.trim().is_empty() {
            return Err(anyhow::anyhow!("ip_banning.ban_file must be set when banning is enabled"));
        }

        if !banning.enabled && (banning.auto_ban_on_payload || banning.auto_ban_on_anomaly) {
            tracing::warn!("Auto-ban flags are set but ip_banning is disabled; detections will only reject");
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "banning"
    }
}

pub struct LoggingValidator;

impl CustomValidator for LoggingValidator {
    fn validate(&self, config: &GateWatchConfig) -> Result<()> {
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&config.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid logging format: {}. Valid options: {:?}",
                config.logging.format,
                valid_formats
            ));
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}
