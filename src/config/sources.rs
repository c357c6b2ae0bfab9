use super::{ConfigMap, ConfigSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::env;
use std::path::Path;
use tokio::fs;

/// Environment variable configuration source.
///
/// `GATEWATCH_IP_BANNING__BAN_DURATION_SECONDS=600` maps to
/// `ip_banning.ban_duration_seconds`; `__` separates sections because single
/// underscores appear inside key names.
pub struct EnvConfigSource {
    prefix: String,
}

impl EnvConfigSource {
    pub fn new() -> Self {
        Self {
            prefix: "GATEWATCH_".to_string(),
        }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn collect<I>(&self, vars: I) -> ConfigMap
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = ConfigMap::new();

        for (key, value) in vars {
            let Some(stripped) = key.strip_prefix(&self.prefix) else {
                continue;
            };
            // GATEWATCH_CONFIG names the file source, it is not a setting
            if stripped == "CONFIG" || stripped.is_empty() {
                continue;
            }

            let config_key = stripped.to_lowercase().replace("__", ".");

            // Try to parse as JSON first, then fall back to string
            let parsed_value = serde_json::from_str(&value)
                .unwrap_or_else(|_| serde_json::Value::String(value));

            config.insert(config_key, parsed_value);
        }

        config
    }
}

impl Default for EnvConfigSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigSource for EnvConfigSource {
    async fn load_config(&self) -> Result<ConfigMap> {
        let mut config = self.collect(env::vars());

        // Also honour the conventional variables
        if let Ok(port) = env::var("PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.insert("server.port".to_string(), serde_json::Value::from(port));
            }
        }

        if let Ok(admin_key) = env::var("ADMIN_API_KEY") {
            config.insert("server.admin_api_key".to_string(), serde_json::Value::String(admin_key));
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            config.insert("logging.log_level".to_string(), serde_json::Value::String(log_level));
        }

        tracing::debug!("Loaded {} configuration values from environment", config.len());
        Ok(config)
    }

    fn name(&self) -> &str {
        "environment"
    }
}

/// File-based configuration source (TOML, YAML or JSON by extension).
pub struct FileConfigSource {
    file_path: String,
}

impl FileConfigSource {
    pub fn new(file_path: impl Into<String>) -> Result<Self> {
        let file_path = file_path.into();
        Ok(Self { file_path })
    }

    fn parse(&self, content: &str) -> Result<ConfigMap> {
        let config = if self.file_path.ends_with(".toml") {
            let toml_value: toml::Value = toml::from_str(content)
                .with_context(|| format!("Failed to parse TOML config: {}", self.file_path))?;
            flatten_toml_value("", &toml_value)
        } else if self.file_path.ends_with(".yaml") || self.file_path.ends_with(".yml") {
            let yaml_value: serde_yaml::Value = serde_yaml::from_str(content)
                .with_context(|| format!("Failed to parse YAML config: {}", self.file_path))?;
            flatten_yaml_value("", &yaml_value)
        } else if self.file_path.ends_with(".json") {
            let json_value: serde_json::Value = serde_json::from_str(content)
                .with_context(|| format!("Failed to parse JSON config: {}", self.file_path))?;
            flatten_json_value("", &json_value)
        } else {
            return Err(anyhow::anyhow!("Unsupported config file format: {}", self.file_path));
        };

        Ok(config)
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn load_config(&self) -> Result<ConfigMap> {
        if !Path::new(&self.file_path).exists() {
            tracing::debug!("Configuration file {} does not exist", self.file_path);
            return Ok(ConfigMap::new());
        }

        let content = fs::read_to_string(&self.file_path)
            .await
            .with_context(|| format!("Failed to read config file: {}", self.file_path))?;

        let config = self.parse(&content)?;

        tracing::debug!("Loaded {} configuration values from file: {}", config.len(), self.file_path);
        Ok(config)
    }

    fn name(&self) -> &str {
        "file"
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn flatten_toml_value(prefix: &str, value: &toml::Value) -> ConfigMap {
    let mut config = ConfigMap::new();

    match value {
        toml::Value::Table(table) => {
            for (key, val) in table {
                config.extend(flatten_toml_value(&join_key(prefix, key), val));
            }
        }
        _ => {
            let json_value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
            config.insert(prefix.to_string(), json_value);
        }
    }

    config
}

fn flatten_yaml_value(prefix: &str, value: &serde_yaml::Value) -> ConfigMap {
    let mut config = ConfigMap::new();

    match value {
        serde_yaml::Value::Mapping(mapping) => {
            for (key, val) in mapping {
                if let Some(key_str) = key.as_str() {
                    config.extend(flatten_yaml_value(&join_key(prefix, key_str), val));
                }
            }
        }
        _ => {
            let json_value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
            config.insert(prefix.to_string(), json_value);
        }
    }

    config
}

fn flatten_json_value(prefix: &str, value: &serde_json::Value) -> ConfigMap {
    let mut config = ConfigMap::new();

    match value {
        serde_json::Value::Object(object) => {
            for (key, val) in object {
                config.extend(flatten_json_value(&join_key(prefix, key), val));
            }
        }
        _ => {
            config.insert(prefix.to_string(), value.clone());
        }
    }

    config
}
