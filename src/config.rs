//! Service configuration: JSON file plus environment overrides.
//!
//! Every option can be overridden by the environment variable named after
//! the upper-snake-case of its field (`postgres_host` -> `POSTGRES_HOST`),
//! which is how deployments inject credentials without touching the file.

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Initial consumer position on the change-feed topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerOffset {
    Earliest,
    Latest,
}

impl FromStr for ConsumerOffset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            other => Err(format!("expected earliest or latest, got {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_port: u16,

    pub broker_url: String,
    pub topic_table_updates: String,
    pub topic_permission_updates: String,
    pub consumer_group_id: String,
    pub consumer_offset: ConsumerOffset,

    pub postgres_host: String,
    pub postgres_port: u16,
    pub postgres_user: String,
    pub postgres_pw: String,
    pub postgres_db: String,
    pub postgres_rule_schema: String,
    pub postgres_rule_table: String,
    pub postgres_lock_key: i64,

    pub permissions_url: String,
    pub identity_url: String,
    pub identity_client_id: String,
    pub identity_client_secret: String,
    pub device_registry_url: String,

    pub device_id_prefix: String,
    pub service_id_prefix: String,

    pub apply_rules_at_startup: bool,
    pub timeout: String,
    pub template_dir: String,
    pub debug: bool,
    pub slow_mux_lock: String,
    pub default_timezone: String,

    // The legacy list handler defaulted both limit and offset to 50; the
    // offset default here is 0 and the knob keeps the old behavior
    // reachable for deployments that depended on it.
    pub default_list_limit: i64,
    pub default_list_offset: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_port: 8080,
            broker_url: String::new(),
            topic_table_updates: String::new(),
            topic_permission_updates: String::new(),
            consumer_group_id: String::new(),
            consumer_offset: ConsumerOffset::Latest,
            postgres_host: "localhost".to_string(),
            postgres_port: 5432,
            postgres_user: String::new(),
            postgres_pw: String::new(),
            postgres_db: String::new(),
            postgres_rule_schema: "rules".to_string(),
            postgres_rule_table: "rules".to_string(),
            postgres_lock_key: 0,
            permissions_url: String::new(),
            identity_url: String::new(),
            identity_client_id: String::new(),
            identity_client_secret: String::new(),
            device_registry_url: String::new(),
            device_id_prefix: String::new(),
            service_id_prefix: String::new(),
            apply_rules_at_startup: false,
            timeout: "30s".to_string(),
            template_dir: String::new(),
            debug: false,
            slow_mux_lock: String::new(),
            default_timezone: "UTC".to_string(),
            default_list_limit: 50,
            default_list_offset: 0,
        }
    }
}

impl Config {
    /// Load the configuration file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path)?;
        let mut config: Config = serde_json::from_slice(&raw)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Statement deadline for rule-store transactions.
    pub fn statement_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.timeout).map_err(|message| ConfigError::invalid("timeout", message))
    }

    /// Diagnostic delay inserted before the process mutex, if configured.
    pub fn slow_mux_lock(&self) -> Result<Option<Duration>, ConfigError> {
        if self.slow_mux_lock.is_empty() {
            return Ok(None);
        }
        parse_duration(&self.slow_mux_lock)
            .map(Some)
            .map_err(|message| ConfigError::invalid("slow_mux_lock", message))
    }

    /// Apply `NAME=value` overrides from `get`, keyed by the upper
    /// snake-case of each field name.
    pub fn apply_env(
        &mut self,
        get: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        override_string(&mut self.broker_url, "BROKER_URL", &get);
        override_string(&mut self.topic_table_updates, "TOPIC_TABLE_UPDATES", &get);
        override_string(
            &mut self.topic_permission_updates,
            "TOPIC_PERMISSION_UPDATES",
            &get,
        );
        override_string(&mut self.consumer_group_id, "CONSUMER_GROUP_ID", &get);
        override_string(&mut self.postgres_host, "POSTGRES_HOST", &get);
        override_string(&mut self.postgres_user, "POSTGRES_USER", &get);
        override_string(&mut self.postgres_pw, "POSTGRES_PW", &get);
        override_string(&mut self.postgres_db, "POSTGRES_DB", &get);
        override_string(&mut self.postgres_rule_schema, "POSTGRES_RULE_SCHEMA", &get);
        override_string(&mut self.postgres_rule_table, "POSTGRES_RULE_TABLE", &get);
        override_string(&mut self.permissions_url, "PERMISSIONS_URL", &get);
        override_string(&mut self.identity_url, "IDENTITY_URL", &get);
        override_string(&mut self.identity_client_id, "IDENTITY_CLIENT_ID", &get);
        override_string(
            &mut self.identity_client_secret,
            "IDENTITY_CLIENT_SECRET",
            &get,
        );
        override_string(&mut self.device_registry_url, "DEVICE_REGISTRY_URL", &get);
        override_string(&mut self.device_id_prefix, "DEVICE_ID_PREFIX", &get);
        override_string(&mut self.service_id_prefix, "SERVICE_ID_PREFIX", &get);
        override_string(&mut self.timeout, "TIMEOUT", &get);
        override_string(&mut self.template_dir, "TEMPLATE_DIR", &get);
        override_string(&mut self.slow_mux_lock, "SLOW_MUX_LOCK", &get);
        override_string(&mut self.default_timezone, "DEFAULT_TIMEZONE", &get);

        override_parsed(&mut self.api_port, "API_PORT", &get)?;
        override_parsed(&mut self.postgres_port, "POSTGRES_PORT", &get)?;
        override_parsed(&mut self.postgres_lock_key, "POSTGRES_LOCK_KEY", &get)?;
        override_parsed(&mut self.consumer_offset, "CONSUMER_OFFSET", &get)?;
        override_parsed(&mut self.default_list_limit, "DEFAULT_LIST_LIMIT", &get)?;
        override_parsed(&mut self.default_list_offset, "DEFAULT_LIST_OFFSET", &get)?;

        override_bool(&mut self.apply_rules_at_startup, "APPLY_RULES_AT_STARTUP", &get)?;
        override_bool(&mut self.debug, "DEBUG", &get)?;
        Ok(())
    }
}

fn override_string(field: &mut String, name: &str, get: &impl Fn(&str) -> Option<String>) {
    if let Some(value) = get(name) {
        if !is_secret(name) {
            info!(variable = name, "using environment override");
        }
        *field = value;
    }
}

fn override_parsed<T>(
    field: &mut T,
    name: &str,
    get: &impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(value) = get(name) {
        info!(variable = name, "using environment override");
        *field = value
            .parse()
            .map_err(|err: T::Err| ConfigError::invalid(name, err.to_string()))?;
    }
    Ok(())
}

fn override_bool(
    field: &mut bool,
    name: &str,
    get: &impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(value) = get(name) {
        info!(variable = name, "using environment override");
        *field = match value.to_ascii_lowercase().as_str() {
            "1" | "true" => true,
            "0" | "false" => false,
            other => {
                return Err(ConfigError::invalid(
                    name,
                    format!("expected a boolean, got {other:?}"),
                ))
            }
        };
    }
    Ok(())
}

fn is_secret(name: &str) -> bool {
    matches!(
        name,
        "POSTGRES_USER" | "POSTGRES_PW" | "IDENTITY_CLIENT_SECRET"
    )
}

/// Parse durations of the form `250ms`, `30s`, `5m`, `2h`.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("missing unit in duration {text:?}"))?;
    let (digits, unit) = text.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {text:?}"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(format!("unknown duration unit {other:?}")),
    }
}
