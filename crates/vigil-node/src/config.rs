//! Node configuration.
//!
//! Configuration for the vigil alerting node, including:
//! - Tenants and their display names
//! - Rules to seed at startup
//! - Notification channels
//! - Where the file context providers read from
//! - Engine, dispatch and scheduler timing
//! - Log output format

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vigil_alerts::{
    AlertRule, AlertType, ChannelId, Condition, ConditionLogic, DispatchConfig, EngineConfig,
    Priority, TenantId, WebhookConfig,
};

use crate::error::{NodeError, Result};

/// A tenant served by this node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantConfig {
    /// Tenant id.
    pub id: TenantId,
    /// Display name used for `{tenant_name}`.
    pub name: String,
}

/// A notification channel to register.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Logs every notification.
    Log {
        /// Channel id.
        name: String,
    },
    /// JSON POST to a URL.
    Webhook {
        /// Channel id.
        name: String,
        /// Target URL.
        url: String,
        /// Extra request headers.
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// E-mail.
    Email {
        /// Channel id.
        name: String,
        /// Recipients.
        to: Vec<String>,
        /// Sender address.
        from: String,
    },
    /// In-memory per-tenant feed.
    InApp {
        /// Channel id.
        name: String,
        /// Notifications kept per tenant.
        #[serde(default)]
        capacity: Option<usize>,
    },
}

impl ChannelConfig {
    /// Returns the channel id.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Log { name }
            | Self::Webhook { name, .. }
            | Self::Email { name, .. }
            | Self::InApp { name, .. } => name,
        }
    }
}

/// A rule created at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSeed {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Rule name.
    pub name: String,
    /// Alert type.
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    /// Conditions.
    pub conditions: Vec<Condition>,
    /// How conditions combine.
    #[serde(default)]
    pub logic: ConditionLogic,
    /// Priority.
    #[serde(default)]
    pub priority: Priority,
    /// Channels to notify.
    pub channels: Vec<ChannelId>,
    /// Template; the alert type's default when absent.
    #[serde(default)]
    pub message_template: Option<String>,
    /// Cooldown in minutes.
    #[serde(default = "default_cooldown")]
    pub cooldown_minutes: u32,
    /// Alert expiry in minutes.
    #[serde(default)]
    pub expires_after_minutes: Option<u32>,
    /// Whether failed deliveries keep the alert open.
    #[serde(default = "default_true")]
    pub retriable: bool,
}

const fn default_cooldown() -> u32 {
    60
}

const fn default_true() -> bool {
    true
}

impl RuleSeed {
    /// Builds the rule.
    ///
    /// # Errors
    ///
    /// Returns a validation error from the rule builder.
    pub fn to_rule(&self) -> Result<AlertRule> {
        let mut builder = AlertRule::builder(self.tenant_id, self.name.as_str(), self.alert_type)
            .conditions(self.conditions.iter().cloned())
            .logic(self.logic)
            .priority(self.priority)
            .cooldown_minutes(self.cooldown_minutes)
            .retriable(self.retriable);
        for channel in &self.channels {
            builder = builder.channel(channel.clone());
        }
        if let Some(template) = &self.message_template {
            builder = builder.message_template(template.as_str());
        }
        if let Some(minutes) = self.expires_after_minutes {
            builder = builder.expires_after_minutes(minutes);
        }
        Ok(builder.build()?)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Plain,
    /// One JSON object per line.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Output format.
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

/// Scheduler timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds between scans.
    pub interval_secs: u64,
    /// Whether each tick also expires stale alerts.
    pub sweep_expired: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            sweep_expired: true,
        }
    }
}

/// Main node configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Tenants to scan.
    pub tenants: Vec<TenantConfig>,
    /// Channels to register.
    pub channels: Vec<ChannelConfig>,
    /// Rules to create at startup.
    #[serde(default)]
    pub rules: Vec<RuleSeed>,
    /// Directory holding `<tenant_id>/<type>.json` context files.
    pub context_dir: PathBuf,
    /// Engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Dispatcher settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Scheduler settings.
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}

impl NodeConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            NodeError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// A small working configuration: one tenant, a log channel and a heat rule.
    #[must_use]
    pub fn sample() -> Self {
        let tenant = TenantId::new();
        Self {
            tenants: vec![TenantConfig {
                id: tenant,
                name: "Example Farms".to_string(),
            }],
            channels: vec![
                ChannelConfig::Log {
                    name: "log".to_string(),
                },
                ChannelConfig::InApp {
                    name: "in_app".to_string(),
                    capacity: None,
                },
            ],
            rules: vec![RuleSeed {
                tenant_id: tenant,
                name: "Heat warning".to_string(),
                alert_type: AlertType::Weather,
                conditions: Condition::threshold(
                    "temperature",
                    vigil_alerts::ComparisonOperator::GreaterThan,
                    35.0,
                )
                .into_iter()
                .collect(),
                logic: ConditionLogic::And,
                priority: Priority::High,
                channels: vec!["log".into(), "in_app".into()],
                message_template: None,
                cooldown_minutes: 60,
                expires_after_minutes: Some(24 * 60),
                retriable: true,
            }],
            context_dir: PathBuf::from("/var/lib/vigil/context"),
            engine: EngineConfig::default(),
            dispatch: DispatchConfig::default(),
            schedule: ScheduleConfig::default(),
            log: LogConfig::default(),
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.tenants.is_empty() {
            return Err(NodeError::Config("at least one tenant is required".to_string()));
        }

        let mut tenant_ids = HashSet::new();
        for tenant in &self.tenants {
            if !tenant_ids.insert(tenant.id) {
                return Err(NodeError::Config(format!("tenant {} is listed twice", tenant.id)));
            }
            if tenant.name.trim().is_empty() {
                return Err(NodeError::Config(format!("tenant {} has an empty name", tenant.id)));
            }
        }

        let mut channel_names = HashSet::new();
        for channel in &self.channels {
            let name = channel.name();
            if name.trim().is_empty() {
                return Err(NodeError::Config("channel name cannot be empty".to_string()));
            }
            if !channel_names.insert(name) {
                return Err(NodeError::Config(format!("channel '{name}' is defined twice")));
            }
            match channel {
                ChannelConfig::Webhook { url, .. } => {
                    WebhookConfig::new(name, url.as_str())?;
                }
                ChannelConfig::Email { to, .. } if to.is_empty() => {
                    return Err(NodeError::Config(format!(
                        "email channel '{name}' needs at least one recipient"
                    )));
                }
                _ => {}
            }
        }

        for seed in &self.rules {
            if !tenant_ids.contains(&seed.tenant_id) {
                return Err(NodeError::Config(format!(
                    "rule '{}' belongs to unknown tenant {}",
                    seed.name, seed.tenant_id
                )));
            }
            if let Some(channel) = seed
                .channels
                .iter()
                .find(|c| !channel_names.contains(c.as_str()))
            {
                return Err(NodeError::Config(format!(
                    "rule '{}' uses undefined channel '{channel}'",
                    seed.name
                )));
            }
            seed.to_rule()?;
        }

        if self.context_dir.as_os_str().is_empty() {
            return Err(NodeError::Config("context_dir cannot be empty".to_string()));
        }
        if self.schedule.interval_secs == 0 {
            return Err(NodeError::Config(
                "schedule.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.dispatch.channel_timeout_ms == 0 || self.engine.provider_timeout_ms == 0 {
            return Err(NodeError::Config("timeouts must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("failed to write temp file");
        file
    }

    const TENANT: &str = "6f1c2a9e-1b7d-4c4e-9a53-0c6f0b1d2e3f";

    fn minimal_json() -> String {
        format!(
            r#"{{
                "tenants": [{{ "id": "{TENANT}", "name": "Acme Farms" }}],
                "channels": [{{ "kind": "log", "name": "log" }}],
                "context_dir": "/tmp/vigil"
            }}"#
        )
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = NodeConfig::from_json(&minimal_json()).expect("should parse minimal config");

        assert_eq!(config.tenants.len(), 1);
        assert_eq!(config.tenants[0].name, "Acme Farms");
        assert!(config.rules.is_empty());
        assert_eq!(config.schedule.interval_secs, 300);
        assert!(config.schedule.sweep_expired);
        assert_eq!(config.dispatch.channel_timeout_ms, 10_000);
        assert_eq!(config.engine.provider_timeout_ms, 5_000);
        assert_eq!(config.log.format, LogFormat::Plain);
    }

    #[test]
    fn test_parse_rule_seed() {
        let json = format!(
            r#"{{
                "tenants": [{{ "id": "{TENANT}", "name": "Acme Farms" }}],
                "channels": [
                    {{ "kind": "webhook", "name": "ops", "url": "https://hooks.example.com/x" }},
                    {{ "kind": "email", "name": "email", "to": ["ops@acme.test"], "from": "vigil@acme.test" }}
                ],
                "rules": [{{
                    "tenant_id": "{TENANT}",
                    "name": "Heat warning",
                    "type": "weather",
                    "conditions": [{{ "field": "temperature", "operator": ">", "value": 35 }}],
                    "priority": "high",
                    "channels": ["ops", "email"]
                }}],
                "context_dir": "/tmp/vigil",
                "log": {{ "format": "json" }}
            }}"#
        );
        let config = NodeConfig::from_json(&json).expect("should parse rules");

        let rule = config.rules[0].to_rule().expect("seed should build");
        assert_eq!(rule.cooldown_minutes, 60);
        assert!(rule.retriable);
        assert_eq!(rule.channels.len(), 2);
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_rule_with_undefined_channel_is_rejected() {
        let mut config = NodeConfig::from_json(&minimal_json()).expect("should parse");
        let mut seed = NodeConfig::sample().rules.remove(0);
        seed.tenant_id = config.tenants[0].id;
        seed.channels = vec!["sms".into()];
        config.rules.push(seed);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("undefined channel 'sms'"));
    }

    #[test]
    fn test_rule_for_unknown_tenant_is_rejected() {
        let mut config = NodeConfig::from_json(&minimal_json()).expect("should parse");
        let mut seed = NodeConfig::sample().rules.remove(0);
        seed.channels = vec!["log".into()];
        config.rules.push(seed);

        assert!(config.validate().unwrap_err().to_string().contains("unknown tenant"));
    }

    #[test]
    fn test_between_without_value2_is_rejected() {
        let json = format!(
            r#"{{
                "tenants": [{{ "id": "{TENANT}", "name": "Acme Farms" }}],
                "channels": [{{ "kind": "log", "name": "log" }}],
                "rules": [{{
                    "tenant_id": "{TENANT}",
                    "name": "Mild",
                    "type": "weather",
                    "conditions": [{{ "field": "temperature", "operator": "between", "value": 10 }}],
                    "channels": ["log"]
                }}],
                "context_dir": "/tmp/vigil"
            }}"#
        );
        assert!(NodeConfig::from_json(&json).is_err());
    }

    #[test]
    fn test_invalid_webhook_url_is_rejected() {
        let mut config = NodeConfig::from_json(&minimal_json()).expect("should parse");
        config.channels.push(ChannelConfig::Webhook {
            name: "ops".to_string(),
            url: "ftp://example.com".to_string(),
            headers: HashMap::new(),
        });
        assert!(matches!(config.validate(), Err(NodeError::Alert(_))));
    }

    #[test]
    fn test_duplicate_channel_is_rejected() {
        let mut config = NodeConfig::from_json(&minimal_json()).expect("should parse");
        config.channels.push(ChannelConfig::Log {
            name: "log".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let mut config = NodeConfig::from_json(&minimal_json()).expect("should parse");
        config.schedule.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let file = create_temp_config(&minimal_json());
        let config = NodeConfig::load(file.path()).expect("should load config from file");
        assert_eq!(config.channels[0].name(), "log");
    }

    #[test]
    fn test_load_missing_file() {
        let result = NodeConfig::load("/nonexistent/path/config.json");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn test_sample_round_trips_through_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.json");
        let sample = NodeConfig::sample();
        sample.save(&path).expect("should save");

        let loaded = NodeConfig::load(&path).expect("sample should validate");
        assert_eq!(loaded, sample);
    }
}
