//! Configuration types for Toolgate

use crate::audit::{ArgumentRedactor, DEFAULT_SENSITIVE_KEYS};
use crate::error::{GateError, Result};
use crate::gate::{ApprovalInbox, CircuitBreakerConfig, QueuedAdjudicator, approval_channel};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an extra config file
pub const CONFIG_PATH_ENV: &str = "TOOLGATE_CONFIG_PATH";

/// Main configuration for a tool-call gate
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GateConfig {
    /// Circuit breaker configuration
    pub breaker: BreakerSettings,

    /// Human approval configuration
    pub approval: ApprovalSettings,

    /// Audit configuration
    pub audit: AuditSettings,

    /// Tools the agent may call; `"*"` allows everything
    pub allowed_tools: Vec<String>,

    /// Upper bound on a single tool execution (optional)
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub execution_timeout: Option<Duration>,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,

    /// Time the breaker stays open before a trial call
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            recovery_timeout: defaults.recovery_timeout,
        }
    }
}

impl From<&BreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        CircuitBreakerConfig::default()
            .with_failure_threshold(settings.failure_threshold)
            .with_recovery_timeout(settings.recovery_timeout)
    }
}

/// Human approval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSettings {
    /// Tools that need an operator decision before running
    pub required: Vec<String>,

    /// Deny when the operator has not answered in time (optional)
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Prompts that may wait for the operator UI
    pub queue_capacity: usize,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            required: Vec::new(),
            timeout: None,
            queue_capacity: 32,
        }
    }
}

impl ApprovalSettings {
    /// Create a queued approval channel sized and timed by these settings
    pub fn channel(&self) -> (QueuedAdjudicator, ApprovalInbox) {
        let (adjudicator, inbox) = approval_channel(self.queue_capacity);
        match self.timeout {
            Some(timeout) => (adjudicator.with_timeout(timeout), inbox),
            None => (adjudicator, inbox),
        }
    }
}

/// Audit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Mask sensitive arguments before they are logged or shown
    pub redact: bool,

    /// Key fragments whose values are masked
    pub sensitive_keys: Vec<String>,

    /// Regexes matched against string values
    pub redact_patterns: Vec<String>,

    /// Buffer size for channel sinks
    pub channel_capacity: usize,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            redact: true,
            sensitive_keys: DEFAULT_SENSITIVE_KEYS.iter().map(|k| k.to_string()).collect(),
            redact_patterns: Vec::new(),
            channel_capacity: 1024,
        }
    }
}

impl AuditSettings {
    /// Build the redactor these settings describe
    pub fn redactor(&self) -> Result<ArgumentRedactor> {
        if !self.redact {
            return Ok(ArgumentRedactor::disabled());
        }
        let patterns: Vec<&str> = self.redact_patterns.iter().map(String::as_str).collect();
        ArgumentRedactor::new(&self.sensitive_keys, &patterns)
            .map_err(|e| GateError::Configuration(format!("Invalid redaction pattern: {}", e)))
    }
}

impl GateConfig {
    /// Load configuration from `toolgate.toml`, `TOOLGATE_CONFIG_PATH` and
    /// `TOOLGATE_*` environment variables, in increasing priority.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `TOOLGATE_BREAKER__FAILURE_THRESHOLD=5`.
    pub fn load() -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(GateConfig::default()))
            .merge(Toml::file("toolgate.toml"));

        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            figment = merge_file(figment, Path::new(&path));
        }

        let figment = figment.merge(Env::prefixed("TOOLGATE_").ignore(&["config_path"]).split("__"));

        Self::from_figment(figment)
    }

    /// Load configuration from a TOML, YAML or JSON file, chosen by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GateError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let figment = merge_file(Figment::from(Serialized::defaults(GateConfig::default())), path);
        Self::from_figment(figment)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(GateConfig::default())).merge(Toml::string(source)),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let config: GateConfig = figment.extract().map_err(|e| {
            GateError::Configuration(format!("Failed to load configuration: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero failure threshold, an empty tool name or
    /// an invalid redaction pattern.
    pub fn validate(&self) -> Result<()> {
        if self.breaker.failure_threshold == 0 {
            return Err(GateError::Configuration(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        let mut names = self.allowed_tools.iter().chain(&self.approval.required);
        if names.any(|name| name.trim().is_empty()) {
            return Err(GateError::Configuration(
                "tool names must not be empty".to_string(),
            ));
        }
        self.audit.redactor()?;
        Ok(())
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::from(&self.breaker)
    }
}

fn merge_file(figment: Figment, path: &Path) -> Figment {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => figment.merge(Toml::file(path)),
    }
}
