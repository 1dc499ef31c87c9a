use std::path::Path;

use ::config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    AgentConfig, CredentialsConfig, RemoteTriggerConfig, ScheduledTriggerConfig, DEFAULT_QUEUE_NAME,
};
use crate::{logging::LogFormat, DistributionError, DistributionResult};

/// In-memory queue provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueConfig {
    /// Re-check non-empty queues at this cadence (0 disables polling)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum number of queues (0 means unlimited)
    #[serde(default)]
    pub max_queues: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_queues: 0,
        }
    }
}

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Upper bound of packages pulled by one POLL request
    #[serde(default = "default_max_poll_packages")]
    pub max_poll_packages: usize,
    /// Remote queue addressed by POLL requests
    #[serde(default = "default_poll_queue")]
    pub poll_queue: String,
    #[serde(flatten)]
    pub credentials: CredentialsConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_seconds: default_timeout_seconds(),
            max_poll_packages: default_max_poll_packages(),
            poll_queue: default_poll_queue(),
            credentials: CredentialsConfig::default(),
        }
    }
}

/// Request authorization configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizationConfig {
    /// Allowed content roots, empty allows every path
    #[serde(default)]
    pub allowed_roots: Vec<String>,
    #[serde(default)]
    pub deny_delete: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub authorization: AuthorizationConfig,
    #[serde(default)]
    pub remote_trigger: Option<RemoteTriggerConfig>,
    #[serde(default)]
    pub scheduled_trigger: Option<ScheduledTriggerConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn new(agent: AgentConfig) -> Self {
        Self {
            agent,
            queue: QueueConfig::default(),
            transport: TransportConfig::default(),
            authorization: AuthorizationConfig::default(),
            remote_trigger: None,
            scheduled_trigger: None,
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Config file (TOML format)
    /// 2. Environment variable overrides (prefix: DISTRIBUTION_, nested keys separated by `__`)
    pub fn load(config_path: &str) -> DistributionResult<Self> {
        if !Path::new(config_path).exists() {
            return Err(DistributionError::Configuration(format!(
                "配置文件不存在: {config_path}"
            )));
        }

        let config: AppConfig = ConfigBuilder::builder()
            .add_source(File::new(config_path, FileFormat::Toml))
            .add_source(
                Environment::with_prefix("DISTRIBUTION")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| DistributionError::Configuration(format!("构建配置失败: {e}")))?
            .try_deserialize()
            .map_err(|e| DistributionError::Configuration(format!("反序列化配置失败: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> DistributionResult<Self> {
        let config: AppConfig = toml::from_str(toml_str)
            .map_err(|e| DistributionError::Configuration(format!("解析TOML配置失败: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> DistributionResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DistributionError::Serialization(format!("序列化配置为TOML失败: {e}")))
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> DistributionResult<()> {
        self.agent.validate()?;

        if self.transport.timeout_seconds == 0 {
            return Err(DistributionError::Configuration(
                "transport.timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.transport.poll_queue.trim().is_empty() {
            return Err(DistributionError::Configuration(
                "transport.poll_queue must not be empty".to_string(),
            ));
        }
        if let Some(remote) = &self.remote_trigger {
            remote.validate()?;
        }
        if let Some(scheduled) = &self.scheduled_trigger {
            scheduled.validate()?;
        }
        self.logging.format.parse::<LogFormat>()?;
        Ok(())
    }
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_poll_packages() -> usize {
    100
}

fn default_poll_queue() -> String {
    DEFAULT_QUEUE_NAME.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
