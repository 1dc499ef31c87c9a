use serde::{Deserialize, Serialize};

use crate::{DistributionError, DistributionResult};

pub const DEFAULT_QUEUE_NAME: &str = "default";

/// Agent configuration
///
/// Recognised keys: `name` (required), `enabled`, `isPassive`, `serviceName`,
/// plus the queue, dispatching and retry settings of the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, alias = "isPassive")]
    pub is_passive: bool,
    #[serde(default, alias = "serviceName")]
    pub service_name: Option<String>,
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,
    #[serde(default)]
    pub dispatching: DispatchingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            is_passive: false,
            service_name: None,
            queues: default_queues(),
            dispatching: DispatchingConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    pub fn passive(mut self) -> Self {
        self.is_passive = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    pub fn with_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dispatching(mut self, dispatching: DispatchingConfig) -> Self {
        self.dispatching = dispatching;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> DistributionResult<()> {
        if self.name.trim().is_empty() {
            return Err(DistributionError::InvalidAgentConfig(
                "agent name is required".to_string(),
            ));
        }

        if self.queues.is_empty() {
            return Err(DistributionError::InvalidAgentConfig(format!(
                "agent {} must declare at least one queue",
                self.name
            )));
        }

        if self.queues.iter().any(|q| q.trim().is_empty()) {
            return Err(DistributionError::InvalidAgentConfig(format!(
                "agent {} declares an empty queue name",
                self.name
            )));
        }

        self.dispatching.validate(&self.queues)?;
        self.retry.validate()?;
        Ok(())
    }
}

/// Dispatching strategy selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum DispatchingConfig {
    /// Every request goes to one fixed queue
    Single {
        #[serde(default = "default_queue_name")]
        queue: String,
    },
    /// Every request is cloned into all known queues
    Multiple,
    /// Longest matching path prefix decides the queue
    PathPrefix {
        rules: Vec<PathRuleConfig>,
        #[serde(default = "default_queue_name")]
        default_queue: String,
    },
}

impl Default for DispatchingConfig {
    fn default() -> Self {
        DispatchingConfig::Single {
            queue: default_queue_name(),
        }
    }
}

impl DispatchingConfig {
    fn validate(&self, queues: &[String]) -> DistributionResult<()> {
        let known = |name: &str| queues.iter().any(|q| q == name);
        match self {
            DispatchingConfig::Single { queue } if !known(queue.as_str()) => {
                Err(DistributionError::InvalidAgentConfig(format!(
                    "single queue strategy targets undeclared queue {queue}"
                )))
            }
            DispatchingConfig::PathPrefix {
                rules,
                default_queue,
            } => {
                if !known(default_queue.as_str()) {
                    return Err(DistributionError::InvalidAgentConfig(format!(
                        "path prefix strategy falls back to undeclared queue {default_queue}"
                    )));
                }
                if let Some(rule) = rules.iter().find(|r| !known(r.queue.as_str())) {
                    return Err(DistributionError::InvalidAgentConfig(format!(
                        "path prefix rule {} targets undeclared queue {}",
                        rule.prefix, rule.queue
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathRuleConfig {
    pub prefix: String,
    pub queue: String,
}

/// Delivery retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Attempt ceiling per item, the item is dropped after this many failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Random jitter range (0.0-1.0)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> DistributionResult<()> {
        if self.max_attempts == 0 {
            return Err(DistributionError::InvalidAgentConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(DistributionError::InvalidAgentConfig(
                "retry.max_delay_ms must not be smaller than retry.base_delay_ms".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(DistributionError::InvalidAgentConfig(
                "retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(DistributionError::InvalidAgentConfig(
                "retry.jitter_factor must be within 0.0..=1.0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_queue_name() -> String {
    DEFAULT_QUEUE_NAME.to_string()
}

fn default_queues() -> Vec<String> {
    vec![default_queue_name()]
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.1
}
