use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    models::DistributionActionType, traits::Credentials, DistributionError, DistributionResult,
};

/// Credentials settings shared by the HTTP collaborators
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl CredentialsConfig {
    pub fn to_credentials(&self) -> Credentials {
        if let Some(token) = &self.token {
            return Credentials::Bearer(token.clone());
        }
        match (&self.username, &self.password) {
            (Some(username), password) => Credentials::Basic {
                username: username.clone(),
                password: password.clone().unwrap_or_default(),
            },
            _ => Credentials::Anonymous,
        }
    }
}

/// Reconnect behaviour of the remote event trigger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Reconnect automatically after the event stream drops
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Consecutive failed connection attempts before giving up (unbounded if absent)
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_reconnect_max_delay_ms(),
            max_attempts: None,
        }
    }
}

/// Remote event trigger configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteTriggerConfig {
    pub endpoint: String,
    #[serde(default = "default_root_path")]
    pub path: String,
    #[serde(default = "default_poll_action")]
    pub action: DistributionActionType,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(flatten)]
    pub credentials: CredentialsConfig,
}

impl RemoteTriggerConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            path: default_root_path(),
            action: default_poll_action(),
            reconnect: ReconnectConfig::default(),
            credentials: CredentialsConfig::default(),
        }
    }

    pub fn endpoint_url(&self) -> DistributionResult<Url> {
        Url::parse(&self.endpoint).map_err(|e| {
            DistributionError::Configuration(format!(
                "invalid remote trigger endpoint {}: {e}",
                self.endpoint
            ))
        })
    }

    pub fn validate(&self) -> DistributionResult<()> {
        self.endpoint_url()?;
        if !self.path.starts_with('/') {
            return Err(DistributionError::Configuration(format!(
                "remote trigger path must be absolute: {}",
                self.path
            )));
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(DistributionError::Configuration(
                "reconnect.max_delay_ms must not be smaller than reconnect.initial_delay_ms"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Scheduled trigger configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledTriggerConfig {
    pub interval_seconds: u64,
    #[serde(default = "default_poll_action")]
    pub action: DistributionActionType,
    #[serde(default = "default_root_path")]
    pub path: String,
}

impl ScheduledTriggerConfig {
    pub fn validate(&self) -> DistributionResult<()> {
        if self.interval_seconds == 0 {
            return Err(DistributionError::Configuration(
                "scheduled trigger interval_seconds must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_root_path() -> String {
    "/".to_string()
}

fn default_poll_action() -> DistributionActionType {
    DistributionActionType::Poll
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_precedence() {
        let config = CredentialsConfig {
            username: Some("admin".to_string()),
            password: Some("admin".to_string()),
            token: Some("abc".to_string()),
        };
        assert_eq!(config.to_credentials(), Credentials::Bearer("abc".to_string()));

        let config = CredentialsConfig {
            username: Some("admin".to_string()),
            password: None,
            token: None,
        };
        assert_eq!(
            config.to_credentials(),
            Credentials::Basic {
                username: "admin".to_string(),
                password: String::new(),
            }
        );

        assert_eq!(
            CredentialsConfig::default().to_credentials(),
            Credentials::Anonymous
        );
    }

    #[test]
    fn test_remote_trigger_validation() {
        assert!(RemoteTriggerConfig::new("http://publish:4503/events")
            .validate()
            .is_ok());
        assert!(RemoteTriggerConfig::new("not a url").validate().is_err());

        let mut config = RemoteTriggerConfig::new("http://publish:4503/events");
        config.path = "content".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scheduled_trigger_validation() {
        let config = ScheduledTriggerConfig {
            interval_seconds: 0,
            action: DistributionActionType::Poll,
            path: "/".to_string(),
        };
        assert!(config.validate().is_err());
    }
}
