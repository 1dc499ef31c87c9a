//! Test data builders for distribution requests

use chrono::{DateTime, Utc};
use distribution_core::{DistributionActionType, DistributionRequest};

/// Builder for creating test DistributionRequest values
pub struct DistributionRequestBuilder {
    action_type: DistributionActionType,
    paths: Vec<String>,
    timestamp: Option<DateTime<Utc>>,
}

impl DistributionRequestBuilder {
    pub fn new(action_type: DistributionActionType) -> Self {
        Self {
            action_type,
            paths: Vec::new(),
            timestamp: None,
        }
    }

    pub fn add() -> Self {
        Self::new(DistributionActionType::Add)
    }

    pub fn delete() -> Self {
        Self::new(DistributionActionType::Delete)
    }

    pub fn poll() -> Self {
        Self::new(DistributionActionType::Poll)
    }

    pub fn path(mut self, path: &str) -> Self {
        self.paths.push(path.to_string());
        self
    }

    pub fn paths(mut self, paths: &[&str]) -> Self {
        self.paths.extend(paths.iter().map(|p| p.to_string()));
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> DistributionRequest {
        match self.timestamp {
            Some(timestamp) => {
                DistributionRequest::with_timestamp(self.action_type, self.paths, timestamp)
            }
            None => DistributionRequest::new(self.action_type, self.paths),
        }
    }
}
