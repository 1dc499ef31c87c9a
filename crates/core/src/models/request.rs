use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DistributionError;

/// 分发动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DistributionActionType {
    Add,
    Delete,
    Poll,
    Test,
}

impl DistributionActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionActionType::Add => "ADD",
            DistributionActionType::Delete => "DELETE",
            DistributionActionType::Poll => "POLL",
            DistributionActionType::Test => "TEST",
        }
    }
}

impl fmt::Display for DistributionActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistributionActionType {
    type Err = DistributionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ADD" => Ok(DistributionActionType::Add),
            "DELETE" => Ok(DistributionActionType::Delete),
            "POLL" => Ok(DistributionActionType::Poll),
            "TEST" => Ok(DistributionActionType::Test),
            other => Err(DistributionError::Configuration(format!(
                "未知的分发动作类型: {other}"
            ))),
        }
    }
}

/// 分发请求
///
/// 创建后不可变，由触发器或外部调用方产生，经过分派策略路由后交给传输层。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRequest {
    action_type: DistributionActionType,
    paths: Vec<String>,
    timestamp: DateTime<Utc>,
}

impl DistributionRequest {
    pub fn new<I, S>(action_type: DistributionActionType, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_timestamp(action_type, paths, Utc::now())
    }

    pub fn with_timestamp<I, S>(
        action_type: DistributionActionType,
        paths: I,
        timestamp: DateTime<Utc>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action_type,
            paths: paths.into_iter().map(Into::into).collect(),
            timestamp,
        }
    }

    pub fn action_type(&self) -> DistributionActionType {
        self.action_type
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl fmt::Display for DistributionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.action_type, self.paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_parse() {
        assert_eq!(
            "poll".parse::<DistributionActionType>().unwrap(),
            DistributionActionType::Poll
        );
        assert_eq!(
            "DELETE".parse::<DistributionActionType>().unwrap(),
            DistributionActionType::Delete
        );
        assert!("PUBLISH".parse::<DistributionActionType>().is_err());
    }

    #[test]
    fn test_request_keeps_path_order() {
        let request = DistributionRequest::new(
            DistributionActionType::Add,
            ["/content/b", "/content/a", "/content/c"],
        );
        assert_eq!(request.paths(), ["/content/b", "/content/a", "/content/c"]);
        assert_eq!(request.action_type(), DistributionActionType::Add);
    }

    #[test]
    fn test_request_serialization() {
        let request = DistributionRequest::new(DistributionActionType::Poll, ["/"]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["action_type"], "POLL");
        assert_eq!(json["paths"][0], "/");

        let back: DistributionRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }
}
