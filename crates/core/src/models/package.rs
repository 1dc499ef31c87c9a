use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DistributionActionType, DistributionItem, DistributionRequest};

/// 传输层交换的分发包
///
/// 对Agent而言是不透明的，只有传输实现关心其编码。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionPackage {
    pub id: String,
    pub action_type: DistributionActionType,
    pub paths: Vec<String>,
    pub origin_queue: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DistributionPackage {
    pub fn from_request(request: &DistributionRequest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action_type: request.action_type(),
            paths: request.paths().to_vec(),
            origin_queue: None,
            created_at: Utc::now(),
        }
    }

    pub fn from_item(item: &DistributionItem) -> Self {
        Self {
            id: item.id().to_string(),
            action_type: item.request().action_type(),
            paths: item.request().paths().to_vec(),
            origin_queue: Some(item.queue_name().to_string()),
            created_at: Utc::now(),
        }
    }

    /// 还原为分发请求
    pub fn to_request(&self) -> DistributionRequest {
        DistributionRequest::with_timestamp(self.action_type, self.paths.clone(), self.created_at)
    }
}
