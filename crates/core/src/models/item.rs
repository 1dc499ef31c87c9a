use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DistributionRequest;

/// 在队列中流转的分发条目
///
/// 请求被路由到某个队列时创建。扇出到多个队列时，各条目共享同一个请求。
/// 只有排空流程会修改条目（重试时递增尝试次数）。
#[derive(Debug, Clone)]
pub struct DistributionItem {
    id: String,
    request: Arc<DistributionRequest>,
    queue_name: String,
    enqueue_time: DateTime<Utc>,
    attempt_count: u32,
}

impl DistributionItem {
    pub fn new(request: Arc<DistributionRequest>, queue_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request,
            queue_name: queue_name.into(),
            enqueue_time: Utc::now(),
            attempt_count: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &DistributionRequest {
        &self.request
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn enqueue_time(&self) -> DateTime<Utc> {
        self.enqueue_time
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// 记录一次投递尝试，返回新的尝试次数
    pub fn record_attempt(&mut self) -> u32 {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.attempt_count
    }

    /// 条目在队列中等待的时长
    pub fn waiting_time(&self, now: DateTime<Utc>) -> Duration {
        (now - self.enqueue_time).to_std().unwrap_or(Duration::ZERO)
    }
}
