use std::sync::Arc;

use async_trait::async_trait;

use crate::{models::DistributionRequest, DistributionResult};

/// 分发请求处理者，触发器产生的请求交由它处理
#[async_trait]
pub trait DistributionRequestHandler: Send + Sync {
    /// 处理者标识，同一标识在触发器内最多对应一个活动订阅
    fn handler_id(&self) -> String;

    async fn handle(&self, request: DistributionRequest);
}

/// 分发触发器接口
#[async_trait]
pub trait DistributionTrigger: Send + Sync {
    /// 注册处理者，之后产生的请求交给它
    async fn register(&self, handler: Arc<dyn DistributionRequestHandler>) -> DistributionResult<()>;

    /// 注销处理者，同步取消与之关联的进行中操作；未注册时为空操作
    async fn unregister(&self, handler: &dyn DistributionRequestHandler) -> DistributionResult<()>;

    /// 触发器名称
    fn name(&self) -> &str;
}
