use async_trait::async_trait;

use crate::{
    models::{DistributionPackage, DistributionRequest},
    DistributionResult,
};

/// 传输层抽象接口
///
/// 把分发请求打包发往远端，或从远端队列拉取待处理的分发包。
/// 具体的线上格式对Agent不可见。
#[async_trait]
pub trait DistributionTransport: Send + Sync {
    /// 投递请求到远端
    async fn deliver(&self, request: &DistributionRequest) -> DistributionResult<()>;

    /// 从远端指定队列拉取下一个分发包，没有待处理的包时返回 `None`
    async fn fetch(&self, queue_name: &str) -> DistributionResult<Option<DistributionPackage>>;

    /// 传输名称，用于日志
    fn name(&self) -> &str;
}
