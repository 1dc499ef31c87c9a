use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use url::Url;

use crate::{traits::Credentials, DistributionResult};

/// 服务端推送的内容块流，丢弃即关闭连接
pub type EventChunkStream = BoxStream<'static, DistributionResult<Bytes>>;

/// 异步事件流客户端接口
#[async_trait]
pub trait EventStreamClient: Send + Sync {
    /// 打开到 `endpoint` 的长连接
    async fn connect(
        &self,
        endpoint: &Url,
        credentials: &Credentials,
    ) -> DistributionResult<EventChunkStream>;
}
