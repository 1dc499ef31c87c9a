use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{models::DistributionItem, statistics::Statistics, DistributionResult};

/// 分发队列抽象接口
///
/// 命名的有序条目序列（默认先进先出），由队列提供者独占持有。
/// 队列本身不修改统计，统计迁移由排空方在移除条目时完成。
#[async_trait]
pub trait DistributionQueue: Send + Sync {
    /// 队列名称
    fn name(&self) -> &str;

    /// 追加条目到队尾
    async fn enqueue(&self, item: DistributionItem) -> DistributionResult<()>;

    /// 取出队首条目
    async fn take(&self) -> DistributionResult<Option<DistributionItem>>;

    /// 查看队首条目但不移除
    async fn head(&self) -> DistributionResult<Option<DistributionItem>>;

    /// 把投递失败的条目放回队首，保持队内顺序
    async fn requeue(&self, item: DistributionItem) -> DistributionResult<()>;

    /// 按ID移除条目
    async fn remove(&self, item_id: &str) -> DistributionResult<Option<DistributionItem>>;

    /// 清空队列并返回被移除的条目
    async fn clear(&self) -> DistributionResult<Vec<DistributionItem>>;

    /// 队列中的条目数
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 队列级统计
    fn statistics(&self) -> &Statistics;
}

/// 队列处理回调，由Agent实现
#[async_trait]
pub trait DistributionQueueProcessor: Send + Sync {
    /// 队列中有可处理条目时调用；`cancel` 被触发后应在当前条目完成后返回
    async fn process(&self, queue: Arc<dyn DistributionQueue>, cancel: CancellationToken);
}

/// 队列提供者接口
#[async_trait]
pub trait DistributionQueueProvider: Send + Sync {
    /// 获取指定名称的队列，首次访问时创建；并发调用同一名称只会得到同一个实例
    async fn get_queue(&self, name: &str) -> DistributionResult<Arc<dyn DistributionQueue>>;

    /// 已创建的队列名称
    async fn queue_names(&self) -> Vec<String>;

    /// 注册队列处理回调
    async fn enable_queue_processing(
        &self,
        processor: Arc<dyn DistributionQueueProcessor>,
    ) -> DistributionResult<()>;

    /// 注销队列处理回调，返回后不会再有新的回调发生
    async fn disable_queue_processing(&self) -> DistributionResult<()>;
}
