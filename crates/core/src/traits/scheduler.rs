use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::DistributionResult;

/// 周期作业工厂，每次触发生成一个新的作业
pub type JobFactory = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// 作业调度器接口
pub trait JobScheduler: Send + Sync {
    /// 以给定名称立即运行一次作业；同名作业仍在运行时返回错误
    fn schedule_now(&self, name: &str, job: BoxFuture<'static, ()>) -> DistributionResult<()>;

    /// 以给定名称按固定周期运行作业
    fn schedule_periodic(&self, name: &str, period: Duration, job: JobFactory)
        -> DistributionResult<()>;

    /// 按名称取消作业，返回是否存在该作业
    fn unschedule(&self, name: &str) -> bool;

    /// 指定名称的作业是否仍在运行
    fn is_scheduled(&self, name: &str) -> bool;
}
