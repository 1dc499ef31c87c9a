use crate::{models::DistributionRequest, DistributionResult};

/// 队列分派策略接口
///
/// `(请求, 已知队列名) -> 目标队列名列表` 的纯函数。相同的输入必须得到相同的路由结果，
/// 这样重试时条目的落点是幂等的。
pub trait DispatchingStrategy: Send + Sync {
    fn dispatch(
        &self,
        request: &DistributionRequest,
        queue_names: &[String],
    ) -> DistributionResult<Vec<String>>;

    /// 策略名称
    fn name(&self) -> &str;
}
