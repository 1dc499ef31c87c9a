use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use distribution_core::{
    config::ScheduledTriggerConfig,
    traits::{DistributionRequestHandler, DistributionTrigger, JobFactory, JobScheduler},
    DistributionActionType, DistributionRequest, DistributionResult,
};
use futures::FutureExt;
use tracing::{debug, info};

const SCHEDULE_NAME: &str = "scheduledEventTrigger";

/// 定时触发器，按固定周期为每个处理者合成同一个分发请求
pub struct ScheduledDistributionTrigger {
    name: String,
    interval: Duration,
    action: DistributionActionType,
    path: String,
    scheduler: Arc<dyn JobScheduler>,
}

impl ScheduledDistributionTrigger {
    pub fn new(
        config: &ScheduledTriggerConfig,
        scheduler: Arc<dyn JobScheduler>,
    ) -> DistributionResult<Self> {
        config.validate()?;
        Ok(Self::with_interval(
            Duration::from_secs(config.interval_seconds),
            config.action,
            config.path.clone(),
            scheduler,
        ))
    }

    pub fn with_interval(
        interval: Duration,
        action: DistributionActionType,
        path: impl Into<String>,
        scheduler: Arc<dyn JobScheduler>,
    ) -> Self {
        Self {
            name: SCHEDULE_NAME.to_string(),
            interval,
            action,
            path: path.into(),
            scheduler,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn job_name(&self, handler_id: &str) -> String {
        format!("{}-{handler_id}", self.name)
    }
}

#[async_trait]
impl DistributionTrigger for ScheduledDistributionTrigger {
    async fn register(&self, handler: Arc<dyn DistributionRequestHandler>) -> DistributionResult<()> {
        let job = self.job_name(&handler.handler_id());
        if self.scheduler.is_scheduled(&job) {
            debug!("定时作业已存在: {}", job);
            return Ok(());
        }

        let action = self.action;
        let path = self.path.clone();
        let factory: JobFactory = Arc::new(move || {
            let handler = Arc::clone(&handler);
            let request = DistributionRequest::new(action, [path.as_str()]);
            async move { handler.handle(request).await }.boxed()
        });

        self.scheduler.schedule_periodic(&job, self.interval, factory)?;
        info!("注册定时触发作业 {} (interval: {:?})", job, self.interval);
        Ok(())
    }

    async fn unregister(&self, handler: &dyn DistributionRequestHandler) -> DistributionResult<()> {
        let job = self.job_name(&handler.handler_id());
        if self.scheduler.unschedule(&job) {
            info!("注销定时触发作业 {}", job);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
