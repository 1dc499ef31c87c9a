use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use distribution_agent::{
    authorization_strategy_from_config, dispatching_strategy_from_config, AgentComponents,
    AgentRegistry, RemoteEventDistributionTrigger, ScheduledDistributionTrigger,
    SimpleDistributionAgent,
};
use distribution_core::{config::AppConfig, traits::JobScheduler, DistributionPackage};
use distribution_infrastructure::{
    HttpEventStreamClient, HttpTransport, InMemoryQueueProvider, StaticCredentialsProvider,
    TokioJobScheduler,
};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const STATISTICS_INTERVAL: Duration = Duration::from_secs(60);
const EVENT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// 分发进程：按配置组装一个Agent及其协作者
pub struct Application {
    registry: AgentRegistry,
    agent: Arc<SimpleDistributionAgent>,
    packages: mpsc::UnboundedReceiver<DistributionPackage>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        config.validate().context("配置校验失败")?;

        let (package_tx, packages) = mpsc::unbounded_channel();
        let transport = HttpTransport::from_config(config.agent.name.clone(), &config.transport)
            .context("创建HTTP传输失败")?
            .with_package_sink(package_tx);

        let scheduler: Arc<dyn JobScheduler> = Arc::new(TokioJobScheduler::new());
        let mut components = AgentComponents::new()
            .with_transport(Arc::new(transport))
            .with_authorization(authorization_strategy_from_config(&config.authorization))
            .with_queue_provider(Arc::new(InMemoryQueueProvider::new(config.queue.clone())))
            .with_dispatching(dispatching_strategy_from_config(&config.agent.dispatching));

        if let Some(remote) = &config.remote_trigger {
            let trigger = RemoteEventDistributionTrigger::new(
                remote,
                Arc::new(StaticCredentialsProvider::from_config(&remote.credentials)),
                Arc::new(HttpEventStreamClient::new(EVENT_CONNECT_TIMEOUT)?),
                Arc::clone(&scheduler),
            )
            .context("创建远程事件触发器失败")?;
            info!("远程事件触发器: {}", trigger.endpoint());
            components = components.with_trigger(Arc::new(trigger));
        }

        if let Some(scheduled) = &config.scheduled_trigger {
            let trigger = ScheduledDistributionTrigger::new(scheduled, Arc::clone(&scheduler))
                .context("创建定时触发器失败")?;
            info!("定时触发器: 每 {} 秒", scheduled.interval_seconds);
            components = components.with_trigger(Arc::new(trigger));
        }

        let registry = AgentRegistry::new();
        let agent = registry
            .register(&config.agent, components)
            .await
            .with_context(|| format!("创建Agent {} 失败", config.agent.name))?;

        Ok(Self {
            registry,
            agent,
            packages,
        })
    }

    /// 运行直到收到关闭信号，随后停用所有Agent
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self {
            registry,
            agent,
            mut packages,
        } = self;

        info!(
            "Agent {} 已启动 (enabled: {}, passive: {}, queues: {:?})",
            agent.name(),
            agent.is_enabled(),
            agent.is_passive(),
            agent.queue_names()
        );

        let mut tasks = JoinSet::new();

        let reporter_agent = Arc::clone(&agent);
        let reporter_shutdown = shutdown.clone();
        tasks.spawn(async move {
            let mut ticker = tokio::time::interval(STATISTICS_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = reporter_shutdown.cancelled() => break,
                    _ = ticker.tick() => report_statistics(&reporter_agent).await,
                }
            }
        });

        let sink_shutdown = shutdown.clone();
        tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = sink_shutdown.cancelled() => break,
                    package = packages.recv() => match package {
                        Some(package) => {
                            info!("拉取到分发包 {} ({})", package.id, package.to_request())
                        }
                        None => break,
                    },
                }
            }
        });

        shutdown.cancelled().await;
        info!("停止Agent {}", agent.name());

        registry.shutdown().await;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!("后台任务异常退出: {}", e);
            }
        }

        report_statistics(&agent).await;
        Ok(())
    }
}

async fn report_statistics(agent: &SimpleDistributionAgent) {
    let snapshot = agent.statistics().snapshot();
    match serde_json::to_string(&snapshot) {
        Ok(json) => info!("Agent {} 统计: {}", agent.name(), json),
        Err(e) => error!("序列化统计信息失败: {}", e),
    }

    for queue_name in agent.queue_names() {
        if let Ok(stats) = agent.queue_statistics(queue_name).await {
            debug!(
                "队列 {} 排队 {} 活动 {} 完成 {} 失败 {}",
                queue_name,
                stats.number_of_queued_jobs(),
                stats.number_of_active_jobs(),
                stats.number_of_finished_jobs(),
                stats.number_of_failed_jobs()
            );
        }
    }
}
