//! 远程事件触发器
//!
//! 为每个注册的处理者打开一条服务端推送的长连接，每收到一个内容块就合成一个分发请求
//! （默认对 `/` 的POLL）交给处理者。连接作为命名作业运行在作业调度器上，
//! 注销时取消令牌、撤销作业并等待连接真正关闭。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use distribution_core::{
    config::{ReconnectConfig, RemoteTriggerConfig},
    traits::{
        AuthenticationContext, AuthenticationProvider, AuthenticationTarget, DistributionRequestHandler,
        DistributionTrigger, EventStreamClient, JobScheduler,
    },
    DistributionActionType, DistributionError, DistributionRequest, DistributionResult,
};
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

const SCHEDULE_NAME: &str = "remoteEventTrigger";
const UNREGISTER_TIMEOUT: Duration = Duration::from_secs(5);

/// 连接断开后的重连策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// 不自动重连，需要重新注册
    Never,
    /// 指数退避重连
    Backoff {
        initial_delay: Duration,
        max_delay: Duration,
        /// 连续连接失败达到该次数后放弃
        max_attempts: Option<u32>,
    },
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        if !config.enabled {
            return ReconnectPolicy::Never;
        }
        ReconnectPolicy::Backoff {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
        }
    }

    /// `consecutive_failures` 次连续连接失败后的等待时间，`None` 表示不再重连
    ///
    /// 连接成功后断开时 `consecutive_failures` 为0，按初始延迟重连。
    pub fn next_delay(&self, consecutive_failures: u32) -> Option<Duration> {
        match self {
            ReconnectPolicy::Never => None,
            ReconnectPolicy::Backoff {
                initial_delay,
                max_delay,
                max_attempts,
            } => {
                if max_attempts.is_some_and(|max| consecutive_failures >= max) {
                    return None;
                }
                let exponent = consecutive_failures.saturating_sub(1).min(31);
                let delay = initial_delay.saturating_mul(2u32.saturating_pow(exponent));
                Some(delay.min(*max_delay))
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Never
    }
}

/// 一个处理者的活动订阅
struct Subscription {
    cancel: CancellationToken,
    finished: oneshot::Receiver<()>,
}

/// 远程事件触发器
pub struct RemoteEventDistributionTrigger {
    name: String,
    listener: Arc<EventListener>,
    scheduler: Arc<dyn JobScheduler>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

impl RemoteEventDistributionTrigger {
    /// 认证提供者必须能为HTTP客户端提供凭据
    pub fn new(
        config: &RemoteTriggerConfig,
        authentication: Arc<dyn AuthenticationProvider>,
        client: Arc<dyn EventStreamClient>,
        scheduler: Arc<dyn JobScheduler>,
    ) -> DistributionResult<Self> {
        config.validate()?;
        if !authentication.can_authenticate(AuthenticationTarget::HttpClient) {
            return Err(DistributionError::Trigger(
                "认证提供者不支持HTTP客户端凭据".to_string(),
            ));
        }

        let endpoint = config.endpoint_url()?;
        let listener = EventListener {
            endpoint,
            path: config.path.clone(),
            action: config.action,
            reconnect: ReconnectPolicy::from_config(&config.reconnect),
            authentication,
            client,
        };

        Ok(Self {
            name: SCHEDULE_NAME.to_string(),
            listener: Arc::new(listener),
            scheduler,
            subscriptions: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        if let Some(listener) = Arc::get_mut(&mut self.listener) {
            listener.reconnect = policy;
        }
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.listener.endpoint
    }

    /// 当前仍在运行的连接作业数
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions()
            .keys()
            .filter(|id| self.scheduler.is_scheduled(&self.job_name(id)))
            .count()
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<String, Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 作业名由触发器名与处理者标识组成，不同触发器共用调度器时互不影响
    fn job_name(&self, handler_id: &str) -> String {
        format!("{}-{handler_id}", self.name)
    }

    async fn close(&self, handler_id: &str, subscription: Subscription) {
        subscription.cancel.cancel();
        self.scheduler.unschedule(&self.job_name(handler_id));
        if tokio::time::timeout(UNREGISTER_TIMEOUT, subscription.finished)
            .await
            .is_err()
        {
            warn!("等待处理者 {} 的事件连接关闭超时", handler_id);
        }
    }
}


#[async_trait]
impl DistributionTrigger for RemoteEventDistributionTrigger {
    /// 同一处理者的连接作业仍在运行时为空操作
    async fn register(&self, handler: Arc<dyn DistributionRequestHandler>) -> DistributionResult<()> {
        let handler_id = handler.handler_id();
        let job = self.job_name(&handler_id);

        let stale = {
            let mut subscriptions = self.subscriptions();
            if subscriptions.contains_key(&handler_id) && self.scheduler.is_scheduled(&job) {
                debug!("处理者 {} 已有活动的事件连接", handler_id);
                return Ok(());
            }
            subscriptions.remove(&handler_id)
        };
        if let Some(stale) = stale {
            self.close(&handler_id, stale).await;
        }

        let cancel = CancellationToken::new();
        let (finished_tx, finished_rx) = oneshot::channel();
        let listener = Arc::clone(&self.listener);
        let job_cancel = cancel.clone();
        let job_handler = Arc::clone(&handler);
        let listen = async move {
            let _finished = finished_tx;
            listener.listen(job_handler, job_cancel).await;
        };

        let mut subscriptions = self.subscriptions();
        if subscriptions.contains_key(&handler_id) && self.scheduler.is_scheduled(&job) {
            debug!("处理者 {} 已被并发注册", handler_id);
            return Ok(());
        }
        self.scheduler.schedule_now(&job, Box::pin(listen))?;
        subscriptions.insert(
            handler_id.clone(),
            Subscription {
                cancel,
                finished: finished_rx,
            },
        );

        info!(
            "处理者 {} 注册到远程事件触发器 {}",
            handler_id, self.listener.endpoint
        );
        Ok(())
    }

    /// 未注册的处理者为空操作
    async fn unregister(&self, handler: &dyn DistributionRequestHandler) -> DistributionResult<()> {
        let handler_id = handler.handler_id();
        let subscription = self.subscriptions().remove(&handler_id);

        match subscription {
            Some(subscription) => {
                self.close(&handler_id, subscription).await;
                info!(
                    "处理者 {} 从远程事件触发器 {} 注销",
                    handler_id, self.listener.endpoint
                );
            }
            None => debug!("处理者 {} 未注册，忽略注销", handler_id),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for RemoteEventDistributionTrigger {
    fn drop(&mut self) {
        for (handler_id, subscription) in self.subscriptions().drain() {
            subscription.cancel.cancel();
            let job = self.job_name(&handler_id);
            self.scheduler.unschedule(&job);
        }
    }
}

enum ConnectionEnd {
    Cancelled,
    /// 服务端关闭了连接
    Closed,
    /// 连接过程中出错，`connected` 表示出错前是否已建立连接
    Failed {
        error: DistributionError,
        connected: bool,
    },
}

struct EventListener {
    endpoint: Url,
    path: String,
    action: DistributionActionType,
    reconnect: ReconnectPolicy,
    authentication: Arc<dyn AuthenticationProvider>,
    client: Arc<dyn EventStreamClient>,
}

impl EventListener {
    async fn listen(&self, handler: Arc<dyn DistributionRequestHandler>, cancel: CancellationToken) {
        let mut consecutive_failures: u32 = 0;

        loop {
            match self.connect_once(handler.as_ref(), &cancel).await {
                ConnectionEnd::Cancelled => {
                    debug!("事件连接已取消: {}", self.endpoint);
                    return;
                }
                ConnectionEnd::Closed => {
                    info!("事件连接被服务端关闭: {}", self.endpoint);
                    consecutive_failures = 0;
                }
                ConnectionEnd::Failed { error, connected } => {
                    warn!("事件连接失败 {}: {}", self.endpoint, error);
                    consecutive_failures = if connected {
                        0
                    } else {
                        consecutive_failures.saturating_add(1)
                    };
                }
            }

            let Some(delay) = self.reconnect.next_delay(consecutive_failures) else {
                info!("事件连接结束，不再自动重连: {}", self.endpoint);
                return;
            };

            debug!("{:?} 后重连事件流 {}", delay, self.endpoint);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect_once(
        &self,
        handler: &dyn DistributionRequestHandler,
        cancel: &CancellationToken,
    ) -> ConnectionEnd {
        let context = AuthenticationContext {
            endpoint: self.endpoint.clone(),
        };
        let credentials = match self.authentication.authenticate(&context) {
            Ok(credentials) => credentials,
            Err(error) => {
                return ConnectionEnd::Failed {
                    error,
                    connected: false,
                }
            }
        };

        let connecting = self.client.connect(&self.endpoint, &credentials);
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ConnectionEnd::Cancelled,
            result = connecting => match result {
                Ok(stream) => stream,
                Err(error) => return ConnectionEnd::Failed { error, connected: false },
            },
        };

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ConnectionEnd::Cancelled,
                chunk = stream.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    debug!("收到事件块 ({} bytes) 来自 {}", bytes.len(), self.endpoint);
                    let request = DistributionRequest::new(self.action, [self.path.as_str()]);
                    handler.handle(request).await;
                }
                Some(Err(error)) => {
                    return ConnectionEnd::Failed {
                        error,
                        connected: true,
                    }
                }
                None => return ConnectionEnd::Closed,
            }
        }
    }
}
