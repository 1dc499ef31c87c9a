use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use distribution_core::{
    config::AgentConfig,
    traits::{
        AuthorizationContext, AuthorizationDecision, DispatchingStrategy, DistributionQueue,
        DistributionQueueProcessor, DistributionQueueProvider, DistributionRequestHandler,
        DistributionTransport, DistributionTrigger, RequestAuthorizationStrategy,
    },
    DistributionError, DistributionItem, DistributionPackage, DistributionRequest,
    DistributionResult, Statistics,
};
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::retry::RetryPolicy;
use crate::strategies::dispatching_strategy_from_config;

/// Agent的协作者
///
/// 由外层编排代码显式构造后传入，Agent内部不做任何服务查找。
/// 未提供分派策略时按 `AgentConfig::dispatching` 创建。
#[derive(Default, Clone)]
pub struct AgentComponents {
    pub transport: Option<Arc<dyn DistributionTransport>>,
    pub authorization: Option<Arc<dyn RequestAuthorizationStrategy>>,
    pub queue_provider: Option<Arc<dyn DistributionQueueProvider>>,
    pub dispatching: Option<Arc<dyn DispatchingStrategy>>,
    pub triggers: Vec<Arc<dyn DistributionTrigger>>,
}

impl AgentComponents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(mut self, transport: Arc<dyn DistributionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_authorization(
        mut self,
        authorization: Arc<dyn RequestAuthorizationStrategy>,
    ) -> Self {
        self.authorization = Some(authorization);
        self
    }

    pub fn with_queue_provider(mut self, queue_provider: Arc<dyn DistributionQueueProvider>) -> Self {
        self.queue_provider = Some(queue_provider);
        self
    }

    pub fn with_dispatching(mut self, dispatching: Arc<dyn DispatchingStrategy>) -> Self {
        self.dispatching = Some(dispatching);
        self
    }

    pub fn with_trigger(mut self, trigger: Arc<dyn DistributionTrigger>) -> Self {
        self.triggers.push(trigger);
        self
    }
}

/// 一个入队成功的条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedItem {
    pub queue_name: String,
    pub item_id: String,
}

/// `accept` 的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionResponse {
    pub items: Vec<QueuedItem>,
}

impl DistributionResponse {
    pub fn item_ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.item_id.as_str()).collect()
    }
}

enum DeliveryOutcome {
    Delivered,
    Cancelled,
    Failed(DistributionError),
}

/// 分发Agent
///
/// 接收请求、授权、分派到队列，非被动模式下排空队列并通过传输投递。
/// 状态：创建后处于禁用状态，`enable` 注册队列处理回调并向触发器注册自己，`disable` 反向撤销。
pub struct SimpleDistributionAgent {
    name: String,
    is_passive: bool,
    service_name: Option<String>,
    queue_names: Vec<String>,
    retry: RetryPolicy,
    transport: Arc<dyn DistributionTransport>,
    authorization: Arc<dyn RequestAuthorizationStrategy>,
    queue_provider: Arc<dyn DistributionQueueProvider>,
    dispatching: Arc<dyn DispatchingStrategy>,
    statistics: Statistics,
    enabled: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
    triggers: Mutex<Vec<Arc<dyn DistributionTrigger>>>,
    in_flight: Mutex<HashMap<String, CancellationToken>>,
    /// 出队与登记取消令牌在同一把锁下完成，取消不会错过正在交接的条目
    claims: tokio::sync::Mutex<()>,
    handler: Arc<AgentRequestHandler>,
    processor: Arc<AgentQueueProcessor>,
}

impl SimpleDistributionAgent {
    /// 校验配置与协作者并创建处于禁用状态的Agent
    pub fn new(config: &AgentConfig, components: AgentComponents) -> DistributionResult<Arc<Self>> {
        config.validate()?;

        let transport = components.transport.ok_or_else(|| {
            DistributionError::InvalidAgentConfig(format!("agent {} 缺少传输实现", config.name))
        })?;
        let authorization = components.authorization.ok_or_else(|| {
            DistributionError::InvalidAgentConfig(format!("agent {} 缺少授权策略", config.name))
        })?;
        let queue_provider = components.queue_provider.ok_or_else(|| {
            DistributionError::InvalidAgentConfig(format!("agent {} 缺少队列提供者", config.name))
        })?;
        let dispatching = components
            .dispatching
            .unwrap_or_else(|| dispatching_strategy_from_config(&config.dispatching));

        let agent = Arc::new_cyclic(|weak: &Weak<SimpleDistributionAgent>| Self {
            name: config.name.clone(),
            is_passive: config.is_passive,
            service_name: config.service_name.clone(),
            queue_names: config.queues.clone(),
            retry: RetryPolicy::new(config.retry.clone()),
            transport,
            authorization,
            queue_provider,
            dispatching,
            statistics: Statistics::new(),
            enabled: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
            triggers: Mutex::new(components.triggers),
            in_flight: Mutex::new(HashMap::new()),
            claims: tokio::sync::Mutex::new(()),
            handler: Arc::new(AgentRequestHandler {
                id: format!("agent:{}", config.name),
                agent: weak.clone(),
            }),
            processor: Arc::new(AgentQueueProcessor {
                agent: weak.clone(),
            }),
        });

        info!(
            "创建Agent: {} (passive: {}, queues: {:?}, dispatching: {}, transport: {}, authorization: {})",
            agent.name,
            agent.is_passive,
            agent.queue_names,
            agent.dispatching.name(),
            agent.transport.name(),
            agent.authorization.name()
        );
        Ok(agent)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_passive(&self) -> bool {
        self.is_passive
    }

    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn queue_names(&self) -> &[String] {
        &self.queue_names
    }

    /// 触发器使用的请求处理者
    pub fn request_handler(&self) -> Arc<dyn DistributionRequestHandler> {
        self.handler.clone()
    }

    /// 启用Agent；已启用时为空操作
    ///
    /// 触发器注册失败不会回滚启用，第一个错误会在其余触发器注册完成后返回。
    pub async fn enable(&self) -> DistributionResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_enabled() {
            return Ok(());
        }

        self.enabled.store(true, Ordering::SeqCst);

        if !self.is_passive {
            if let Err(e) = self
                .queue_provider
                .enable_queue_processing(self.processor.clone())
                .await
            {
                self.enabled.store(false, Ordering::SeqCst);
                error!("Agent {} 注册队列处理失败: {}", self.name, e);
                return Err(e);
            }
        }

        let mut first_error = None;
        for trigger in self.triggers() {
            if let Err(e) = trigger.register(self.request_handler()).await {
                warn!("Agent {} 注册到触发器 {} 失败: {}", self.name, trigger.name(), e);
                first_error.get_or_insert(e);
            }
        }

        info!("Agent已启用: {}", self.name);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 停用Agent；已停用时为空操作
    ///
    /// 进行中的投递不会被中止，返回前等待其自然结束。
    pub async fn disable(&self) -> DistributionResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.is_enabled() {
            return Ok(());
        }

        self.enabled.store(false, Ordering::SeqCst);

        for trigger in self.triggers() {
            if let Err(e) = trigger.unregister(self.handler.as_ref()).await {
                warn!("Agent {} 从触发器 {} 注销失败: {}", self.name, trigger.name(), e);
            }
        }

        if !self.is_passive {
            self.queue_provider.disable_queue_processing().await?;
        }

        info!("Agent已停用: {}", self.name);
        Ok(())
    }

    /// 以Agent自己的服务身份接收请求
    pub async fn accept(&self, request: DistributionRequest) -> DistributionResult<DistributionResponse> {
        let context = AuthorizationContext::default().with_service_name(self.service_name.clone());
        self.accept_with_context(request, &context).await
    }

    /// 授权、分派并入队
    ///
    /// 请求被拒绝时不产生任何统计变化。
    pub async fn accept_with_context(
        &self,
        request: DistributionRequest,
        context: &AuthorizationContext,
    ) -> DistributionResult<DistributionResponse> {
        if !self.is_enabled() {
            return Err(DistributionError::AgentDisabled {
                agent: self.name.clone(),
            });
        }

        if let AuthorizationDecision::Denied(reason) = self.authorization.authorize(&request, context) {
            warn!("Agent {} 拒绝请求 {}: {}", self.name, request, reason);
            return Err(DistributionError::UnauthorizedRequest(reason));
        }

        let targets = self.dispatching.dispatch(&request, &self.queue_names)?;
        let request = Arc::new(request);
        let mut response = DistributionResponse::default();

        for queue_name in targets {
            let queue = self.queue_provider.get_queue(&queue_name).await?;
            let item = DistributionItem::new(Arc::clone(&request), queue_name.as_str());
            let item_id = item.id().to_string();

            // 先计数再入队，排空方可能在入队后立即取走条目
            queue.statistics().inc_queued();
            self.statistics.inc_queued();
            if let Err(e) = queue.enqueue(item).await {
                queue.statistics().dec_queued();
                self.statistics.dec_queued();
                return Err(e);
            }

            debug!("请求 {} 入队 {} (item: {})", request, queue_name, item_id);
            response.items.push(QueuedItem {
                queue_name,
                item_id,
            });
        }

        Ok(response)
    }

    /// 注册触发器；Agent已启用时立即向其注册
    pub async fn add_trigger(&self, trigger: Arc<dyn DistributionTrigger>) -> DistributionResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.lock_triggers().push(Arc::clone(&trigger));
        if self.is_enabled() {
            trigger.register(self.request_handler()).await?;
        }
        Ok(())
    }

    /// 按名称移除触发器，返回是否存在
    pub async fn remove_trigger(&self, trigger_name: &str) -> DistributionResult<bool> {
        let _lifecycle = self.lifecycle.lock().await;
        let removed = {
            let mut triggers = self.lock_triggers();
            let position = triggers.iter().position(|t| t.name() == trigger_name);
            position.map(|index| triggers.remove(index))
        };

        match removed {
            Some(trigger) => {
                if self.is_enabled() {
                    trigger.unregister(self.handler.as_ref()).await?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 把Agent作为请求处理者注册到给定触发器
    pub async fn enable_trigger(&self, trigger: &dyn DistributionTrigger) -> DistributionResult<()> {
        trigger.register(self.request_handler()).await
    }

    /// 从给定触发器注销Agent
    pub async fn disable_trigger(&self, trigger: &dyn DistributionTrigger) -> DistributionResult<()> {
        trigger.unregister(self.handler.as_ref()).await
    }

    pub fn triggers(&self) -> Vec<Arc<dyn DistributionTrigger>> {
        self.lock_triggers().clone()
    }

    /// 取消条目：进行中的投递被中断，排队中的条目被移除，两者都记为取消
    pub async fn cancel_item(&self, item_id: &str) -> DistributionResult<bool> {
        let _claims = self.claims.lock().await;
        let in_flight = self.lock_in_flight().get(item_id).cloned();
        if let Some(token) = in_flight {
            token.cancel();
            info!("取消进行中的条目: {}", item_id);
            return Ok(true);
        }

        for queue_name in self.queue_provider.queue_names().await {
            let queue = self.queue_provider.get_queue(&queue_name).await?;
            if let Some(item) = queue.remove(item_id).await? {
                let waiting = item.waiting_time(Utc::now());
                for statistics in [queue.statistics(), &self.statistics] {
                    statistics.add_active(waiting);
                    statistics.cancelled_job();
                }
                counter!("distribution_items_cancelled_total", "agent" => self.name.clone())
                    .increment(1);
                info!("取消排队中的条目: {} (queue: {})", item_id, queue_name);
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// 清空队列，返回移除的条目数
    pub async fn clear_queue(&self, queue_name: &str) -> DistributionResult<usize> {
        let queue = self.queue_provider.get_queue(queue_name).await?;
        let removed = queue.clear().await?;
        queue.statistics().clear_queued();
        for _ in &removed {
            self.statistics.dec_queued();
        }
        info!("清空队列 {}: 移除 {} 个条目", queue_name, removed.len());
        Ok(removed.len())
    }

    /// 远端从被动Agent的队列拉取下一个分发包
    pub async fn export_package(
        &self,
        queue_name: &str,
    ) -> DistributionResult<Option<DistributionPackage>> {
        if !self.is_enabled() {
            return Err(DistributionError::AgentDisabled {
                agent: self.name.clone(),
            });
        }

        let queue = self.queue_provider.get_queue(queue_name).await?;
        let item = match queue.take().await? {
            Some(item) => item,
            None => return Ok(None),
        };

        let waiting = item.waiting_time(Utc::now());
        for statistics in [queue.statistics(), &self.statistics] {
            statistics.add_active(waiting);
            statistics.finished_job(Duration::ZERO);
        }

        debug!("导出条目 {} (queue: {})", item.id(), queue_name);
        Ok(Some(DistributionPackage::from_item(&item)))
    }

    /// Agent级统计
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// 指定队列的统计副本
    pub async fn queue_statistics(&self, queue_name: &str) -> DistributionResult<Statistics> {
        let queue = self.queue_provider.get_queue(queue_name).await?;
        Ok(queue.statistics().copy())
    }

    /// 合并所有已创建队列的统计
    pub async fn merged_statistics(&self) -> DistributionResult<Statistics> {
        let merged = Statistics::with_start_time(self.statistics.start_time());
        for queue_name in self.queue_provider.queue_names().await {
            let queue = self.queue_provider.get_queue(&queue_name).await?;
            merged.add(queue.statistics());
        }
        Ok(merged)
    }

    /// 排空队列，直到队列为空、处理被取消或Agent停用
    async fn drain(&self, queue: Arc<dyn DistributionQueue>, cancel: CancellationToken) {
        debug!("开始排空队列: {}", queue.name());
        while !cancel.is_cancelled() && self.is_enabled() {
            let Some((item, token)) = self.claim(queue.as_ref()).await else {
                break;
            };
            self.process_item(queue.as_ref(), item, token, &cancel).await;
        }
        debug!("结束排空队列: {}", queue.name());
    }

    /// 取出下一个条目并登记其取消令牌
    async fn claim(
        &self,
        queue: &dyn DistributionQueue,
    ) -> Option<(DistributionItem, CancellationToken)> {
        let _claims = self.claims.lock().await;
        let item = match queue.take().await {
            Ok(Some(item)) => item,
            Ok(None) => return None,
            Err(e) => {
                warn!("从队列 {} 取条目失败: {}", queue.name(), e);
                return None;
            }
        };
        let token = CancellationToken::new();
        self.lock_in_flight()
            .insert(item.id().to_string(), token.clone());
        Some((item, token))
    }

    async fn process_item(
        &self,
        queue: &dyn DistributionQueue,
        mut item: DistributionItem,
        token: CancellationToken,
        cancel: &CancellationToken,
    ) {
        let waiting = item.waiting_time(Utc::now());
        queue.statistics().add_active(waiting);
        self.statistics.add_active(waiting);
        let attempt = item.record_attempt();

        let outcome = self.deliver(&item, &token).await;
        let labels = [
            ("agent", self.name.clone()),
            ("queue", queue.name().to_string()),
        ];

        match outcome {
            (DeliveryOutcome::Delivered, elapsed) => {
                queue.statistics().finished_job(elapsed);
                self.statistics.finished_job(elapsed);
                counter!("distribution_items_delivered_total", &labels).increment(1);
                histogram!("distribution_delivery_duration_ms", &labels)
                    .record(elapsed.as_millis() as f64);
                debug!("条目 {} 投递成功 (attempt: {})", item.id(), attempt);
                self.lock_in_flight().remove(item.id());
            }
            (DeliveryOutcome::Cancelled, _) => {
                queue.statistics().cancelled_job();
                self.statistics.cancelled_job();
                counter!("distribution_items_cancelled_total", &labels).increment(1);
                info!("条目 {} 的投递已取消", item.id());
                self.lock_in_flight().remove(item.id());
            }
            (DeliveryOutcome::Failed(e), _) => {
                queue.statistics().failed_job();
                self.statistics.failed_job();
                counter!("distribution_items_failed_total", &labels).increment(1);

                if !self.retry.should_retry(attempt) {
                    self.lock_in_flight().remove(item.id());
                    queue.statistics().dec_queued();
                    self.statistics.dec_queued();
                    counter!("distribution_items_dropped_total", &labels).increment(1);
                    error!(
                        "条目 {} 投递失败 {} 次，已丢弃: {} (request: {})",
                        item.id(),
                        attempt,
                        e,
                        item.request()
                    );
                    return;
                }

                let delay = self.retry.delay_for(attempt);
                warn!(
                    "条目 {} 投递失败 (attempt {}/{}): {}，{:?} 后重试",
                    item.id(),
                    attempt,
                    self.retry.max_attempts(),
                    e,
                    delay
                );
                let item_id = item.id().to_string();
                {
                    let _claims = self.claims.lock().await;
                    self.lock_in_flight().remove(&item_id);
                    if token.is_cancelled() {
                        for statistics in [queue.statistics(), &self.statistics] {
                            statistics.add_active(Duration::ZERO);
                            statistics.cancelled_job();
                        }
                        counter!("distribution_items_cancelled_total", &labels).increment(1);
                        info!("条目 {} 在重试前已取消", item_id);
                        return;
                    }
                    if let Err(requeue_error) = queue.requeue(item).await {
                        queue.statistics().dec_queued();
                        self.statistics.dec_queued();
                        counter!("distribution_items_dropped_total", &labels).increment(1);
                        error!("条目 {} 重新排队失败，已丢弃: {}", item_id, requeue_error);
                        return;
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    async fn deliver(
        &self,
        item: &DistributionItem,
        token: &CancellationToken,
    ) -> (DeliveryOutcome, Duration) {
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => DeliveryOutcome::Cancelled,
            result = self.transport.deliver(item.request()) => match result {
                Ok(()) => DeliveryOutcome::Delivered,
                Err(e) => DeliveryOutcome::Failed(e),
            },
        };
        (outcome, started.elapsed())
    }

    fn lock_triggers(&self) -> MutexGuard<'_, Vec<Arc<dyn DistributionTrigger>>> {
        self.triggers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Agent在触发器中的身份
struct AgentRequestHandler {
    id: String,
    agent: Weak<SimpleDistributionAgent>,
}

#[async_trait]
impl DistributionRequestHandler for AgentRequestHandler {
    fn handler_id(&self) -> String {
        self.id.clone()
    }

    async fn handle(&self, request: DistributionRequest) {
        let Some(agent) = self.agent.upgrade() else {
            debug!("Agent已释放，忽略请求 {}", request);
            return;
        };

        if let Err(e) = agent.accept(request).await {
            warn!("Agent {} 处理触发请求失败: {}", agent.name, e);
        }
    }
}

struct AgentQueueProcessor {
    agent: Weak<SimpleDistributionAgent>,
}

#[async_trait]
impl DistributionQueueProcessor for AgentQueueProcessor {
    async fn process(&self, queue: Arc<dyn DistributionQueue>, cancel: CancellationToken) {
        if let Some(agent) = self.agent.upgrade() {
            agent.drain(queue, cancel).await;
        }
    }
}
