use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use distribution_core::{
    config::QueueConfig,
    traits::{DistributionQueue, DistributionQueueProcessor, DistributionQueueProvider},
    DistributionError, DistributionItem, DistributionResult, Statistics,
};
use tokio::sync::{Notify, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 队列从空变为非空时发出的信号
///
/// 待处理的队列名先记入集合，再唤醒调度任务；没有等待者时 `Notify` 会保留一个许可，不会丢失唤醒。
#[derive(Debug, Default)]
struct QueueSignals {
    ready: Mutex<HashSet<String>>,
    notify: Notify,
}

impl QueueSignals {
    fn ready(&self) -> MutexGuard<'_, HashSet<String>> {
        self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn signal(&self, queue_name: &str) {
        self.ready().insert(queue_name.to_string());
        self.notify.notify_one();
    }

    fn take_ready(&self) -> Vec<String> {
        self.ready().drain().collect()
    }
}

/// 内存分发队列
///
/// 先进先出，失败重试的条目放回队首以保持队内投递顺序。
#[derive(Debug)]
pub struct InMemoryQueue {
    name: String,
    items: Mutex<VecDeque<DistributionItem>>,
    statistics: Statistics,
    signals: Arc<QueueSignals>,
}

impl InMemoryQueue {
    fn new(name: impl Into<String>, signals: Arc<QueueSignals>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(VecDeque::new()),
            statistics: Statistics::new(),
            signals,
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<DistributionItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, item: DistributionItem, front: bool) {
        let was_empty = {
            let mut items = self.items();
            let was_empty = items.is_empty();
            if front {
                items.push_front(item);
            } else {
                items.push_back(item);
            }
            was_empty
        };

        if was_empty {
            self.signals.signal(&self.name);
        }
    }
}

#[async_trait]
impl DistributionQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, item: DistributionItem) -> DistributionResult<()> {
        debug!("条目 {} 入队: {}", item.id(), self.name);
        self.push(item, false);
        Ok(())
    }

    async fn take(&self) -> DistributionResult<Option<DistributionItem>> {
        Ok(self.items().pop_front())
    }

    async fn head(&self) -> DistributionResult<Option<DistributionItem>> {
        Ok(self.items().front().cloned())
    }

    async fn requeue(&self, item: DistributionItem) -> DistributionResult<()> {
        debug!(
            "条目 {} 重新排队: {} (attempts: {})",
            item.id(),
            self.name,
            item.attempt_count()
        );
        self.push(item, true);
        Ok(())
    }

    async fn remove(&self, item_id: &str) -> DistributionResult<Option<DistributionItem>> {
        let mut items = self.items();
        let position = items.iter().position(|item| item.id() == item_id);
        Ok(position.and_then(|index| items.remove(index)))
    }

    async fn clear(&self) -> DistributionResult<Vec<DistributionItem>> {
        Ok(self.items().drain(..).collect())
    }

    async fn len(&self) -> usize {
        self.items().len()
    }

    fn statistics(&self) -> &Statistics {
        &self.statistics
    }
}

type QueueMap = Arc<RwLock<HashMap<String, Arc<InMemoryQueue>>>>;

struct ProcessingHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// 内存队列提供者
///
/// 按名称惰性创建队列，并在启用处理后驱动队列排空：
/// 队列从空变为非空时触发回调，另外按 `poll_interval_ms` 周期检查仍有条目的队列。
/// 同一队列同一时刻最多只有一个排空任务。
pub struct InMemoryQueueProvider {
    queues: QueueMap,
    signals: Arc<QueueSignals>,
    config: QueueConfig,
    processing: tokio::sync::Mutex<Option<ProcessingHandle>>,
}

impl InMemoryQueueProvider {
    pub fn new(config: QueueConfig) -> Self {
        info!("创建内存队列提供者: {:?}", config);
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
            signals: Arc::new(QueueSignals::default()),
            config,
            processing: tokio::sync::Mutex::new(None),
        }
    }

    /// 当前是否注册了处理回调
    pub async fn is_processing(&self) -> bool {
        self.processing.lock().await.is_some()
    }

    async fn stop_processing(&self, handle: ProcessingHandle) {
        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            error!("队列处理任务异常退出: {}", e);
        }
    }
}

impl Default for InMemoryQueueProvider {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl Drop for InMemoryQueueProvider {
    fn drop(&mut self) {
        if let Some(handle) = self.processing.get_mut().take() {
            handle.cancel.cancel();
        }
    }
}

#[async_trait]
impl DistributionQueueProvider for InMemoryQueueProvider {
    async fn get_queue(&self, name: &str) -> DistributionResult<Arc<dyn DistributionQueue>> {
        if let Some(queue) = self.queues.read().await.get(name) {
            return Ok(Arc::clone(queue) as Arc<dyn DistributionQueue>);
        }

        let mut queues = self.queues.write().await;
        if let Some(queue) = queues.get(name) {
            return Ok(Arc::clone(queue) as Arc<dyn DistributionQueue>);
        }

        if self.config.max_queues > 0 && queues.len() >= self.config.max_queues {
            return Err(DistributionError::QueueProvider(format!(
                "队列数量已达上限 {}，无法创建队列 {name}",
                self.config.max_queues
            )));
        }

        let queue = Arc::new(InMemoryQueue::new(name, Arc::clone(&self.signals)));
        queues.insert(name.to_string(), Arc::clone(&queue));
        info!("创建队列: {}", name);
        Ok(queue as Arc<dyn DistributionQueue>)
    }

    async fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn enable_queue_processing(
        &self,
        processor: Arc<dyn DistributionQueueProcessor>,
    ) -> DistributionResult<()> {
        let mut processing = self.processing.lock().await;
        if let Some(previous) = processing.take() {
            warn!("队列处理回调已存在，替换为新的回调");
            self.stop_processing(previous).await;
        }

        let cancel = CancellationToken::new();
        let dispatcher = QueueDispatcher {
            queues: Arc::clone(&self.queues),
            signals: Arc::clone(&self.signals),
            processor,
            cancel: cancel.clone(),
            poll_interval: Duration::from_millis(self.config.poll_interval_ms),
        };
        let task = tokio::spawn(dispatcher.run());

        *processing = Some(ProcessingHandle { cancel, task });
        info!("队列处理已启用");
        Ok(())
    }

    async fn disable_queue_processing(&self) -> DistributionResult<()> {
        let handle = self.processing.lock().await.take();
        if let Some(handle) = handle {
            self.stop_processing(handle).await;
            info!("队列处理已停用");
        }
        Ok(())
    }
}

/// 队列排空调度任务
struct QueueDispatcher {
    queues: QueueMap,
    signals: Arc<QueueSignals>,
    processor: Arc<dyn DistributionQueueProcessor>,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl QueueDispatcher {
    async fn run(self) {
        let mut drains: JoinSet<String> = JoinSet::new();
        let mut running: HashSet<String> = HashSet::new();
        let mut pending: HashSet<String> = HashSet::new();
        let mut ticker = (!self.poll_interval.is_zero()).then(|| {
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        // 启用前已有条目的队列
        for name in self.non_empty_queues().await {
            self.start_drain(&name, &mut drains, &mut running, &mut pending)
                .await;
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.signals.notify.notified() => {
                    for name in self.signals.take_ready() {
                        self.start_drain(&name, &mut drains, &mut running, &mut pending).await;
                    }
                }
                Some(joined) = drains.join_next(), if !drains.is_empty() => {
                    match joined {
                        Ok(name) => {
                            running.remove(&name);
                            if pending.remove(&name) {
                                self.start_drain(&name, &mut drains, &mut running, &mut pending).await;
                            }
                        }
                        Err(e) => {
                            error!("队列排空任务异常退出: {}", e);
                            running.clear();
                            pending.clear();
                        }
                    }
                }
                _ = next_tick(&mut ticker) => {
                    for name in self.non_empty_queues().await {
                        if !running.contains(&name) {
                            self.start_drain(&name, &mut drains, &mut running, &mut pending).await;
                        }
                    }
                }
            }
        }

        // 等待进行中的排空结束，保证返回后不再有回调
        while let Some(joined) = drains.join_next().await {
            if let Err(e) = joined {
                error!("队列排空任务异常退出: {}", e);
            }
        }
        debug!("队列调度任务退出");
    }

    async fn start_drain(
        &self,
        name: &str,
        drains: &mut JoinSet<String>,
        running: &mut HashSet<String>,
        pending: &mut HashSet<String>,
    ) {
        if running.contains(name) {
            pending.insert(name.to_string());
            return;
        }

        let queue = match self.queues.read().await.get(name) {
            Some(queue) => Arc::clone(queue),
            None => return,
        };

        running.insert(name.to_string());
        let processor = Arc::clone(&self.processor);
        let cancel = self.cancel.child_token();
        let name = name.to_string();
        drains.spawn(async move {
            processor
                .process(queue as Arc<dyn DistributionQueue>, cancel)
                .await;
            name
        });
    }

    async fn non_empty_queues(&self) -> Vec<String> {
        let queues: Vec<Arc<InMemoryQueue>> = self.queues.read().await.values().cloned().collect();
        let mut names = Vec::new();
        for queue in queues {
            if !queue.is_empty().await {
                names.push(queue.name().to_string());
            }
        }
        names
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
