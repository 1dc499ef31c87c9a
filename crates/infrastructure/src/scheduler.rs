use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use distribution_core::{
    traits::{JobFactory, JobScheduler},
    DistributionError, DistributionResult,
};
use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// 基于tokio任务的作业调度器
///
/// 每个命名作业对应一个任务，`unschedule` 直接中止任务，
/// 被中止的作业在下一个挂起点停止。
#[derive(Debug, Default)]
pub struct TokioJobScheduler {
    jobs: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl TokioJobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_named(
        &self,
        name: &str,
        job: BoxFuture<'static, ()>,
    ) -> DistributionResult<()> {
        let runtime = Handle::try_current()
            .map_err(|e| DistributionError::Scheduler(format!("没有可用的tokio运行时: {e}")))?;

        let mut jobs = self.jobs();
        jobs.retain(|_, handle| !handle.is_finished());
        if jobs.contains_key(name) {
            return Err(DistributionError::Scheduler(format!("作业仍在运行: {name}")));
        }

        let job_name = name.to_string();
        let handle = runtime.spawn(async move {
            job.await;
            debug!("作业结束: {}", job_name);
        });
        jobs.insert(name.to_string(), handle);
        Ok(())
    }

    /// 当前仍在运行的作业数
    pub fn active_jobs(&self) -> usize {
        self.jobs()
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl JobScheduler for TokioJobScheduler {
    fn schedule_now(&self, name: &str, job: BoxFuture<'static, ()>) -> DistributionResult<()> {
        self.spawn_named(name, job)?;
        info!("调度作业: {}", name);
        Ok(())
    }

    fn schedule_periodic(
        &self,
        name: &str,
        period: Duration,
        job: JobFactory,
    ) -> DistributionResult<()> {
        if period.is_zero() {
            return Err(DistributionError::Scheduler(format!(
                "作业 {name} 的周期必须大于0"
            )));
        }

        let periodic = async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                job().await;
            }
        };
        self.spawn_named(name, Box::pin(periodic))?;
        info!("调度周期作业: {} (period: {:?})", name, period);
        Ok(())
    }

    fn unschedule(&self, name: &str) -> bool {
        match self.jobs().remove(name) {
            Some(handle) => {
                handle.abort();
                info!("取消作业: {}", name);
                true
            }
            None => false,
        }
    }

    fn is_scheduled(&self, name: &str) -> bool {
        self.jobs()
            .get(name)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for TokioJobScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.jobs().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_schedule_now_runs_once() {
        let scheduler = TokioJobScheduler::new();
        let (tx, rx) = tokio::sync::oneshot::channel();

        scheduler
            .schedule_now(
                "once",
                Box::pin(async move {
                    let _ = tx.send(42);
                }),
            )
            .unwrap();

        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_while_running() {
        let scheduler = TokioJobScheduler::new();
        scheduler
            .schedule_now("listen", Box::pin(std::future::pending::<()>()))
            .unwrap();

        assert!(scheduler.is_scheduled("listen"));
        let result = scheduler.schedule_now("listen", Box::pin(async {}));
        assert!(matches!(result, Err(DistributionError::Scheduler(_))));

        assert!(scheduler.unschedule("listen"));
        assert!(!scheduler.is_scheduled("listen"));
        assert!(!scheduler.unschedule("listen"));

        // 取消后可以用同一名称重新调度
        scheduler
            .schedule_now("listen", Box::pin(async {}))
            .unwrap();
    }

    #[tokio::test]
    async fn test_finished_job_name_is_reusable() {
        let scheduler = TokioJobScheduler::new();
        scheduler.schedule_now("quick", Box::pin(async {})).unwrap();

        for _ in 0..50 {
            if !scheduler.is_scheduled("quick") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!scheduler.is_scheduled("quick"));
        assert!(scheduler.schedule_now("quick", Box::pin(async {})).is_ok());
    }

    #[tokio::test]
    async fn test_schedule_periodic() {
        let scheduler = TokioJobScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let job_counter = Arc::clone(&counter);
        let factory: JobFactory = Arc::new(move || {
            let counter = Arc::clone(&job_counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });

        scheduler
            .schedule_periodic("tick", Duration::from_millis(20), factory)
            .unwrap();
        assert!(scheduler
            .schedule_periodic("zero", Duration::ZERO, Arc::new(|| async {}.boxed()))
            .is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(counter.load(Ordering::SeqCst) >= 2);

        assert!(scheduler.unschedule("tick"));
        let after_unschedule = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(counter.load(Ordering::SeqCst), after_unschedule);
        assert_eq!(scheduler.active_jobs(), 0);
    }

    #[test]
    fn test_schedule_without_runtime_fails() {
        let scheduler = TokioJobScheduler::new();
        let result = scheduler.schedule_now("orphan", Box::pin(async {}));
        assert!(matches!(result, Err(DistributionError::Scheduler(_))));
    }
}
