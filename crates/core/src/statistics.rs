//! 作业统计聚合
//!
//! 每个实例用一把互斥锁保护全部字段，所有状态迁移、`copy` 与 `add`
//! 相对彼此都是原子的，跨字段不变量（如平均值重算）不会被并发更新打破。

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
struct StatisticsState {
    active_jobs: u64,
    queued_jobs: u64,
    finished_jobs: u64,
    failed_jobs: u64,
    cancelled_jobs: u64,
    last_activated: Option<DateTime<Utc>>,
    last_finished: Option<DateTime<Utc>>,
    waiting_time_ms: u64,
    waiting_count: u64,
    processing_time_ms: u64,
    processing_count: u64,
    average_waiting_time_ms: u64,
    average_processing_time_ms: u64,
}

impl StatisticsState {
    fn new() -> Self {
        Self {
            active_jobs: 0,
            queued_jobs: 0,
            finished_jobs: 0,
            failed_jobs: 0,
            cancelled_jobs: 0,
            last_activated: None,
            last_finished: None,
            waiting_time_ms: 0,
            waiting_count: 0,
            processing_time_ms: 0,
            processing_count: 0,
            average_waiting_time_ms: 0,
            average_processing_time_ms: 0,
        }
    }

    fn recompute_averages(&mut self) {
        self.average_waiting_time_ms = mean(self.waiting_time_ms, self.waiting_count);
        self.average_processing_time_ms = mean(self.processing_time_ms, self.processing_count);
    }

    fn merge(&mut self, other: &StatisticsState) {
        self.active_jobs += other.active_jobs;
        self.queued_jobs += other.queued_jobs;
        self.finished_jobs += other.finished_jobs;
        self.failed_jobs += other.failed_jobs;
        self.cancelled_jobs += other.cancelled_jobs;
        self.last_activated = self.last_activated.max(other.last_activated);
        self.last_finished = self.last_finished.max(other.last_finished);
        self.waiting_time_ms += other.waiting_time_ms;
        self.waiting_count += other.waiting_count;
        self.processing_time_ms += other.processing_time_ms;
        self.processing_count += other.processing_count;
        self.recompute_averages();
    }
}

/// 总量为零时平均值定义为0
fn mean(total: u64, count: u64) -> u64 {
    if count == 0 {
        0
    } else {
        total / count
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// 作业生命周期统计
///
/// 只能通过固定的几个迁移操作修改：
/// `inc_queued`、`dec_queued`、`clear_queued`、`add_active`、
/// `finished_job`、`failed_job`、`cancelled_job`。
#[derive(Debug)]
pub struct Statistics {
    start_time: DateTime<Utc>,
    state: Mutex<StatisticsState>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::with_start_time(Utc::now())
    }

    pub fn with_start_time(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            state: Mutex::new(StatisticsState::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, StatisticsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn number_of_processed_jobs(&self) -> u64 {
        let state = self.state();
        state.finished_jobs + state.failed_jobs + state.cancelled_jobs
    }

    pub fn number_of_active_jobs(&self) -> u64 {
        self.state().active_jobs
    }

    pub fn number_of_queued_jobs(&self) -> u64 {
        self.state().queued_jobs
    }

    pub fn number_of_jobs(&self) -> u64 {
        let state = self.state();
        state.active_jobs + state.queued_jobs
    }

    pub fn number_of_finished_jobs(&self) -> u64 {
        self.state().finished_jobs
    }

    pub fn number_of_failed_jobs(&self) -> u64 {
        self.state().failed_jobs
    }

    pub fn number_of_cancelled_jobs(&self) -> u64 {
        self.state().cancelled_jobs
    }

    pub fn average_waiting_time(&self) -> Duration {
        Duration::from_millis(self.state().average_waiting_time_ms)
    }

    pub fn average_processing_time(&self) -> Duration {
        Duration::from_millis(self.state().average_processing_time_ms)
    }

    pub fn last_activated_job_time(&self) -> Option<DateTime<Utc>> {
        self.state().last_activated
    }

    pub fn last_finished_job_time(&self) -> Option<DateTime<Utc>> {
        self.state().last_finished
    }

    /// 新条目入队
    pub fn inc_queued(&self) {
        self.state().queued_jobs += 1;
    }

    /// 条目未经处理即离开队列
    pub fn dec_queued(&self) {
        let mut state = self.state();
        state.queued_jobs = state.queued_jobs.saturating_sub(1);
    }

    pub fn clear_queued(&self) {
        self.state().queued_jobs = 0;
    }

    /// 条目从排队转为活跃，`waiting` 为其在队列中停留的时间
    pub fn add_active(&self, waiting: Duration) {
        let mut state = self.state();
        state.queued_jobs = state.queued_jobs.saturating_sub(1);
        state.active_jobs += 1;
        state.waiting_count += 1;
        state.waiting_time_ms += duration_ms(waiting);
        state.recompute_averages();
        state.last_activated = Some(Utc::now());
    }

    /// 活跃条目处理成功，`processing` 为处理耗时
    pub fn finished_job(&self, processing: Duration) {
        let mut state = self.state();
        state.last_finished = Some(Utc::now());
        state.processing_time_ms += duration_ms(processing);
        state.processing_count += 1;
        state.recompute_averages();
        state.finished_jobs += 1;
        state.active_jobs = state.active_jobs.saturating_sub(1);
    }

    /// 活跃条目处理失败并重新排队
    pub fn failed_job(&self) {
        let mut state = self.state();
        state.failed_jobs += 1;
        state.active_jobs = state.active_jobs.saturating_sub(1);
        state.queued_jobs += 1;
    }

    pub fn cancelled_job(&self) {
        let mut state = self.state();
        state.cancelled_jobs += 1;
        state.active_jobs = state.active_jobs.saturating_sub(1);
    }

    /// 把 `other` 的计数合并进来：计数相加，时间戳取较大值，平均值按合并后的总量重算
    ///
    /// 两把锁按实例地址的固定顺序获取，A.add(B) 与 B.add(A) 并发执行不会死锁。
    pub fn add(&self, other: &Statistics) {
        if std::ptr::eq(self, other) {
            let mut state = self.state();
            let snapshot = state.clone();
            state.merge(&snapshot);
            return;
        }

        let self_first = (self as *const Statistics as usize) < (other as *const Statistics as usize);
        if self_first {
            let mut mine = self.state();
            let theirs = other.state();
            mine.merge(&theirs);
        } else {
            let theirs = other.state();
            let mut mine = self.state();
            mine.merge(&theirs);
        }
    }

    /// 深拷贝，之后对原实例的修改不会影响副本
    pub fn copy(&self) -> Statistics {
        let state = self.state().clone();
        Statistics {
            start_time: self.start_time,
            state: Mutex::new(state),
        }
    }

    /// 一致性快照，供外部监控读取
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let state = self.state();
        StatisticsSnapshot {
            start_time: self.start_time,
            active_jobs: state.active_jobs,
            queued_jobs: state.queued_jobs,
            finished_jobs: state.finished_jobs,
            failed_jobs: state.failed_jobs,
            cancelled_jobs: state.cancelled_jobs,
            number_of_jobs: state.active_jobs + state.queued_jobs,
            number_of_processed_jobs: state.finished_jobs + state.failed_jobs + state.cancelled_jobs,
            last_activated_job_time: state.last_activated,
            last_finished_job_time: state.last_finished,
            average_waiting_time_ms: state.average_waiting_time_ms,
            average_processing_time_ms: state.average_processing_time_ms,
        }
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

/// 统计快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub start_time: DateTime<Utc>,
    pub active_jobs: u64,
    pub queued_jobs: u64,
    pub finished_jobs: u64,
    pub failed_jobs: u64,
    pub cancelled_jobs: u64,
    pub number_of_jobs: u64,
    pub number_of_processed_jobs: u64,
    pub last_activated_job_time: Option<DateTime<Utc>>,
    pub last_finished_job_time: Option<DateTime<Utc>>,
    pub average_waiting_time_ms: u64,
    pub average_processing_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn assert_invariants(stats: &Statistics) {
        let snapshot = stats.snapshot();
        assert_eq!(
            snapshot.active_jobs + snapshot.queued_jobs,
            stats.number_of_jobs()
        );
        assert_eq!(
            snapshot.finished_jobs + snapshot.failed_jobs + snapshot.cancelled_jobs,
            stats.number_of_processed_jobs()
        );
    }

    #[test]
    fn test_invariants_hold_after_each_transition() {
        let stats = Statistics::new();
        let steps: Vec<Box<dyn Fn(&Statistics)>> = vec![
            Box::new(|s| s.inc_queued()),
            Box::new(|s| s.inc_queued()),
            Box::new(|s| s.add_active(Duration::from_millis(10))),
            Box::new(|s| s.finished_job(Duration::from_millis(30))),
            Box::new(|s| s.inc_queued()),
            Box::new(|s| s.add_active(Duration::from_millis(20))),
            Box::new(|s| s.failed_job()),
            Box::new(|s| s.add_active(Duration::from_millis(5))),
            Box::new(|s| s.cancelled_job()),
        ];
        for step in steps {
            step(&stats);
            assert_invariants(&stats);
        }

        assert_eq!(stats.number_of_finished_jobs(), 1);
        assert_eq!(stats.number_of_failed_jobs(), 1);
        assert_eq!(stats.number_of_cancelled_jobs(), 1);
        assert_eq!(stats.number_of_processed_jobs(), 3);
        assert_eq!(stats.number_of_queued_jobs(), 1);
        assert_eq!(stats.number_of_active_jobs(), 0);
    }

    #[test]
    fn test_averages_are_zero_without_samples() {
        let stats = Statistics::new();
        assert_eq!(stats.average_waiting_time(), Duration::ZERO);
        assert_eq!(stats.average_processing_time(), Duration::ZERO);
        assert!(stats.last_activated_job_time().is_none());
        assert!(stats.last_finished_job_time().is_none());
    }

    #[test]
    fn test_averages_are_arithmetic_means() {
        let stats = Statistics::new();
        stats.inc_queued();
        stats.inc_queued();
        stats.add_active(Duration::from_millis(100));
        stats.add_active(Duration::from_millis(300));
        stats.finished_job(Duration::from_millis(50));
        stats.finished_job(Duration::from_millis(150));

        assert_eq!(stats.average_waiting_time(), Duration::from_millis(200));
        assert_eq!(stats.average_processing_time(), Duration::from_millis(100));
        assert!(stats.last_activated_job_time().is_some());
        assert!(stats.last_finished_job_time().is_some());
    }

    #[test]
    fn test_failed_job_requeues() {
        let stats = Statistics::new();
        for _ in 0..3 {
            stats.inc_queued();
            stats.add_active(Duration::ZERO);
        }
        assert_eq!(stats.number_of_active_jobs(), 3);
        let queued_before = stats.number_of_queued_jobs();

        stats.failed_job();
        stats.failed_job();
        stats.failed_job();

        assert_eq!(stats.number_of_active_jobs(), 0);
        assert_eq!(stats.number_of_failed_jobs(), 3);
        assert_eq!(stats.number_of_queued_jobs(), queued_before + 3);
    }

    #[test]
    fn test_dec_and_clear_queued() {
        let stats = Statistics::new();
        stats.inc_queued();
        stats.inc_queued();
        stats.inc_queued();
        stats.dec_queued();
        assert_eq!(stats.number_of_queued_jobs(), 2);
        stats.clear_queued();
        assert_eq!(stats.number_of_queued_jobs(), 0);
        stats.dec_queued();
        assert_eq!(stats.number_of_queued_jobs(), 0);
    }

    #[test]
    fn test_copy_is_independent() {
        let original = Statistics::new();
        original.inc_queued();
        original.add_active(Duration::from_millis(40));
        original.finished_job(Duration::from_millis(60));
        original.inc_queued();

        let copy = original.copy();
        let before = copy.snapshot();

        original.inc_queued();
        original.add_active(Duration::from_millis(1000));
        original.failed_job();
        original.cancelled_job();

        assert_eq!(copy.snapshot(), before);
        assert_eq!(copy.start_time(), original.start_time());
        assert_ne!(original.snapshot(), before);
    }

    #[test]
    fn test_add_is_commutative_for_counts() {
        let build = || {
            let a = Statistics::new();
            a.inc_queued();
            a.inc_queued();
            a.add_active(Duration::from_millis(10));
            a.finished_job(Duration::from_millis(20));

            let b = Statistics::new();
            b.inc_queued();
            b.add_active(Duration::from_millis(30));
            b.failed_job();
            b.inc_queued();
            (a, b)
        };

        let (a1, b1) = build();
        a1.add(&b1);
        let (a2, b2) = build();
        b2.add(&a2);

        let left = a1.snapshot();
        let right = b2.snapshot();
        assert_eq!(left.queued_jobs, right.queued_jobs);
        assert_eq!(left.active_jobs, right.active_jobs);
        assert_eq!(left.finished_jobs, right.finished_jobs);
        assert_eq!(left.failed_jobs, right.failed_jobs);
        assert_eq!(left.cancelled_jobs, right.cancelled_jobs);
        assert_eq!(left.average_waiting_time_ms, right.average_waiting_time_ms);
        assert_eq!(left.average_processing_time_ms, right.average_processing_time_ms);
        assert_eq!(left.average_waiting_time_ms, 20);
    }

    #[test]
    fn test_add_takes_latest_timestamps() {
        let a = Statistics::new();
        a.inc_queued();
        a.add_active(Duration::ZERO);
        let a_activated = a.last_activated_job_time();

        std::thread::sleep(Duration::from_millis(5));

        let b = Statistics::new();
        b.inc_queued();
        b.add_active(Duration::ZERO);
        b.finished_job(Duration::ZERO);
        let b_activated = b.last_activated_job_time();

        a.add(&b);
        assert_eq!(a.last_activated_job_time(), a_activated.max(b_activated));
        assert_eq!(a.last_finished_job_time(), b.last_finished_job_time());
    }

    #[test]
    fn test_add_with_empty_statistics_keeps_zero_averages() {
        let a = Statistics::new();
        let b = Statistics::new();
        a.add(&b);
        assert_eq!(a.average_waiting_time(), Duration::ZERO);
        assert_eq!(a.average_processing_time(), Duration::ZERO);
    }

    #[test]
    fn test_add_self_doubles_counts() {
        let a = Statistics::new();
        a.inc_queued();
        a.inc_queued();
        a.add(&a);
        assert_eq!(a.number_of_queued_jobs(), 4);
    }

    #[test]
    fn test_concurrent_cross_merge_does_not_deadlock() {
        let a = Arc::new(Statistics::new());
        let b = Arc::new(Statistics::new());
        a.inc_queued();
        b.inc_queued();

        let mut handles = Vec::new();
        for i in 0..4 {
            let (x, y) = if i % 2 == 0 {
                (Arc::clone(&a), Arc::clone(&b))
            } else {
                (Arc::clone(&b), Arc::clone(&a))
            };
            handles.push(std::thread::spawn(move || {
                for _ in 0..10 {
                    x.add(&y);
                    x.inc_queued();
                    x.add_active(Duration::from_millis(1));
                    x.finished_job(Duration::from_millis(1));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_invariants(&a);
        assert_invariants(&b);
    }

    #[test]
    fn test_concurrent_transitions_are_linearizable() {
        let stats = Arc::new(Statistics::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let stats = Arc::clone(&stats);
            handles.push(std::thread::spawn(move || {
                for _ in 0..500 {
                    stats.inc_queued();
                    stats.add_active(Duration::from_millis(2));
                    stats.finished_job(Duration::from_millis(4));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.number_of_finished_jobs(), 2000);
        assert_eq!(stats.number_of_jobs(), 0);
        assert_eq!(stats.average_waiting_time(), Duration::from_millis(2));
        assert_eq!(stats.average_processing_time(), Duration::from_millis(4));
    }
}
