use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// 单次执行后是否继续
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Stop,
}

pub type TickFuture = Pin<Box<dyn Future<Output = Tick> + Send>>;
pub type TickFn = Box<dyn FnMut() -> TickFuture + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

/// 后台周期任务调度
pub trait Scheduler: Send + Sync {
    /// 每隔 `period` 执行一次，首次在一个周期之后
    fn schedule_periodic(&self, period: Duration, tick: TickFn) -> TaskId;

    /// 取消任务，可重复调用
    fn cancel(&self, id: TaskId);
}

/// 基于 tokio::spawn 的调度器
#[derive(Clone, Default)]
pub struct TokioScheduler {
    tasks: Arc<DashMap<TaskId, JoinHandle<()>>>,
    next_id: Arc<AtomicU64>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 运行中的任务数
    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    /// 取消所有任务
    pub fn shutdown(&self) {
        let ids: Vec<TaskId> = self.tasks.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.cancel(id);
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_periodic(&self, period: Duration, mut tick: TickFn) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let period = period.max(Duration::from_millis(1));
        let tasks = self.tasks.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tick().await == Tick::Stop {
                    break;
                }
            }
            tasks.remove(&id);
            log::debug!("[SCHEDULER] Periodic task {:?} stopped itself", id);
        });

        self.tasks.insert(id, handle);
        // 任务可能在 insert 之前已经结束
        if self
            .tasks
            .get(&id)
            .map(|entry| entry.is_finished())
            .unwrap_or(false)
        {
            self.tasks.remove(&id);
        }
        id
    }

    fn cancel(&self, id: TaskId) {
        if let Some((_, handle)) = self.tasks.remove(&id) {
            handle.abort();
            log::debug!("[SCHEDULER] Cancelled periodic task {:?}", id);
        }
    }
}
