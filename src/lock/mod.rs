mod renewal;

use crate::error::{LockError, LockResult};
use crate::models::{
    AcquireOptions, LockOptions, LockState, ReleaseOutcome, RenewalHealth, RenewalPolicy,
};
use crate::scheduler::{Scheduler, TaskId};
use crate::storage::{DeleteOutcome, LockStore, StorePools};
use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

struct Inner {
    state: LockState,
    renewal: Option<TaskId>,
    /// 授予锁的存储；释放的删除完成前一直保留
    store: Option<Arc<dyn LockStore>>,
}

/// 句柄与续期任务共享的部分
struct Shared {
    key: String,
    token: String,
    lease: Duration,
    inner: Mutex<Inner>,
    health: Mutex<RenewalHealth>,
}

impl Shared {
    fn state(&self) -> LockState {
        self.inner.lock().state
    }

    fn record_renewal_success(&self) {
        let mut health = self.health.lock();
        health.consecutive_failures = 0;
    }

    fn record_renewal_failure(&self, err: &LockError) {
        let mut health = self.health.lock();
        health.consecutive_failures += 1;
        health.last_error = Some(err.to_string());
    }

    fn record_lease_lost(&self) {
        self.health.lock().lost = true;
    }
}

/// 生成持有者 token：进程号 + 随机 UUID + 微秒时间戳
fn generate_token() -> String {
    format!(
        "{:x}-{}-{:x}",
        std::process::id(),
        Uuid::new_v4().simple(),
        Utc::now().timestamp_micros()
    )
}

/// 单个锁的句柄，token 在创建时生成
pub struct LockHandle {
    shared: Arc<Shared>,
    options: LockOptions,
    pools: StorePools,
    scheduler: Arc<dyn Scheduler>,
    /// 串行化同一句柄上的存储操作
    op_lock: tokio::sync::Mutex<()>,
}

impl LockHandle {
    pub fn new(
        key: &str,
        pools: StorePools,
        scheduler: Arc<dyn Scheduler>,
        options: LockOptions,
    ) -> Self {
        let shared = Shared {
            key: format!("{}{}", options.key_prefix, key),
            token: generate_token(),
            lease: options.lease,
            inner: Mutex::new(Inner {
                state: LockState::Idle,
                renewal: None,
                store: None,
            }),
            health: Mutex::new(RenewalHealth::default()),
        };

        Self {
            shared: Arc::new(shared),
            options,
            pools,
            scheduler,
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// 带前缀的完整 key
    pub fn key(&self) -> &str {
        &self.shared.key
    }

    pub fn token(&self) -> &str {
        &self.shared.token
    }

    pub fn lease(&self) -> Duration {
        self.shared.lease
    }

    pub fn state(&self) -> LockState {
        self.shared.state()
    }

    pub fn is_held(&self) -> bool {
        self.state() == LockState::Held
    }

    pub fn renewal_health(&self) -> RenewalHealth {
        self.shared.health.lock().clone()
    }

    /// 尝试一次，被占用时返回 `Ok(false)`
    pub async fn acquire(&self) -> LockResult<bool> {
        self.acquire_with(&AcquireOptions::default()).await
    }

    /// 获取锁，可选轮询等待；存储错误立即返回
    pub async fn acquire_with(&self, options: &AcquireOptions) -> LockResult<bool> {
        let started = Instant::now();
        info!(
            "[ACQUIRE] Attempting to acquire lock - key: {}, lease: {:?}, wait: {}",
            self.shared.key, self.shared.lease, options.wait
        );

        loop {
            if self.try_acquire_once().await? {
                return Ok(true);
            }

            if !options.wait {
                info!("[ACQUIRE BUSY] Lock held by another owner - key: {}", self.shared.key);
                return Ok(false);
            }

            let mut pause = options.poll_interval;
            if let Some(max_wait) = options.max_wait {
                let waited = started.elapsed();
                if waited >= max_wait {
                    warn!(
                        "[ACQUIRE TIMEOUT] Gave up waiting for lock - key: {}, waited: {:?}",
                        self.shared.key, waited
                    );
                    return Err(LockError::Timeout {
                        key: self.shared.key.clone(),
                        waited,
                    });
                }
                pause = pause.min(max_wait - waited);
            }

            tokio::time::sleep(pause).await;
        }
    }

    async fn try_acquire_once(&self) -> LockResult<bool> {
        let _op = self.op_lock.lock().await;

        if self.is_held() {
            debug!("Lock already held by this handle - key: {}", self.shared.key);
            return Ok(true);
        }

        let store = self.pools.get(&self.options.pool)?;
        let acquired = store
            .set_if_absent(&self.shared.key, &self.shared.token, self.shared.lease)
            .await
            .map_err(LockError::StoreUnavailable)?;

        if !acquired {
            return Ok(false);
        }

        {
            let mut inner = self.shared.inner.lock();
            inner.state = LockState::Held;
            inner.store = Some(store.clone());
        }
        *self.shared.health.lock() = RenewalHealth::default();

        if self.options.renewal != RenewalPolicy::Disabled {
            let task = renewal::start(
                self.shared.clone(),
                store,
                self.options.renewal,
                self.options.renewal_period(),
                self.scheduler.as_ref(),
            );
            self.shared.inner.lock().renewal = Some(task);
        }

        info!(
            "[ACQUIRE SUCCESS] Lock acquired - key: {}, token: {}",
            self.shared.key, self.shared.token
        );
        Ok(true)
    }

    /// 释放锁；先停续期再删除，重复调用返回 `NotHeld`
    pub async fn release(&self) -> LockResult<ReleaseOutcome> {
        let _op = self.op_lock.lock().await;

        // store 留在 inner 里，删除被取消时由 abandon 补做
        let (store, renewal) = {
            let mut inner = self.shared.inner.lock();
            if inner.state != LockState::Held {
                return Ok(ReleaseOutcome::NotHeld);
            }
            inner.state = LockState::Released;
            (inner.store.clone(), inner.renewal.take())
        };

        if let Some(task) = renewal {
            self.scheduler.cancel(task);
        }

        let store = match store {
            Some(store) => store,
            None => self.pools.get(&self.options.pool)?,
        };

        info!("[RELEASE] Releasing lock - key: {}", self.shared.key);
        let deleted = store
            .compare_and_delete(&self.shared.key, &self.shared.token)
            .await;
        self.shared.inner.lock().store = None;

        match deleted {
            Ok(DeleteOutcome::Deleted) => {
                info!("[RELEASE SUCCESS] Lock released - key: {}", self.shared.key);
                Ok(ReleaseOutcome::Deleted)
            }
            Ok(DeleteOutcome::Missing) => {
                info!(
                    "[RELEASE SUCCESS] Lock already expired - key: {}",
                    self.shared.key
                );
                Ok(ReleaseOutcome::AlreadyGone)
            }
            Ok(DeleteOutcome::NotOwner) => {
                warn!(
                    "[RELEASE FAILED] Lock now owned by someone else - key: {}",
                    self.shared.key
                );
                Err(LockError::NotOwner {
                    key: self.shared.key.clone(),
                })
            }
            Err(e) => {
                error!("[RELEASE FAILED] Store error - key: {}, error: {}", self.shared.key, e);
                Err(LockError::StoreUnavailable(e))
            }
        }
    }

    /// 存储中是否仍是本句柄的 token
    pub async fn is_owner(&self) -> LockResult<bool> {
        let held = {
            let inner = self.shared.inner.lock();
            if inner.state == LockState::Held {
                inner.store.clone()
            } else {
                None
            }
        };
        let store = match held {
            Some(store) => store,
            None => self.pools.get(&self.options.pool)?,
        };
        let current = store
            .get(&self.shared.key)
            .await
            .map_err(LockError::StoreUnavailable)?;
        Ok(current.as_deref() == Some(self.shared.token.as_str()))
    }

    /// 不等待的 `run_exclusive_with`
    pub async fn run_exclusive<F, Fut, T, E>(&self, action: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        self.run_exclusive_with(&AcquireOptions::default(), action)
            .await
    }

    /// 持锁执行 `action`，任何退出路径都会释放
    pub async fn run_exclusive_with<F, Fut, T, E>(
        &self,
        options: &AcquireOptions,
        action: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        if !self.acquire_with(options).await? {
            return Err(LockError::AcquireFailed {
                key: self.shared.key.clone(),
            }
            .into());
        }

        let _guard = ReleaseOnDrop { handle: self };
        let result = action().await;
        let released = self.release().await;

        match (result, released) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!(
                    "Release after failed exclusive section also failed - key: {}, error: {}",
                    self.shared.key, release_err
                );
                Err(e)
            }
        }
    }

    /// 不能 await 时的清理：停续期，持有中或释放未完成时在后台删除
    fn abandon(&self) {
        let (store, renewal) = {
            let mut inner = self.shared.inner.lock();
            let renewal = inner.renewal.take();
            match inner.state {
                LockState::Held => {
                    inner.state = LockState::Released;
                    (inner.store.take(), renewal)
                }
                // release() 在删除途中被取消
                LockState::Released => (inner.store.take(), renewal),
                LockState::Idle => (None, renewal),
            }
        };

        if let Some(task) = renewal {
            self.scheduler.cancel(task);
        }

        let Some(store) = store else {
            return;
        };

        let key = self.shared.key.clone();
        let token = self.shared.token.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    match store.compare_and_delete(&key, &token).await {
                        Ok(outcome) => {
                            debug!("[RELEASE] Abandoned lock cleaned up - key: {}, outcome: {:?}", key, outcome)
                        }
                        Err(e) => warn!(
                            "[RELEASE FAILED] Could not clean up abandoned lock - key: {}, error: {}",
                            key, e
                        ),
                    }
                });
            }
            Err(_) => warn!(
                "[RELEASE FAILED] No runtime to release abandoned lock - key: {}, it expires with its lease",
                key
            ),
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.abandon();
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.shared.key)
            .field("token", &self.shared.token)
            .field("lease", &self.shared.lease)
            .field("state", &self.state())
            .finish()
    }
}

struct ReleaseOnDrop<'a> {
    handle: &'a LockHandle,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        // release() 完成后为空操作
        self.handle.abandon();
    }
}

/// 共享存储池、调度器和默认选项的句柄工厂
#[derive(Clone)]
pub struct Locker {
    pools: StorePools,
    scheduler: Arc<dyn Scheduler>,
    defaults: LockOptions,
}

impl Locker {
    pub fn new(pools: StorePools, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            pools,
            scheduler,
            defaults: LockOptions::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: LockOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn defaults(&self) -> &LockOptions {
        &self.defaults
    }

    pub fn handle(&self, key: &str) -> LockHandle {
        self.handle_with(key, self.defaults.clone())
    }

    pub fn handle_with(&self, key: &str, options: LockOptions) -> LockHandle {
        LockHandle::new(key, self.pools.clone(), self.scheduler.clone(), options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TokioScheduler;
    use crate::storage::memory::MemoryStore;

    fn locker() -> Locker {
        let pools = StorePools::single("default", Arc::new(MemoryStore::new()));
        Locker::new(pools, Arc::new(TokioScheduler::new()))
    }

    #[test]
    fn tokens_are_unique_per_handle() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(a.starts_with(&format!("{:x}-", std::process::id())));
    }

    #[tokio::test]
    async fn key_carries_the_prefix() {
        let locker = locker();
        let handle = locker.handle("job:42");
        assert_eq!(handle.key(), "lock:job:42");
        assert_eq!(handle.state(), LockState::Idle);

        let custom = locker.handle_with("job:42", LockOptions::default().with_key_prefix("app:"));
        assert_eq!(custom.key(), "app:job:42");
    }

    #[tokio::test]
    async fn token_survives_reacquisition() {
        let handle = locker().handle("job");
        let token = handle.token().to_string();

        assert!(handle.acquire().await.unwrap());
        handle.release().await.unwrap();
        assert!(handle.acquire().await.unwrap());
        assert_eq!(handle.token(), token);
        handle.release().await.unwrap();
    }

    #[tokio::test]
    async fn acquire_while_held_does_not_touch_the_store() {
        let handle = locker().handle("job");
        assert!(handle.acquire().await.unwrap());
        assert!(handle.acquire().await.unwrap());
        assert_eq!(handle.state(), LockState::Held);
        assert_eq!(handle.release().await.unwrap(), ReleaseOutcome::Deleted);
    }
}
