pub mod config;
pub mod error;
pub mod lock;
pub mod models;
pub mod scheduler;
pub mod storage;

pub use error::{LockError, LockResult};
pub use lock::{LockHandle, Locker};
pub use models::{
    AcquireOptions, LockOptions, LockState, ReleaseOutcome, RenewalHealth, RenewalPolicy,
};
pub use scheduler::{Scheduler, TaskId, Tick, TokioScheduler};
pub use storage::memory::MemoryStore;
pub use storage::redis::RedisStore;
pub use storage::{DeleteOutcome, ExtendOutcome, LockStore, StorePools};
