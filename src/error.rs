use std::time::Duration;
use thiserror::Error;

/// 锁操作错误；`acquire` 遇到占用返回 `Ok(false)` 而不是错误
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock `{key}` is held by another owner")]
    AcquireFailed { key: String },

    #[error("lock `{key}` is no longer owned by this handle")]
    NotOwner { key: String },

    #[error("lock store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),

    #[error("renewal of lock `{key}` failed: {source}")]
    RenewalFailed {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("no store pool named `{0}`")]
    UnknownPool(String),

    #[error("timed out after {waited:?} waiting for lock `{key}`")]
    Timeout { key: String, waited: Duration },
}

impl LockError {
    /// 是否为存储不可用
    pub fn is_store_error(&self) -> bool {
        matches!(self, LockError::StoreUnavailable(_))
    }
}

pub type LockResult<T> = std::result::Result<T, LockError>;
