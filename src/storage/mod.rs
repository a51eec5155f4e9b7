pub mod memory;
pub mod redis;
mod scripts;

use crate::error::LockError;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// 比较并删除的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Missing,
    NotOwner,
}

impl DeleteOutcome {
    /// 脚本返回值：1 删除，-1 不存在，0 属于其他持有者
    pub fn from_script(code: i64) -> Self {
        match code {
            1 => DeleteOutcome::Deleted,
            -1 => DeleteOutcome::Missing,
            _ => DeleteOutcome::NotOwner,
        }
    }
}

/// 比较并续期的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOutcome {
    Extended,
    Missing,
    NotOwner,
}

impl ExtendOutcome {
    pub fn from_script(code: i64) -> Self {
        match code {
            1 => ExtendOutcome::Extended,
            -1 => ExtendOutcome::Missing,
            _ => ExtendOutcome::NotOwner,
        }
    }
}

#[async_trait]
pub trait LockStore: Send + Sync {
    /// key 不存在时写入 value 并设置 TTL
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// 无条件刷新 TTL，key 不存在时返回 false
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// 原子地：value 相同则删除
    async fn compare_and_delete(&self, key: &str, value: &str) -> Result<DeleteOutcome>;

    /// 原子地：value 相同则刷新 TTL
    async fn extend_if_owner(&self, key: &str, value: &str, ttl: Duration)
        -> Result<ExtendOutcome>;

    async fn get(&self, key: &str) -> Result<Option<String>>;
}

/// 按名称注册的存储连接池
#[derive(Clone, Default)]
pub struct StorePools {
    pools: Arc<DashMap<String, Arc<dyn LockStore>>>,
}

impl StorePools {
    pub fn new() -> Self {
        Self::default()
    }

    /// 单个池的便捷构造
    pub fn single(name: &str, store: Arc<dyn LockStore>) -> Self {
        let pools = Self::new();
        pools.register(name, store);
        pools
    }

    pub fn register(&self, name: &str, store: Arc<dyn LockStore>) {
        if self.pools.insert(name.to_string(), store).is_some() {
            log::warn!("[POOL] Replaced store pool: {}", name);
        }
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn LockStore>> {
        self.pools.remove(name).map(|(_, store)| store)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn LockStore>, LockError> {
        self.pools
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LockError::UnknownPool(name.to_string()))
    }
}

pub(crate) fn ttl_millis(ttl: Duration) -> i64 {
    // PX 0 会被 Redis 拒绝
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}
