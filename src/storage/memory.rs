use crate::storage::{DeleteOutcome, ExtendOutcome, LockStore};
use anyhow::{bail, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

impl StoredValue {
    fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// 进程内的锁存储，惰性过期
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    available: AtomicBool,
    deletions: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
            deletions: AtomicU64::new(0),
        }
    }

    /// 无条件写入，覆盖已有的值
    pub fn set(&self, key: &str, value: &str, ttl: Duration) {
        self.entries
            .insert(key.to_string(), StoredValue::new(value, ttl));
    }

    /// 剩余存活时间
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now()))
    }

    /// 模拟存储不可用，之后的所有调用都返回错误
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// compare_and_delete 实际删除的次数
    pub fn deletions(&self) -> u64 {
        self.deletions.load(Ordering::SeqCst)
    }

    /// 清理过期的 key，返回清理数量
    pub fn purge_expired(&self) -> usize {
        let mut purged = 0;
        self.entries.retain(|_, entry| {
            if entry.is_expired() {
                purged += 1;
                false
            } else {
                true
            }
        });

        if purged > 0 {
            log::info!("[CLEANUP] Purged {} expired lock entries", purged);
        }
        purged
    }

    fn check_available(&self) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            bail!("memory store is unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredValue::new(value, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;

        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_delete(&self, key: &str, value: &str) -> Result<DeleteOutcome> {
        self.check_available()?;

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                if occupied.get().is_expired() {
                    occupied.remove();
                    Ok(DeleteOutcome::Missing)
                } else if occupied.get().value == value {
                    occupied.remove();
                    self.deletions.fetch_add(1, Ordering::SeqCst);
                    Ok(DeleteOutcome::Deleted)
                } else {
                    Ok(DeleteOutcome::NotOwner)
                }
            }
            Entry::Vacant(_) => Ok(DeleteOutcome::Missing),
        }
    }

    async fn extend_if_owner(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<ExtendOutcome> {
        self.check_available()?;

        match self.entries.get_mut(key) {
            Some(entry) if entry.is_expired() => Ok(ExtendOutcome::Missing),
            Some(mut entry) if entry.value == value => {
                entry.expires_at = Instant::now() + ttl;
                Ok(ExtendOutcome::Extended)
            }
            Some(_) => Ok(ExtendOutcome::NotOwner),
            None => Ok(ExtendOutcome::Missing),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;

        Ok(self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn set_if_absent_only_writes_once() {
        let store = MemoryStore::new();

        assert!(store.set_if_absent("k", "a", TTL).await.unwrap());
        assert!(!store.set_if_absent("k", "b", TTL).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_can_be_reclaimed() {
        let store = MemoryStore::new();
        store.set_if_absent("k", "a", TTL).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.set_if_absent("k", "b", TTL).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn expire_refreshes_live_keys_only() {
        let store = MemoryStore::new();
        assert!(!store.expire("k", TTL).await.unwrap());

        store.set_if_absent("k", "a", TTL).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(store.expire("k", TTL).await.unwrap());
        assert_eq!(store.ttl("k"), Some(TTL));

        tokio::time::sleep(TTL).await;
        assert!(!store.expire("k", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn compare_and_delete_checks_the_value() {
        let store = MemoryStore::new();
        assert_eq!(
            store.compare_and_delete("k", "a").await.unwrap(),
            DeleteOutcome::Missing
        );

        store.set_if_absent("k", "a", TTL).await.unwrap();
        assert_eq!(
            store.compare_and_delete("k", "b").await.unwrap(),
            DeleteOutcome::NotOwner
        );
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));

        assert_eq!(
            store.compare_and_delete("k", "a").await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.deletions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn compare_and_delete_treats_expired_as_missing() {
        let store = MemoryStore::new();
        store.set_if_absent("k", "a", TTL).await.unwrap();
        tokio::time::sleep(TTL).await;

        assert_eq!(
            store.compare_and_delete("k", "a").await.unwrap(),
            DeleteOutcome::Missing
        );
        assert_eq!(store.deletions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn extend_if_owner_checks_the_value() {
        let store = MemoryStore::new();
        assert_eq!(
            store.extend_if_owner("k", "a", TTL).await.unwrap(),
            ExtendOutcome::Missing
        );

        store.set_if_absent("k", "a", TTL).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            store.extend_if_owner("k", "b", TTL).await.unwrap(),
            ExtendOutcome::NotOwner
        );
        assert!(store.ttl("k").unwrap() <= Duration::from_secs(1));

        assert_eq!(
            store.extend_if_owner("k", "a", TTL).await.unwrap(),
            ExtendOutcome::Extended
        );
        assert_eq!(store.ttl("k"), Some(TTL));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_removes_only_dead_entries() {
        let store = MemoryStore::new();
        store.set("short", "a", Duration::from_secs(1));
        store.set("long", "b", Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert!(store.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unavailable_store_returns_errors() {
        let store = MemoryStore::new();
        store.set_available(false);

        assert!(store.set_if_absent("k", "a", TTL).await.is_err());
        assert!(store.get("k").await.is_err());
        assert!(store.compare_and_delete("k", "a").await.is_err());

        store.set_available(true);
        assert!(store.set_if_absent("k", "a", TTL).await.unwrap());
    }
}
