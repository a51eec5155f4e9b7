use crate::storage::scripts;
use crate::storage::{ttl_millis, DeleteOutcome, ExtendOutcome, LockStore};
use anyhow::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::str::FromStr;
use std::time::Duration;

/// 基于 Redis 的锁存储
pub struct RedisStore {
    client: ConnectionManager,
    compare_and_delete: Script,
    extend_if_owner: Script,
}

impl RedisStore {
    pub async fn connect(
        redis_url: &str,
        username: Option<String>,
        password: Option<String>,
        db: Option<i64>,
    ) -> Result<Self> {
        // 构建连接信息
        let mut connection_info = redis::ConnectionInfo::from_str(redis_url)?;

        // 设置认证信息
        if let Some(pwd) = password {
            connection_info.redis.password = Some(pwd);
        }
        if let Some(user) = username {
            connection_info.redis.username = Some(user);
        }
        if let Some(database) = db {
            connection_info.redis.db = database;
        }

        let client = redis::Client::open(connection_info)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(client: ConnectionManager) -> Self {
        Self {
            client,
            compare_and_delete: Script::new(scripts::COMPARE_AND_DELETE),
            extend_if_owner: Script::new(scripts::EXTEND_IF_OWNER),
        }
    }
}

#[async_trait]
impl LockStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.client.clone();

        // SET NX PX 一条命令同时完成占位与过期
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.client.clone();
        let updated: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(updated)
    }

    async fn compare_and_delete(&self, key: &str, value: &str) -> Result<DeleteOutcome> {
        let mut conn = self.client.clone();
        let code: i64 = self
            .compare_and_delete
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(DeleteOutcome::from_script(code))
    }

    async fn extend_if_owner(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<ExtendOutcome> {
        let mut conn = self.client.clone();
        let code: i64 = self
            .extend_if_owner
            .key(key)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(ExtendOutcome::from_script(code))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.client.clone();
        let data: Option<String> = conn.get(key).await?;
        Ok(data)
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;
    use uuid::Uuid;

    async fn store() -> RedisStore {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        RedisStore::connect(&url, None, None, None)
            .await
            .expect("redis should be reachable")
    }

    fn test_key() -> String {
        format!("lease-lock-test:{}", Uuid::new_v4())
    }

    #[tokio::test]
    async fn set_if_absent_is_exclusive() {
        let store = store().await;
        let key = test_key();

        assert!(store
            .set_if_absent(&key, "a", Duration::from_secs(10))
            .await
            .unwrap());
        assert!(!store
            .set_if_absent(&key, "b", Duration::from_secs(10))
            .await
            .unwrap());
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("a"));

        store.compare_and_delete(&key, "a").await.unwrap();
    }

    #[tokio::test]
    async fn compare_and_delete_outcomes() {
        let store = store().await;
        let key = test_key();

        assert_eq!(
            store.compare_and_delete(&key, "a").await.unwrap(),
            DeleteOutcome::Missing
        );

        store
            .set_if_absent(&key, "a", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(
            store.compare_and_delete(&key, "b").await.unwrap(),
            DeleteOutcome::NotOwner
        );
        assert_eq!(
            store.compare_and_delete(&key, "a").await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn extend_if_owner_outcomes() {
        let store = store().await;
        let key = test_key();
        let ttl = Duration::from_secs(10);

        assert_eq!(
            store.extend_if_owner(&key, "a", ttl).await.unwrap(),
            ExtendOutcome::Missing
        );
        store.set_if_absent(&key, "a", ttl).await.unwrap();
        assert_eq!(
            store.extend_if_owner(&key, "b", ttl).await.unwrap(),
            ExtendOutcome::NotOwner
        );
        assert_eq!(
            store.extend_if_owner(&key, "a", ttl).await.unwrap(),
            ExtendOutcome::Extended
        );
        assert!(store.expire(&key, ttl).await.unwrap());

        store.compare_and_delete(&key, "a").await.unwrap();
        assert!(!store.expire(&key, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn entries_expire() {
        let store = store().await;
        let key = test_key();

        store
            .set_if_absent(&key, "a", Duration::from_millis(100))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(store.get(&key).await.unwrap().is_none());
    }
}
