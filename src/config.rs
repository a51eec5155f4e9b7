use crate::models::{
    AcquireOptions, LockOptions, RenewalPolicy, DEFAULT_KEY_PREFIX, DEFAULT_POLL_INTERVAL,
    DEFAULT_POOL,
};
use std::env;
use std::fmt;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub store_type: StoreType,
    pub redis_url: Option<String>,
    pub redis_username: Option<String>,
    pub redis_password: Option<String>,
    pub redis_db: Option<i64>,
    pub pool_name: String,
    pub key_prefix: String,
    pub lease_secs: u64,
    pub poll_interval_ms: u64,
    pub max_wait_secs: Option<u64>,
    pub renewal: RenewalPolicy,
    pub memory_cleanup_interval: u64, // 秒
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    Memory,
    Redis,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// 从任意来源读取配置，便于测试
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage_type = lookup("STORE_TYPE")
            .unwrap_or_else(|| "memory".to_string())
            .to_lowercase();

        let store_type = match storage_type.as_str() {
            "redis" => StoreType::Redis,
            _ => StoreType::Memory,
        };

        let redis_url = if store_type == StoreType::Redis {
            Some(lookup("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()))
        } else {
            None
        };

        let redis_username = lookup("REDIS_USERNAME");
        let redis_password = lookup("REDIS_PASSWORD");
        let redis_db = lookup("REDIS_DB").and_then(|s| s.parse::<i64>().ok());

        let pool_name = lookup("LOCK_POOL").unwrap_or_else(|| DEFAULT_POOL.to_string());
        let key_prefix =
            lookup("LOCK_KEY_PREFIX").unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());

        let lease_secs = lookup("LOCK_LEASE_SECS")
            .and_then(|s| s.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(5);

        let poll_interval_ms = lookup("LOCK_POLL_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL.as_millis() as u64);

        let max_wait_secs = lookup("LOCK_MAX_WAIT_SECS").and_then(|s| s.parse().ok());

        let renewal = match lookup("LOCK_RENEWAL") {
            Some(value) => RenewalPolicy::parse(&value).unwrap_or_else(|| {
                log::warn!(
                    "Unknown LOCK_RENEWAL value {:?}, falling back to owner-checked",
                    value
                );
                RenewalPolicy::OwnerChecked
            }),
            None => RenewalPolicy::default(),
        };

        let memory_cleanup_interval = lookup("MEMORY_CLEANUP_INTERVAL")
            .and_then(|s| s.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(60);

        Self {
            store_type,
            redis_url,
            redis_username,
            redis_password,
            redis_db,
            pool_name,
            key_prefix,
            lease_secs,
            poll_interval_ms,
            max_wait_secs,
            renewal,
            memory_cleanup_interval,
        }
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions::default()
            .with_lease(Duration::from_secs(self.lease_secs))
            .with_key_prefix(self.key_prefix.clone())
            .with_pool(self.pool_name.clone())
            .with_renewal(self.renewal)
    }

    pub fn acquire_options(&self, wait: bool) -> AcquireOptions {
        AcquireOptions {
            wait,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_wait: self.max_wait_secs.map(Duration::from_secs),
        }
    }
}

// 不打印密码
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("store_type", &self.store_type)
            .field("redis_url", &self.redis_url)
            .field("redis_username", &self.redis_username)
            .field("redis_password", &self.redis_password.as_ref().map(|_| "***"))
            .field("redis_db", &self.redis_db)
            .field("pool_name", &self.pool_name)
            .field("key_prefix", &self.key_prefix)
            .field("lease_secs", &self.lease_secs)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_wait_secs", &self.max_wait_secs)
            .field("renewal", &self.renewal)
            .field("memory_cleanup_interval", &self.memory_cleanup_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]);
        assert_eq!(config.store_type, StoreType::Memory);
        assert!(config.redis_url.is_none());
        assert_eq!(config.pool_name, "default");
        assert_eq!(config.key_prefix, "lock:");
        assert_eq!(config.lease_secs, 5);
        assert_eq!(config.poll_interval_ms, 250);
        assert!(config.max_wait_secs.is_none());
        assert_eq!(config.renewal, RenewalPolicy::OwnerChecked);
    }

    #[test]
    fn redis_settings() {
        let config = config(&[
            ("STORE_TYPE", "Redis"),
            ("REDIS_PASSWORD", "secret"),
            ("REDIS_DB", "3"),
        ]);
        assert_eq!(config.store_type, StoreType::Redis);
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
        assert_eq!(config.redis_db, Some(3));
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn lock_settings_flow_into_options() {
        let config = config(&[
            ("LOCK_LEASE_SECS", "12"),
            ("LOCK_KEY_PREFIX", "jobs:"),
            ("LOCK_POOL", "cache"),
            ("LOCK_RENEWAL", "unconditional"),
            ("LOCK_MAX_WAIT_SECS", "30"),
            ("LOCK_POLL_INTERVAL_MS", "100"),
        ]);

        let options = config.lock_options();
        assert_eq!(options.lease, Duration::from_secs(12));
        assert_eq!(options.key_prefix, "jobs:");
        assert_eq!(options.pool, "cache");
        assert_eq!(options.renewal, RenewalPolicy::Unconditional);

        let acquire = config.acquire_options(true);
        assert!(acquire.wait);
        assert_eq!(acquire.poll_interval, Duration::from_millis(100));
        assert_eq!(acquire.max_wait, Some(Duration::from_secs(30)));
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = config(&[
            ("LOCK_LEASE_SECS", "0"),
            ("LOCK_RENEWAL", "maybe"),
            ("MEMORY_CLEANUP_INTERVAL", "0"),
        ]);
        assert_eq!(config.lease_secs, 5);
        assert_eq!(config.renewal, RenewalPolicy::OwnerChecked);
        assert_eq!(config.memory_cleanup_interval, 60);
    }
}
