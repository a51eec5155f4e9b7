use std::time::Duration;

pub const DEFAULT_LEASE: Duration = Duration::from_secs(5);
pub const DEFAULT_KEY_PREFIX: &str = "lock:";
pub const DEFAULT_POOL: &str = "default";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// 续期周期下限
pub const MIN_RENEWAL_PERIOD: Duration = Duration::from_secs(1);

/// 锁句柄状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Idle,
    Held,
    Released,
}

/// 续期策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenewalPolicy {
    /// 不续期，租约到期后自动失效
    Disabled,
    /// 按 key 无条件刷新 TTL
    Unconditional,
    /// 仅当 value 仍为自己的 token 时刷新 TTL
    #[default]
    OwnerChecked,
}

impl RenewalPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "disabled" | "off" | "none" => Some(RenewalPolicy::Disabled),
            "unconditional" => Some(RenewalPolicy::Unconditional),
            "owner-checked" | "owner_checked" | "checked" => Some(RenewalPolicy::OwnerChecked),
            _ => None,
        }
    }
}

/// 锁配置
#[derive(Debug, Clone)]
pub struct LockOptions {
    pub lease: Duration,
    pub key_prefix: String,
    pub pool: String,
    pub renewal: RenewalPolicy,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lease: DEFAULT_LEASE,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            pool: DEFAULT_POOL.to_string(),
            renewal: RenewalPolicy::default(),
        }
    }
}

impl LockOptions {
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = pool.into();
        self
    }

    pub fn with_renewal(mut self, renewal: RenewalPolicy) -> Self {
        self.renewal = renewal;
        self
    }

    /// 续期间隔：租约的一半，最少 1 秒
    pub fn renewal_period(&self) -> Duration {
        (self.lease / 2).max(MIN_RENEWAL_PERIOD)
    }
}

/// 申请锁参数
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    pub wait: bool,
    pub poll_interval: Duration,
    /// 等待上限，`None` 表示一直等待
    pub max_wait: Option<Duration>,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            wait: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
        }
    }
}

impl AcquireOptions {
    pub fn no_wait() -> Self {
        Self::default()
    }

    pub fn wait() -> Self {
        Self {
            wait: true,
            ..Self::default()
        }
    }

    pub fn wait_at_most(max_wait: Duration) -> Self {
        Self {
            wait: true,
            max_wait: Some(max_wait),
            ..Self::default()
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// 释放锁成功的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// 删除了自己持有的 key
    Deleted,
    /// key 已不存在（租约自然过期）
    AlreadyGone,
    /// 句柄未持有锁，未访问存储
    NotHeld,
}

/// 后台续期的健康状况
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenewalHealth {
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    /// 续期时发现锁已不属于自己
    pub lost: bool,
}
