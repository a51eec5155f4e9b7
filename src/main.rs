use anyhow::{Context, Result};
use clap::Parser;
use lease_lock::config::{Config, StoreType};
use lease_lock::{
    LockError, LockStore, Locker, MemoryStore, RedisStore, Scheduler, StorePools, Tick,
    TokioScheduler,
};
use log::{info, warn};
use std::process::{ExitCode, ExitStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// sysexits.h EX_TEMPFAIL：锁被占用
const EXIT_LOCK_BUSY: u8 = 75;

/// Run a command while holding a lease lock.
#[derive(Debug, Parser)]
#[command(name = "lease-lock", version)]
struct Cli {
    /// Lock key, without the configured prefix
    key: String,

    /// Command to run while the lock is held
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,

    /// Wait for the lock instead of exiting when it is busy
    #[arg(short, long, env = "LOCK_WAIT")]
    wait: bool,

    /// Give up waiting after this many seconds
    #[arg(long, value_name = "SECS")]
    max_wait: Option<u64>,

    /// Lease duration in seconds
    #[arg(long, value_name = "SECS")]
    lease: Option<u64>,

    /// Store pool name
    #[arg(long)]
    pool: Option<String>,

    /// Key prefix
    #[arg(long)]
    prefix: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // 初始化日志
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();

    // 加载配置
    let config = Config::from_env();
    info!("Starting lease-lock with config: {:?}", config);

    let scheduler = Arc::new(TokioScheduler::new());

    // 创建存储
    let store: Arc<dyn LockStore> = match config.store_type {
        StoreType::Memory => {
            info!("Using memory storage");
            warn!("Memory storage only coordinates lock holders inside this process");
            let memory = Arc::new(MemoryStore::new());

            // 定期清理过期锁
            let cleanup = memory.clone();
            scheduler.schedule_periodic(
                Duration::from_secs(config.memory_cleanup_interval),
                Box::new(move || {
                    let cleanup = cleanup.clone();
                    Box::pin(async move {
                        cleanup.purge_expired();
                        Tick::Continue
                    })
                }),
            );
            memory
        }
        StoreType::Redis => {
            info!("Using Redis storage");
            let redis_url = config
                .redis_url
                .as_deref()
                .context("Redis URL not configured")?;
            let redis = RedisStore::connect(
                redis_url,
                config.redis_username.clone(),
                config.redis_password.clone(),
                config.redis_db,
            )
            .await
            .context("Failed to connect to Redis")?;
            Arc::new(redis)
        }
    };

    let mut options = config.lock_options();
    if let Some(secs) = cli.lease {
        options = options.with_lease(Duration::from_secs(secs.max(1)));
    }
    if let Some(pool) = &cli.pool {
        options = options.with_pool(pool.clone());
    }
    if let Some(prefix) = &cli.prefix {
        options = options.with_key_prefix(prefix.clone());
    }

    let mut acquire = config.acquire_options(cli.wait);
    if let Some(secs) = cli.max_wait {
        acquire.max_wait = Some(Duration::from_secs(secs));
    }

    let pools = StorePools::single(&options.pool, store);
    let locker = Locker::new(pools, scheduler.clone()).with_defaults(options);
    let handle = locker.handle(&cli.key);

    let result = handle
        .run_exclusive_with(&acquire, || run_command(&cli.command))
        .await;
    drop(handle);
    scheduler.shutdown();

    match result {
        Ok(status) => Ok(exit_code(status)),
        Err(e) => match e.downcast_ref::<LockError>() {
            Some(LockError::AcquireFailed { key }) => {
                info!("Lock {} is held by another owner, not running command", key);
                Ok(ExitCode::from(EXIT_LOCK_BUSY))
            }
            Some(LockError::Timeout { key, waited }) => {
                info!("Gave up on lock {} after {:?}", key, waited);
                Ok(ExitCode::from(EXIT_LOCK_BUSY))
            }
            _ => Err(e),
        },
    }
}

async fn run_command(command: &[String]) -> Result<ExitStatus> {
    let (program, args) = command.split_first().context("No command given")?;
    info!("Running command under lock: {:?}", command);

    let status = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .status()
        .await
        .with_context(|| format!("Failed to run {}", program))?;
    Ok(status)
}

fn exit_code(status: ExitStatus) -> ExitCode {
    match status.code() {
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => ExitCode::FAILURE,
    }
}
