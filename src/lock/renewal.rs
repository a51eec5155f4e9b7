use super::Shared;
use crate::error::LockError;
use crate::models::{LockState, RenewalPolicy};
use crate::scheduler::{Scheduler, TaskId, Tick};
use crate::storage::{ExtendOutcome, LockStore};
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::Duration;

/// 启动续期任务（看门狗）
pub(super) fn start(
    shared: Arc<Shared>,
    store: Arc<dyn LockStore>,
    policy: RenewalPolicy,
    period: Duration,
    scheduler: &dyn Scheduler,
) -> TaskId {
    debug!(
        "[RENEWAL] Starting renewal - key: {}, period: {:?}, policy: {:?}",
        shared.key, period, policy
    );

    scheduler.schedule_periodic(
        period,
        Box::new(move || {
            let shared = shared.clone();
            let store = store.clone();
            Box::pin(async move { renew_once(&shared, store.as_ref(), policy).await })
        }),
    )
}

async fn renew_once(shared: &Shared, store: &dyn LockStore, policy: RenewalPolicy) -> Tick {
    // 已经释放，停止自身
    if shared.state() != LockState::Held {
        debug!("[RENEWAL] Lock no longer held, stopping - key: {}", shared.key);
        return Tick::Stop;
    }

    let renewed = match policy {
        RenewalPolicy::OwnerChecked => store
            .extend_if_owner(&shared.key, &shared.token, shared.lease)
            .await
            .map(|outcome| outcome == ExtendOutcome::Extended),
        RenewalPolicy::Unconditional => store.expire(&shared.key, shared.lease).await,
        RenewalPolicy::Disabled => return Tick::Stop,
    };

    match renewed {
        Ok(true) => {
            shared.record_renewal_success();
            debug!("[RENEWAL] Lease extended - key: {}", shared.key);
            Tick::Continue
        }
        Ok(false) => {
            shared.record_lease_lost();
            warn!(
                "[RENEWAL LOST] Lock expired or taken by another owner, stopping renewal - key: {}",
                shared.key
            );
            Tick::Stop
        }
        Err(source) => {
            // 不立即重试，等下一个周期
            let err = LockError::RenewalFailed {
                key: shared.key.clone(),
                source,
            };
            shared.record_renewal_failure(&err);
            error!("[RENEWAL FAILED] {}", err);
            Tick::Continue
        }
    }
}
