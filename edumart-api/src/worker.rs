use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::state::AppState;

const SETTLEMENT_LEASE: &str = "lease:settlement-sweep";
const EXPIRY_LEASE: &str = "lease:payment-expiry";

/// Releases held earnings every `every`. With Redis configured only one instance sweeps per tick.
pub async fn start_settlement_worker(state: AppState, every: Duration) {
    info!("Settlement worker started, sweeping every {:?}", every);
    let holder = Uuid::new_v4().to_string();
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        run_leased(&state, SETTLEMENT_LEASE, &holder, every, || async {
            match state.settlements.process_pending_settlements().await {
                Ok(report) => {
                    state.metrics.orders_settled.inc_by(report.settled as u64);
                    state.metrics.settlement_failures.inc_by(report.failures.len() as u64);
                }
                Err(e) => error!("Settlement sweep failed: {}", e),
            }
        })
        .await;
    }
}

/// Expires payments nobody came back to pay.
pub async fn start_payment_expiry_worker(state: AppState, every: Duration) {
    info!("Payment expiry worker started, checking every {:?}", every);
    let holder = Uuid::new_v4().to_string();
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        run_leased(&state, EXPIRY_LEASE, &holder, every, || async {
            match state.payments.expire_stale_payments().await {
                Ok(expired) => state.metrics.payments_expired.inc_by(expired),
                Err(e) => error!("Payment expiry sweep failed: {}", e),
            }
        })
        .await;
    }
}

async fn run_leased<F, Fut>(state: &AppState, key: &str, holder: &str, ttl: Duration, job: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    let Some(redis) = state.redis.as_ref() else {
        job().await;
        return;
    };

    match redis.try_acquire_lease(key, holder, ttl.as_secs().max(1)).await {
        Ok(true) => {
            job().await;
            if let Err(e) = redis.release_lease(key, holder).await {
                warn!("Failed to release lease {}: {}", key, e);
            }
        }
        Ok(false) => {}
        Err(e) => {
            // Both sweeps are idempotent.
            warn!("Lease {} unavailable ({}), running anyway", key, e);
            job().await;
        }
    }
}
