//! Periodic pool maintenance.

use std::sync::Arc;
use std::time::Duration;

use pool::PoolCoordinator;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Spawn the retarget and settlement loops. Failures are logged and the loops
/// keep going.
pub fn spawn(
    pool: Arc<PoolCoordinator>,
    retarget_every: Duration,
    settle_every: Duration,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let retarget = tokio::spawn(every(retarget_every, pool.clone(), |pool| {
        match pool.retarget() {
            None => {}
            Some(report) if report.is_complete() => {
                tracing::debug!("retargeted {} farmers", report.completed.len());
            }
            Some(report) => {
                if let Some((id, e)) = report.failed {
                    tracing::warn!(
                        "retarget stopped at {id} ({} skipped): {e}",
                        report.skipped.len()
                    );
                }
            }
        }
    }));
    let settle = tokio::spawn(every(settle_every, pool, |pool| {
        let report = pool.process_all_payouts();
        if let Some((id, e)) = report.failed {
            tracing::warn!(
                "settlement stopped at {id} after {} payouts ({} skipped): {e}",
                report.completed.len(),
                report.skipped.len()
            );
        }
    }));
    (retarget, settle)
}

async fn every<F>(period: Duration, pool: Arc<PoolCoordinator>, task: F)
where
    F: Fn(&PoolCoordinator) + Clone + Send + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let pool = pool.clone();
        let task = task.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || task(&pool)).await {
            tracing::error!("scheduled task panicked: {e:?}");
        }
    }
}
