use std::sync::Arc;

use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use metrics::counter;

use crate::config::ReconciliationConfig;
use crate::errors::ServiceError;
use crate::services::ledger::TransactionLedger;
use crate::services::reconciliation::StatusReconciler;

/// Upper bound on rows fetched per sweep pass.
const SWEEP_BATCH_SIZE: u64 = 50;

/// Periodic safety net for payments whose gateway callback never arrived.
///
/// Each pass re-queries the gateway for pending transactions older than the
/// configured minimum age. Outcomes land through the same conditional
/// transition as the callback path, so a sweep racing a late webhook is
/// harmless: exactly one of them wins.
pub async fn run_pending_sweep(
    ledger: Arc<TransactionLedger>,
    reconciler: Arc<StatusReconciler>,
    config: ReconciliationConfig,
) {
    let mut ticker = interval(Duration::from_secs(config.sweep_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let min_age = Duration::from_secs(config.min_pending_age_secs);

    info!(
        interval_secs = config.sweep_interval_secs,
        min_pending_age_secs = config.min_pending_age_secs,
        "Starting pending-payment sweep"
    );

    loop {
        ticker.tick().await;
        match sweep_once(&ledger, &reconciler, min_age).await {
            Ok(outcome) if outcome.settled > 0 => {
                info!(
                    scanned = outcome.scanned,
                    settled = outcome.settled,
                    "Pending-payment sweep settled transactions"
                );
            }
            Ok(outcome) => {
                debug!(scanned = outcome.scanned, "Pending-payment sweep pass done");
            }
            Err(e) => {
                error!("Pending-payment sweep pass failed: {}", e);
            }
        }
    }
}

struct SweepOutcome {
    scanned: usize,
    settled: usize,
}

async fn sweep_once(
    ledger: &TransactionLedger,
    reconciler: &StatusReconciler,
    min_age: Duration,
) -> Result<SweepOutcome, ServiceError> {
    counter!("pending_sweep_runs_total", 1);

    let candidates = ledger
        .list_pending_sweep_candidates(min_age, SWEEP_BATCH_SIZE)
        .await?;
    let scanned = candidates.len();
    let mut settled = 0usize;

    for transaction in candidates {
        match reconciler.reconcile(&transaction).await {
            Ok(outcome) if outcome.transitioned => {
                settled += 1;
                counter!("pending_sweep_settled_total", 1);
            }
            Ok(_) => {}
            // A single unreachable gateway answer must not starve the rest of
            // the batch; the row stays pending for the next pass.
            Err(e) => {
                warn!(
                    transaction_id = %transaction.id,
                    "Sweep reconcile failed, leaving for next pass: {}", e
                );
            }
        }
    }

    Ok(SweepOutcome { scanned, settled })
}
