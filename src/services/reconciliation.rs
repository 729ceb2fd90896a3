use crate::{
    entities::payment_transaction::{self, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::PaymentGateway,
    services::ledger::TransactionLedger,
    services::side_effects::SideEffectCoordinator,
};
use metrics::counter;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// What a reconciliation pass concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Status of the transaction after the pass, as this caller observed it.
    pub new_status: PaymentStatus,
    /// Whether this caller is the one that applied the change. At most one of
    /// any number of concurrent passes over the same transaction gets `true`.
    pub transitioned: bool,
}

/// Per-order result of a manual status sync.
#[derive(Debug, Clone)]
pub struct OrderSyncReport {
    pub order_id: Uuid,
    pub old_status: PaymentStatus,
    pub new_status: PaymentStatus,
    pub updated: bool,
}

/// Maps the gateway's status report onto our enum. The numeric code is
/// authoritative; an unknown code falls back to sniffing the textual
/// description. Anything still unresolved stays PENDING, because guessing a
/// terminal state wrongly can never be undone.
pub fn map_gateway_status(status_code: i32, description: &str) -> PaymentStatus {
    match status_code {
        0 => PaymentStatus::Pending,
        1 => PaymentStatus::Completed,
        2 => PaymentStatus::Failed,
        3 => PaymentStatus::Cancelled,
        other => {
            let text = description.to_lowercase();
            if text.contains("complet") || text.contains("success") {
                PaymentStatus::Completed
            } else if text.contains("fail") || text.contains("error") {
                PaymentStatus::Failed
            } else if text.contains("cancel") {
                PaymentStatus::Cancelled
            } else {
                warn!(
                    status_code = other,
                    description = %description,
                    "Unrecognized gateway status, keeping transaction pending"
                );
                PaymentStatus::Pending
            }
        }
    }
}

/// Converges a payment transaction onto the gateway's view of the payment.
///
/// Every trigger goes through [`StatusReconciler::reconcile`]: webhook
/// callbacks, manual syncs and the background sweep. None of them trust
/// whatever payload woke them up; the gateway is re-queried and its answer is
/// the only input to the transition. The conditional update in the ledger
/// makes concurrent passes collapse to exactly one applied transition, and
/// side effects hang off winning the PENDING to COMPLETED flip, nothing else.
#[derive(Clone)]
pub struct StatusReconciler {
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<TransactionLedger>,
    side_effects: Arc<SideEffectCoordinator>,
    event_sender: Option<Arc<EventSender>>,
}

impl StatusReconciler {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        ledger: Arc<TransactionLedger>,
        side_effects: Arc<SideEffectCoordinator>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            gateway,
            ledger,
            side_effects,
            event_sender,
        }
    }

    /// Reconciles using the transaction's stored tracking id.
    #[instrument(skip(self, transaction), fields(transaction_id = %transaction.id))]
    pub async fn reconcile(
        &self,
        transaction: &payment_transaction::Model,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let tracking_id = transaction.tracking_id.clone().ok_or_else(|| {
            ServiceError::InvalidOperation(
                "Payment transaction has no tracking id to reconcile against".to_string(),
            )
        })?;
        self.reconcile_with_tracking_id(transaction, &tracking_id)
            .await
    }

    /// Reconciles against an explicitly supplied tracking id. The webhook
    /// path uses this: when a callback arrives before the submission flow
    /// stored the tracking id, the transaction row resolved via merchant
    /// reference has none, but the callback itself carries it.
    #[instrument(skip(self, transaction), fields(transaction_id = %transaction.id, tracking_id = %tracking_id))]
    pub async fn reconcile_with_tracking_id(
        &self,
        transaction: &payment_transaction::Model,
        tracking_id: &str,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let current = transaction.payment_status().ok_or_else(|| {
            ServiceError::InternalError(format!(
                "Payment transaction {} holds unrecognized status {:?}",
                transaction.id, transaction.status
            ))
        })?;

        // Step one, always: ask the gateway. The webhook body, the caller's
        // expectations, none of it counts. StatusUnavailable propagates and
        // the stored state stays exactly as it was.
        let status = self.gateway.transaction_status(tracking_id).await?;
        let mapped = map_gateway_status(status.status_code, &status.description);

        if mapped == current {
            counter!("reconciliation_passes_total", 1, "outcome" => "noop");
            info!(
                transaction_id = %transaction.id,
                status = %current,
                "Gateway agrees with stored status, nothing to do"
            );
            return Ok(ReconcileOutcome {
                new_status: current,
                transitioned: false,
            });
        }

        let applied = self
            .ledger
            .apply_transition(
                transaction.id,
                current,
                mapped,
                Some(status.status_code),
                Some(status.description.clone()),
            )
            .await?;

        if !applied {
            // A concurrent pass got there first. Report what the row holds
            // now rather than what we failed to write.
            counter!("reconciliation_passes_total", 1, "outcome" => "lost_race");
            let settled = self
                .ledger
                .find_transaction(transaction.id)
                .await?
                .and_then(|row| row.payment_status())
                .unwrap_or(current);
            info!(
                transaction_id = %transaction.id,
                settled = %settled,
                "Transition already applied by a concurrent pass"
            );
            return Ok(ReconcileOutcome {
                new_status: settled,
                transitioned: false,
            });
        }

        counter!(
            "reconciliation_passes_total",
            1,
            "outcome" => "applied",
            "to" => mapped.as_str()
        );
        info!(
            transaction_id = %transaction.id,
            order_id = %transaction.order_id,
            from = %current,
            to = %mapped,
            "Reconciliation applied a transition"
        );

        match mapped {
            PaymentStatus::Completed => {
                // Inline and keyed to winning the flip: this is the only
                // place completion side effects ever run.
                self.side_effects.on_completed(transaction, &status).await;
                self.emit(Event::PaymentCompleted {
                    order_id: transaction.order_id,
                    transaction_id: transaction.id,
                })
                .await;
            }
            PaymentStatus::Failed => {
                self.emit(Event::PaymentFailed {
                    order_id: transaction.order_id,
                    transaction_id: transaction.id,
                    reason: status.description.clone(),
                })
                .await;
            }
            PaymentStatus::Cancelled => {
                self.emit(Event::PaymentCancelled {
                    order_id: transaction.order_id,
                    transaction_id: transaction.id,
                })
                .await;
            }
            PaymentStatus::Pending => {}
        }

        Ok(ReconcileOutcome {
            new_status: mapped,
            transitioned: true,
        })
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "Failed to publish payment event");
            }
        }
    }

    /// Manual "check status now" for one order. Shares reconcile semantics
    /// with the webhook and sweep paths by construction.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn sync_order(&self, order_id: Uuid) -> Result<OrderSyncReport, ServiceError> {
        let transaction = self
            .ledger
            .find_transaction_by_order_id(order_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No payment transaction for order {}", order_id))
            })?;

        let old_status = transaction.payment_status().ok_or_else(|| {
            ServiceError::InternalError(format!(
                "Payment transaction {} holds unrecognized status {:?}",
                transaction.id, transaction.status
            ))
        })?;

        let outcome = self.reconcile(&transaction).await?;

        Ok(OrderSyncReport {
            order_id,
            old_status,
            new_status: outcome.new_status,
            updated: outcome.transitioned,
        })
    }
}
