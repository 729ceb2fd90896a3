use crate::{
    entities::payment_transaction,
    events::{Event, EventSender},
    gateway::TransactionStatus,
    notifications::{ConfirmationSender, OrderConfirmation},
    services::inventory::InventoryService,
    services::ledger::TransactionLedger,
};
use metrics::counter;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Runs the business consequences of a payment completing.
///
/// Callers invoke this only after winning the PENDING to COMPLETED flip in
/// the ledger, which is what keeps every effect exactly-once: the flip can
/// only be won once no matter how many webhooks, syncs and sweeps race.
///
/// The effects are independent of each other and of the caller. A failed
/// email never blocks the stock decrement, and nothing here ever propagates
/// an error back into reconciliation; the payment is already COMPLETED and
/// no outcome of ours can change that.
#[derive(Clone)]
pub struct SideEffectCoordinator {
    ledger: Arc<TransactionLedger>,
    inventory: Arc<InventoryService>,
    confirmation: Arc<dyn ConfirmationSender>,
    event_sender: Option<Arc<EventSender>>,
}

impl SideEffectCoordinator {
    pub fn new(
        ledger: Arc<TransactionLedger>,
        inventory: Arc<InventoryService>,
        confirmation: Arc<dyn ConfirmationSender>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            ledger,
            inventory,
            confirmation,
            event_sender,
        }
    }

    #[instrument(skip(self, transaction, status), fields(order_id = %transaction.order_id, transaction_id = %transaction.id))]
    pub async fn on_completed(
        &self,
        transaction: &payment_transaction::Model,
        status: &TransactionStatus,
    ) {
        let order = match self.ledger.find_order(transaction.order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                error!(
                    order_id = %transaction.order_id,
                    "Completed payment points at a missing order, skipping side effects"
                );
                return;
            }
            Err(e) => {
                error!(
                    error = %e,
                    order_id = %transaction.order_id,
                    "Could not load order for side effects"
                );
                return;
            }
        };

        self.decrement_ordered_stock(transaction).await;
        self.send_confirmation(&order, status).await;
        self.request_cart_clear(&order).await;

        info!(order_id = %order.id, "Completion side effects finished");
    }

    async fn decrement_ordered_stock(&self, transaction: &payment_transaction::Model) {
        let lines = match self.ledger.find_order_lines(transaction.order_id).await {
            Ok(lines) => lines,
            Err(e) => {
                error!(
                    error = %e,
                    order_id = %transaction.order_id,
                    "Could not load order lines for stock decrement"
                );
                counter!("checkout_side_effects_total", 1, "effect" => "stock", "outcome" => "error");
                return;
            }
        };

        for line in lines {
            match self
                .inventory
                .decrement_stock(line.product_id, line.quantity)
                .await
            {
                Ok(true) => {
                    counter!("checkout_side_effects_total", 1, "effect" => "stock", "outcome" => "ok");
                }
                Ok(false) => {
                    // Paid but out of stock: fulfilment has to resolve this
                    // by hand, the payment itself stays COMPLETED.
                    warn!(
                        order_id = %transaction.order_id,
                        product_id = %line.product_id,
                        quantity = line.quantity,
                        "Stock went negative-bound on a paid order, needs manual review"
                    );
                    counter!("checkout_side_effects_total", 1, "effect" => "stock", "outcome" => "refused");
                }
                Err(e) => {
                    error!(
                        error = %e,
                        order_id = %transaction.order_id,
                        product_id = %line.product_id,
                        "Stock decrement failed"
                    );
                    counter!("checkout_side_effects_total", 1, "effect" => "stock", "outcome" => "error");
                }
            }
        }
    }

    async fn send_confirmation(
        &self,
        order: &crate::entities::order::Model,
        status: &TransactionStatus,
    ) {
        let confirmation = OrderConfirmation {
            order_number: order.order_number.clone(),
            customer_email: order.customer_email.clone(),
            customer_name: order.customer_name.clone(),
            total_amount: order.total_amount,
            currency: order.currency.clone(),
            confirmation_code: status.confirmation_code.clone(),
            payment_method: status.payment_method.clone(),
        };

        match self.confirmation.send_confirmation(&confirmation).await {
            Ok(()) => {
                info!(order_id = %order.id, "Order confirmation sent");
                counter!("checkout_side_effects_total", 1, "effect" => "confirmation", "outcome" => "ok");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    order_id = %order.id,
                    "Order confirmation could not be sent"
                );
                counter!("checkout_side_effects_total", 1, "effect" => "confirmation", "outcome" => "error");
            }
        }
    }

    async fn request_cart_clear(&self, order: &crate::entities::order::Model) {
        let Some(event_sender) = &self.event_sender else {
            return;
        };

        let event = Event::CartClearRequested {
            order_id: order.id,
            customer_email: order.customer_email.clone(),
        };

        if let Err(e) = event_sender.send(event).await {
            warn!(
                error = %e,
                order_id = %order.id,
                "Failed to request cart clear"
            );
            counter!("checkout_side_effects_total", 1, "effect" => "cart_clear", "outcome" => "error");
        } else {
            counter!("checkout_side_effects_total", 1, "effect" => "cart_clear", "outcome" => "ok");
        }
    }
}
