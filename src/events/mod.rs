use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::notifications::{CartClearSignal, NotificationService, PaymentUpdate};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Everything the reconciliation flow announces to the rest of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    PaymentCompleted {
        order_id: Uuid,
        transaction_id: Uuid,
    },
    PaymentFailed {
        order_id: Uuid,
        transaction_id: Uuid,
        reason: String,
    },
    PaymentCancelled {
        order_id: Uuid,
        transaction_id: Uuid,
    },
    CartClearRequested {
        order_id: Uuid,
        customer_email: String,
    },
}

/// Drains the event channel and fans events out to the realtime channel.
///
/// Failures here are logged, never retried: every event is advisory, and the
/// ledger remains the source of truth a storefront can always re-read.
pub async fn process_events(
    mut rx: mpsc::Receiver<Event>,
    notifications: Option<Arc<dyn NotificationService>>,
) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "Order created");
            }
            Event::PaymentCompleted {
                order_id,
                transaction_id,
            } => {
                info!(order_id = %order_id, transaction_id = %transaction_id, "Payment completed");
                publish_update(&notifications, order_id, "COMPLETED").await;
            }
            Event::PaymentFailed {
                order_id,
                transaction_id,
                reason,
            } => {
                warn!(
                    order_id = %order_id,
                    transaction_id = %transaction_id,
                    reason = %reason,
                    "Payment failed"
                );
                publish_update(&notifications, order_id, "FAILED").await;
            }
            Event::PaymentCancelled {
                order_id,
                transaction_id,
            } => {
                info!(order_id = %order_id, transaction_id = %transaction_id, "Payment cancelled");
                publish_update(&notifications, order_id, "CANCELLED").await;
            }
            Event::CartClearRequested {
                order_id,
                customer_email,
            } => {
                let Some(service) = &notifications else {
                    continue;
                };
                let signal = CartClearSignal {
                    order_id,
                    customer_email,
                    occurred_at: Utc::now(),
                };
                if let Err(e) = service.notify_cart_clear(&signal).await {
                    error!(
                        error = %e,
                        order_id = %order_id,
                        "Failed to signal cart clear"
                    );
                }
            }
        }
    }

    info!("Event processing loop stopped");
}

async fn publish_update(
    notifications: &Option<Arc<dyn NotificationService>>,
    order_id: Uuid,
    status: &str,
) {
    let Some(service) = notifications else {
        return;
    };
    let update = PaymentUpdate {
        order_id,
        status: status.to_string(),
        occurred_at: Utc::now(),
    };
    if let Err(e) = service.publish_payment_update(&update).await {
        error!(
            error = %e,
            order_id = %order_id,
            status = %status,
            "Failed to publish payment update"
        );
    }
}
