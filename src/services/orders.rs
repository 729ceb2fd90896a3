use crate::{
    entities::{order, order_item, payment_transaction, payment_transaction::PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{OrderSubmission, PaymentGateway},
    services::inventory::InventoryService,
    services::ledger::{NewOrder, NewOrderLine, TransactionLedger},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Checkout input after the HTTP layer has deserialized it. Prices are
/// deliberately absent: the catalog is the only price source.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutInput {
    #[validate(length(min = 1, max = 100, message = "First name is required"))]
    pub customer_first_name: String,
    #[validate(length(min = 1, max = 100, message = "Last name is required"))]
    pub customer_last_name: String,
    #[validate(email(message = "A valid customer email is required"))]
    pub customer_email: String,
    pub customer_phone: Option<String>,
    /// Three-letter code; falls back to the configured default when absent.
    pub currency: Option<String>,
    pub notes: Option<String>,
    #[validate]
    pub items: Vec<CheckoutLineInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutLineInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 1000, message = "Quantity must be between 1 and 1000"))]
    pub quantity: i32,
}

/// What checkout hands back on success: everything the storefront needs to
/// embed the hosted payment page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub order_id: Uuid,
    pub order_number: String,
    pub tracking_id: String,
    pub iframe_url: String,
    pub total_amount: Decimal,
    pub currency: String,
}

/// Read model for the order status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order_id: Uuid,
    pub order_number: String,
    pub customer_name: String,
    pub customer_email: String,
    pub status: String,
    pub payment_status: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub order_date: DateTime<Utc>,
    pub items: Vec<OrderLineDetails>,
    pub payment: Option<PaymentDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineDetails {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub transaction_id: Uuid,
    pub status: String,
    pub tracking_id: Option<String>,
    pub redirect_url: Option<String>,
    pub gateway_description: Option<String>,
}

/// Creates orders and opens their payment sessions with the gateway.
///
/// The ledger write happens first, the gateway submission second. Between
/// the two commits the transaction is only findable by merchant reference,
/// which is why callback resolution falls back to it.
#[derive(Clone)]
pub struct CheckoutService {
    ledger: Arc<TransactionLedger>,
    inventory: Arc<InventoryService>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Option<Arc<EventSender>>,
    default_currency: String,
}

impl CheckoutService {
    pub fn new(
        ledger: Arc<TransactionLedger>,
        inventory: Arc<InventoryService>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Option<Arc<EventSender>>,
        default_currency: String,
    ) -> Self {
        Self {
            ledger,
            inventory,
            gateway,
            event_sender,
            default_currency,
        }
    }

    /// Runs the whole checkout: price the items, persist order plus PENDING
    /// transaction, submit to the gateway, store the tracking id.
    ///
    /// A definitive gateway rejection marks the transaction FAILED and
    /// surfaces the gateway's own code and message. Transport failure leaves
    /// it PENDING with no tracking id: the submission outcome is unknown, and
    /// if the gateway did accept it, its callback still resolves the
    /// transaction through the merchant reference.
    #[instrument(skip(self, input), fields(customer_email = %input.customer_email, item_count = input.items.len()))]
    pub async fn create_order(&self, input: CheckoutInput) -> Result<CheckoutReceipt, ServiceError> {
        input.validate()?;
        if input.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "An order needs at least one item".to_string(),
            ));
        }

        let currency = input
            .currency
            .clone()
            .unwrap_or_else(|| self.default_currency.clone());
        if currency.len() != 3 {
            return Err(ServiceError::ValidationError(
                "Currency must be a 3-letter code".to_string(),
            ));
        }
        let currency = currency.to_uppercase();

        let lines = self.price_items(&input.items, &currency).await?;
        let total_amount: Decimal = lines.iter().map(NewOrderLine::line_total).sum();
        let order_number = generate_order_number();
        let customer_name = format!(
            "{} {}",
            input.customer_first_name.trim(),
            input.customer_last_name.trim()
        );

        let (order_model, transaction_model) = self
            .ledger
            .create_order_with_transaction(
                NewOrder {
                    order_number: order_number.clone(),
                    customer_name,
                    customer_email: input.customer_email.clone(),
                    customer_phone: input.customer_phone.clone(),
                    currency: currency.clone(),
                    total_amount,
                    notes: input.notes.clone(),
                },
                lines,
            )
            .await?;

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderCreated(order_model.id)).await {
                warn!(error = %e, order_id = %order_model.id, "Failed to send order created event");
            }
        }

        let submission = OrderSubmission {
            merchant_reference: order_number.clone(),
            currency: currency.clone(),
            amount: total_amount,
            description: format!("Payment for order {}", order_number),
            customer_email: input.customer_email,
            customer_first_name: input.customer_first_name,
            customer_last_name: input.customer_last_name,
            customer_phone: input.customer_phone,
        };

        let receipt = match self.gateway.submit_order(&submission).await {
            Ok(receipt) => receipt,
            Err(e @ ServiceError::GatewayOrder { .. }) => {
                error!(
                    error = %e,
                    order_id = %order_model.id,
                    "Gateway rejected the order submission"
                );
                if let Err(mark_err) = self
                    .ledger
                    .apply_transition(
                        transaction_model.id,
                        PaymentStatus::Pending,
                        PaymentStatus::Failed,
                        None,
                        Some(e.to_string()),
                    )
                    .await
                {
                    error!(
                        error = %mark_err,
                        transaction_id = %transaction_model.id,
                        "Failed to mark rejected submission as FAILED"
                    );
                }
                return Err(e);
            }
            Err(e) => {
                warn!(
                    error = %e,
                    order_id = %order_model.id,
                    "Order submission outcome unknown, transaction left pending"
                );
                return Err(e);
            }
        };

        self.ledger
            .attach_tracking_id(
                transaction_model.id,
                &receipt.tracking_id,
                &receipt.redirect_url,
            )
            .await?;

        info!(
            order_id = %order_model.id,
            order_number = %order_number,
            tracking_id = %receipt.tracking_id,
            "Checkout complete, payment session open"
        );

        Ok(CheckoutReceipt {
            order_id: order_model.id,
            order_number,
            tracking_id: receipt.tracking_id,
            iframe_url: receipt.redirect_url,
            total_amount,
            currency,
        })
    }

    /// Loads the read model for an order, including its payment state.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = self
            .ledger
            .find_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let lines = self.ledger.find_order_lines(order_id).await?;
        let transaction = self.ledger.find_transaction_by_order_id(order_id).await?;

        Ok(assemble_order_details(order, lines, transaction))
    }

    /// Prices each requested line from the catalog. Inactive or unknown
    /// products fail the whole checkout; so does asking for more units than
    /// are on hand, as a courtesy check before the customer pays.
    async fn price_items(
        &self,
        items: &[CheckoutLineInput],
        currency: &str,
    ) -> Result<Vec<NewOrderLine>, ServiceError> {
        let mut lines = Vec::with_capacity(items.len());

        for item in items {
            let product = self
                .inventory
                .find_active_product(item.product_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "Product {} is not available",
                        item.product_id
                    ))
                })?;

            if !product.currency.eq_ignore_ascii_case(currency) {
                return Err(ServiceError::ValidationError(format!(
                    "Product {} is priced in {}, not {}",
                    product.sku, product.currency, currency
                )));
            }

            if product.stock_quantity < item.quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "Only {} units of {} available",
                    product.stock_quantity, product.sku
                )));
            }

            lines.push(NewOrderLine {
                product_id: product.id,
                sku: product.sku,
                name: product.name,
                quantity: item.quantity,
                unit_price: product.price,
            });
        }

        Ok(lines)
    }
}

/// Order numbers double as the merchant reference the gateway echoes back,
/// so they must be unique and short enough for its reference field.
fn generate_order_number() -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("PF-{}-{}", date, suffix[..8].to_uppercase())
}

fn assemble_order_details(
    order: order::Model,
    lines: Vec<order_item::Model>,
    transaction: Option<payment_transaction::Model>,
) -> OrderDetails {
    OrderDetails {
        order_id: order.id,
        order_number: order.order_number,
        customer_name: order.customer_name,
        customer_email: order.customer_email,
        status: order.status,
        payment_status: order.payment_status,
        total_amount: order.total_amount,
        currency: order.currency,
        order_date: order.order_date,
        items: lines
            .into_iter()
            .map(|line| OrderLineDetails {
                product_id: line.product_id,
                sku: line.sku,
                name: line.name,
                quantity: line.quantity,
                unit_price: line.unit_price,
                total_price: line.total_price,
            })
            .collect(),
        payment: transaction.map(|txn| PaymentDetails {
            transaction_id: txn.id,
            status: txn.status,
            tracking_id: txn.tracking_id,
            redirect_url: txn.redirect_url,
            gateway_description: txn.gateway_description,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn order_numbers_are_unique_and_reference_sized() {
        let a = generate_order_number();
        let b = generate_order_number();

        assert_ne!(a, b);
        assert!(a.starts_with("PF-"));
        assert!(a.len() <= 50);
    }

    #[test]
    fn order_details_carry_payment_view() {
        let order_id = Uuid::new_v4();
        let txn_id = Uuid::new_v4();
        let now = Utc::now();

        let order = order::Model {
            id: order_id,
            order_number: "PF-20260101-ABCDEF01".to_string(),
            customer_name: "Asha Mwangi".to_string(),
            customer_email: "asha@example.com".to_string(),
            customer_phone: None,
            status: "pending".to_string(),
            order_date: now,
            total_amount: dec!(2500.00),
            currency: "KES".to_string(),
            payment_status: "pending".to_string(),
            notes: None,
            created_at: now,
            updated_at: Some(now),
        };

        let txn = payment_transaction::Model {
            id: txn_id,
            order_id,
            merchant_reference: order.order_number.clone(),
            tracking_id: Some("track-1".to_string()),
            status: "PENDING".to_string(),
            amount: order.total_amount,
            currency: order.currency.clone(),
            gateway_status_code: None,
            gateway_description: None,
            redirect_url: Some("https://pay.example.com/iframe/track-1".to_string()),
            created_at: now,
            updated_at: Some(now),
        };

        let details = assemble_order_details(order, vec![], Some(txn));

        let payment = details.payment.expect("payment view should be present");
        assert_eq!(payment.transaction_id, txn_id);
        assert_eq!(payment.tracking_id.as_deref(), Some("track-1"));
        assert_eq!(details.payment_status, "pending");
    }

    #[test]
    fn checkout_input_rejects_non_positive_quantity() {
        let input = CheckoutInput {
            customer_first_name: "Asha".to_string(),
            customer_last_name: "Mwangi".to_string(),
            customer_email: "asha@example.com".to_string(),
            customer_phone: None,
            currency: None,
            notes: None,
            items: vec![CheckoutLineInput {
                product_id: Uuid::new_v4(),
                quantity: 0,
            }],
        };

        assert!(input.validate().is_err());
    }
}
