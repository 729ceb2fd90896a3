use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use slog::{info, Logger};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::errors::ServiceError;

/// How many entries each per-customer signal list keeps before trimming.
const SIGNAL_LIST_BOUND: isize = 100;

/// Realtime payload the storefront receives when a payment settles.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaymentUpdate {
    pub order_id: Uuid,
    pub status: String,
    pub occurred_at: DateTime<Utc>,
}

/// Signal telling the storefront to drop the cart it kept for this order.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CartClearSignal {
    pub order_id: Uuid,
    pub customer_email: String,
    pub occurred_at: DateTime<Utc>,
}

/// Notification service errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Realtime channel the storefront subscribes to. Everything here is
/// fire-and-forget from the caller's point of view: a lost signal only means
/// the storefront falls back to polling the order endpoint.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn publish_payment_update(&self, update: &PaymentUpdate)
        -> Result<(), NotificationError>;
    async fn notify_cart_clear(&self, signal: &CartClearSignal) -> Result<(), NotificationError>;
}

/// Redis-backed notification channel: a PUBLISH for live subscribers plus a
/// bounded list so a storefront that reconnects can catch up.
#[derive(Clone)]
pub struct RedisNotificationService {
    redis: Arc<Client>,
    logger: Logger,
}

impl RedisNotificationService {
    pub fn new(redis: Arc<Client>, logger: Logger) -> Self {
        Self { redis, logger }
    }

    fn order_channel(order_id: Uuid) -> String {
        format!("payments:order:{}", order_id)
    }

    fn cart_clear_list(customer_email: &str) -> String {
        format!("cart:clear:{}", customer_email.to_lowercase())
    }
}

#[async_trait]
impl NotificationService for RedisNotificationService {
    #[instrument(skip(self, update), fields(order_id = %update.order_id, status = %update.status))]
    async fn publish_payment_update(
        &self,
        update: &PaymentUpdate,
    ) -> Result<(), NotificationError> {
        let mut conn = self.redis.get_async_connection().await?;
        let json = serde_json::to_string(update)?;
        let channel = Self::order_channel(update.order_id);

        redis::pipe()
            .atomic()
            .publish(&channel, &json)
            .ignore()
            .lpush(&channel, &json)
            .ignore()
            .ltrim(&channel, 0, SIGNAL_LIST_BOUND - 1)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        info!(self.logger, "Payment update published";
            "order_id" => %update.order_id,
            "status" => &update.status
        );
        Ok(())
    }

    #[instrument(skip(self, signal), fields(order_id = %signal.order_id))]
    async fn notify_cart_clear(&self, signal: &CartClearSignal) -> Result<(), NotificationError> {
        let mut conn = self.redis.get_async_connection().await?;
        let json = serde_json::to_string(signal)?;
        let list = Self::cart_clear_list(&signal.customer_email);

        redis::pipe()
            .atomic()
            .publish("cart:clear", &json)
            .ignore()
            .lpush(&list, &json)
            .ignore()
            .ltrim(&list, 0, SIGNAL_LIST_BOUND - 1)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        info!(self.logger, "Cart clear requested";
            "order_id" => %signal.order_id
        );
        Ok(())
    }
}

/// Everything a confirmation message needs. Built from the order and the
/// gateway's final status report after a payment completes.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrderConfirmation {
    pub order_number: String,
    pub customer_email: String,
    pub customer_name: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub confirmation_code: Option<String>,
    pub payment_method: Option<String>,
}

/// Outbound confirmation messages. Best-effort by contract: implementations
/// may fail, callers log and move on, the payment itself is already settled.
#[async_trait]
pub trait ConfirmationSender: Send + Sync {
    async fn send_confirmation(&self, confirmation: &OrderConfirmation)
        -> Result<(), ServiceError>;
}

/// Hands confirmations to an HTTP mail relay.
pub struct HttpConfirmationSender {
    http: reqwest::Client,
    endpoint: String,
    from_address: String,
    logger: Logger,
}

impl HttpConfirmationSender {
    pub fn new(endpoint: String, from_address: String, logger: Logger) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            from_address,
            logger,
        }
    }
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: String,
    #[serde(flatten)]
    confirmation: &'a OrderConfirmation,
}

#[async_trait]
impl ConfirmationSender for HttpConfirmationSender {
    #[instrument(skip(self, confirmation), fields(order_number = %confirmation.order_number))]
    async fn send_confirmation(
        &self,
        confirmation: &OrderConfirmation,
    ) -> Result<(), ServiceError> {
        let message = RelayMessage {
            from: &self.from_address,
            to: &confirmation.customer_email,
            subject: format!("Order {} confirmed", confirmation.order_number),
            confirmation,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&message)
            .send()
            .await
            .map_err(|e| ServiceError::NotificationError(format!("mail relay error: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::NotificationError(format!(
                "mail relay returned {}",
                response.status()
            )));
        }

        info!(self.logger, "Confirmation handed to mail relay";
            "order_number" => &confirmation.order_number
        );
        Ok(())
    }
}

/// Fallback sender for environments without a mail relay: the confirmation
/// just goes to the log.
pub struct LogConfirmationSender {
    logger: Logger,
}

impl LogConfirmationSender {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl ConfirmationSender for LogConfirmationSender {
    async fn send_confirmation(
        &self,
        confirmation: &OrderConfirmation,
    ) -> Result<(), ServiceError> {
        info!(self.logger, "Order confirmation (no mail relay configured)";
            "order_number" => &confirmation.order_number,
            "customer_email" => &confirmation.customer_email,
            "amount" => %confirmation.total_amount,
            "currency" => &confirmation.currency
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn cart_clear_list_key_is_case_insensitive() {
        assert_eq!(
            RedisNotificationService::cart_clear_list("Asha@Example.com"),
            RedisNotificationService::cart_clear_list("asha@example.com"),
        );
    }

    #[test]
    fn relay_message_flattens_confirmation_fields() {
        let confirmation = OrderConfirmation {
            order_number: "PF-20260101-ABCDEF01".to_string(),
            customer_email: "asha@example.com".to_string(),
            customer_name: "Asha Mwangi".to_string(),
            total_amount: dec!(1250.00),
            currency: "KES".to_string(),
            confirmation_code: Some("CONF-9".to_string()),
            payment_method: Some("card".to_string()),
        };
        let message = RelayMessage {
            from: "orders@example.com",
            to: &confirmation.customer_email,
            subject: "Order confirmed".to_string(),
            confirmation: &confirmation,
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["from"], "orders@example.com");
        assert_eq!(value["order_number"], "PF-20260101-ABCDEF01");
        assert_eq!(value["confirmation_code"], "CONF-9");
    }
}
