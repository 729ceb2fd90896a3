//! Payment gateway integration.
//!
//! The gateway hosts the actual payment page: we submit an order, receive a
//! tracking id plus a redirect URL for the hosted iframe, and later ask the
//! gateway what happened to the payment. Everything observable about a
//! payment's fate comes from [`PaymentGateway::transaction_status`]; webhook
//! payloads are treated as wake-up signals only.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::errors::ServiceError;

pub mod client;
pub mod token;
pub mod types;

pub use client::GatewayClient;
pub use token::GatewayTokenCache;

/// An order as the gateway needs to see it, detached from our own entities so
/// callers cannot leak internal state onto the wire.
#[derive(Debug, Clone)]
pub struct OrderSubmission {
    /// Our order number, echoed back by the gateway as the merchant reference.
    pub merchant_reference: String,
    pub currency: String,
    pub amount: Decimal,
    pub description: String,
    pub customer_email: String,
    pub customer_first_name: String,
    pub customer_last_name: String,
    pub customer_phone: Option<String>,
}

/// What a successful submission hands back: the gateway's identifier for the
/// payment and the URL the customer's browser must load to pay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub tracking_id: String,
    pub redirect_url: String,
}

/// The gateway's authoritative answer about a payment.
///
/// `status_code` is the gateway's numeric verdict (0 pending, 1 completed,
/// 2 failed, 3 cancelled); `description` is its human-readable counterpart and
/// doubles as a fallback when the code is one we do not recognize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionStatus {
    pub status_code: i32,
    pub description: String,
    pub confirmation_code: Option<String>,
    pub payment_method: Option<String>,
}

/// Seam between the reconciliation logic and the real HTTP gateway, so tests
/// can stand in a scripted gateway without a network.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Ensures our callback URL is registered with the gateway and returns
    /// the registration id that order submissions must carry.
    async fn register_notification_url(&self) -> Result<String, ServiceError>;

    /// Submits an order for payment. `Err(ServiceError::GatewayOrder)` means
    /// the gateway looked at the order and said no; transport trouble after
    /// the retry budget surfaces as `GatewayUnavailable`.
    async fn submit_order(&self, order: &OrderSubmission)
        -> Result<SubmissionReceipt, ServiceError>;

    /// Fetches the authoritative status of a payment by its tracking id.
    /// `Err(ServiceError::StatusUnavailable)` means we could not get an
    /// answer and the caller must not change any stored state.
    async fn transaction_status(&self, tracking_id: &str)
        -> Result<TransactionStatus, ServiceError>;
}
