//! Wire-level request and response shapes for the hosted-checkout gateway API.
//!
//! Field names follow the gateway's JSON contract exactly; everything the
//! rest of the crate touches goes through the domain types in the parent
//! module instead.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Error object the gateway embeds in otherwise-200 responses.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayErrorBody {
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl GatewayErrorBody {
    /// Gateway error code, or a stable placeholder when the gateway omits it.
    pub fn code_or_unknown(&self) -> String {
        self.code
            .clone()
            .or_else(|| self.error_type.clone())
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }

    pub fn message_or_default(&self) -> String {
        self.message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "The payment gateway rejected the request".to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenRequest<'a> {
    pub consumer_key: &'a str,
    pub consumer_secret: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: Option<String>,
    /// RFC 3339 timestamp; the gateway sends sub-second precision
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<GatewayErrorBody>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterIpnRequest<'a> {
    pub url: &'a str,
    /// The gateway redelivers over the registered method; we take GET
    pub ipn_notification_type: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterIpnResponse {
    pub ipn_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<GatewayErrorBody>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillingAddress {
    pub email_address: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOrderRequest {
    /// Merchant reference: our order number
    pub id: String,
    pub currency: String,
    pub amount: Decimal,
    pub description: String,
    pub callback_url: String,
    /// IPN registration id returned by RegisterIPN
    pub notification_id: String,
    pub billing_address: BillingAddress,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitOrderResponse {
    pub order_tracking_id: Option<String>,
    #[serde(default)]
    pub merchant_reference: Option<String>,
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub error: Option<GatewayErrorBody>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionStatusResponse {
    pub status_code: Option<i32>,
    pub payment_status_description: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub confirmation_code: Option<String>,
    #[serde(default)]
    pub merchant_reference: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<GatewayErrorBody>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_parses_gateway_timestamp_precision() {
        let raw = r#"{
            "token": "eyJhbGciOiJIUzI1NiJ9.abc.def",
            "expiryDate": "2024-08-26T12:29:30.5177702Z",
            "error": null,
            "status": "200"
        }"#;
        let parsed: TokenResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.token.as_deref(), Some("eyJhbGciOiJIUzI1NiJ9.abc.def"));
        assert!(parsed.expiry_date.is_some());
        assert!(parsed.error.is_none());
    }

    #[test]
    fn submit_order_response_with_embedded_error() {
        let raw = r#"{
            "order_tracking_id": null,
            "redirect_url": null,
            "error": {
                "error_type": "api_error",
                "code": "500.004.1001",
                "message": "Invalid currency code"
            },
            "status": "400"
        }"#;
        let parsed: SubmitOrderResponse = serde_json::from_str(raw).unwrap();
        let error = parsed.error.unwrap();
        assert_eq!(error.code_or_unknown(), "500.004.1001");
        assert_eq!(error.message_or_default(), "Invalid currency code");
    }

    #[test]
    fn error_body_falls_back_when_fields_missing() {
        let raw = r#"{"error_type": "auth_error"}"#;
        let parsed: GatewayErrorBody = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.code_or_unknown(), "auth_error");
        assert_eq!(
            parsed.message_or_default(),
            "The payment gateway rejected the request"
        );
    }

    #[test]
    fn transaction_status_response_parses_full_payload() {
        let raw = r#"{
            "payment_method": "Visa",
            "amount": 1250.00,
            "created_date": "2024-08-26T12:30:00Z",
            "confirmation_code": "ABC123XYZ",
            "payment_status_description": "Completed",
            "description": "ok",
            "message": "Request processed successfully",
            "payment_account": "476173**0011",
            "call_back_url": "https://shop.example.com/callback",
            "status_code": 1,
            "merchant_reference": "ORD-2024-0001",
            "currency": "KES"
        }"#;
        let parsed: TransactionStatusResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.status_code, Some(1));
        assert_eq!(parsed.payment_status_description.as_deref(), Some("Completed"));
        assert_eq!(parsed.confirmation_code.as_deref(), Some("ABC123XYZ"));
    }
}
