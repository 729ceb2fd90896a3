use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Payflow API",
        version = "0.3.0",
        description = r#"
# Payflow Payment Orchestration API

Order intake and payment reconciliation for a hosted-checkout payment gateway.

## Flow

1. **Create a checkout order** (`POST /api/v1/checkout/orders`). The order and
   its payment transaction are recorded, the order is submitted to the gateway,
   and the response carries the hosted payment page URL to embed in an iframe.
2. **The buyer pays on the gateway's page.** The gateway notifies our
   `/callback` endpoint when the payment settles.
3. **We reconcile.** Every callback triggers a fresh status query against the
   gateway; the stored transaction only moves on the gateway's authoritative
   answer. Fulfilment (stock decrement, confirmation email, cart clearing)
   happens exactly once, on the single winning transition out of PENDING.

## Reliability

- Callbacks are treated as wake-up signals, never as facts: duplicates and
  replays are harmless because the status is always re-fetched.
- A background sweep re-queries aged-out pending payments, so a lost callback
  only delays settlement.
- `POST /api/v1/payments/sync` forces the same reconciliation on demand for a
  batch of orders.

## Error Handling

Errors use a consistent envelope with appropriate HTTP status codes:

```json
{
  "error": "Unprocessable Entity",
  "message": "Payment gateway rejected the order",
  "request_id": "6e1cf7e2",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        contact(
            name = "Payflow Support",
            email = "support@payflow.dev"
        ),
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "https://api.payflow.dev", description = "Production server"),
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Checkout", description = "Order intake and order status"),
        (name = "Payments", description = "Manual payment status reconciliation"),
        (name = "Callbacks", description = "Gateway notification endpoint")
    ),
    paths(
        // Checkout
        crate::handlers::checkout::create_checkout_order,
        crate::handlers::checkout::get_checkout_order,

        // Payments
        crate::handlers::payments::sync_payments,

        // Callbacks
        crate::handlers::callbacks::gateway_callback,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,

            // Checkout types
            crate::handlers::checkout::CreateCheckoutOrderRequest,
            crate::handlers::checkout::CheckoutOrderItem,
            crate::handlers::checkout::CheckoutOrderResponse,
            crate::handlers::checkout::CheckoutFailureResponse,
            crate::handlers::checkout::OrderStatusResponse,
            crate::handlers::checkout::OrderStatusItem,
            crate::handlers::checkout::OrderPaymentStatus,

            // Payments types
            crate::handlers::payments::SyncPaymentsRequest,
            crate::handlers::payments::SyncPaymentsResponse,
            crate::handlers::payments::OrderSyncRow,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_covers_the_public_surface() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Payflow API"));
        assert!(json.contains("/api/v1/checkout/orders"));
        assert!(json.contains("/api/v1/payments/sync"));
        assert!(json.contains("/callback"));
    }
}
