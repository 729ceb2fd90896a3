use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    errors::ServiceError,
    services::orders::{CheckoutInput, CheckoutLineInput, OrderDetails},
    ApiResponse, AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateCheckoutOrderRequest {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[validate(email)]
    pub email: String,
    pub phone: Option<String>,
    /// Three-letter currency code; the configured default applies when absent.
    pub currency: Option<String>,
    pub notes: Option<String>,
    #[validate]
    pub items: Vec<CheckoutOrderItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckoutOrderItem {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
}

/// Success contract for the storefront: everything needed to embed the
/// gateway's hosted payment page.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutOrderResponse {
    pub success: bool,
    pub order_id: Uuid,
    pub order_number: String,
    pub iframe_url: String,
    pub tracking_id: String,
    pub total_amount: Decimal,
    pub currency: String,
}

/// Failure contract for the known checkout failure classes, shaped so the
/// storefront can show something actionable instead of a raw 500.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutFailureResponse {
    pub error_code: String,
    pub user_message: String,
    pub support_contact: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderStatusResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub customer_name: String,
    pub customer_email: String,
    pub status: String,
    pub payment_status: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub order_date: DateTime<Utc>,
    pub items: Vec<OrderStatusItem>,
    pub payment: Option<OrderPaymentStatus>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderStatusItem {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderPaymentStatus {
    pub transaction_id: Uuid,
    pub status: String,
    pub tracking_id: Option<String>,
    pub redirect_url: Option<String>,
    pub gateway_description: Option<String>,
}

/// Create an order and open its hosted payment session
#[utoipa::path(
    post,
    path = "/api/v1/checkout/orders",
    summary = "Create checkout order",
    description = "Prices the requested items, persists the order with a pending payment transaction, submits it to the payment gateway and returns the hosted payment page URL",
    request_body = CreateCheckoutOrderRequest,
    responses(
        (status = 201, description = "Payment session opened", body = CheckoutOrderResponse,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 422, description = "Gateway rejected the order", body = CheckoutFailureResponse),
        (status = 502, description = "Gateway unreachable or credentials rejected", body = CheckoutFailureResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "Checkout"
)]
pub async fn create_checkout_order(
    State(state): State<AppState>,
    Json(request): Json<CreateCheckoutOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    request.validate()?;

    let input = CheckoutInput {
        customer_first_name: request.first_name,
        customer_last_name: request.last_name,
        customer_email: request.email,
        customer_phone: request.phone,
        currency: request.currency,
        notes: request.notes,
        items: request
            .items
            .into_iter()
            .map(|item| CheckoutLineInput {
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect(),
    };

    match state.services.checkout.create_order(input).await {
        Ok(receipt) => {
            info!(order_id = %receipt.order_id, "Checkout order created");
            Ok((
                StatusCode::CREATED,
                Json(CheckoutOrderResponse {
                    success: true,
                    order_id: receipt.order_id,
                    order_number: receipt.order_number,
                    iframe_url: receipt.iframe_url,
                    tracking_id: receipt.tracking_id,
                    total_amount: receipt.total_amount,
                    currency: receipt.currency,
                })
                .into_response(),
            ))
        }
        Err(e) => {
            if let Some((status, failure)) = checkout_failure(&e, &state) {
                error!(error = %e, error_code = %failure.error_code, "Checkout failed");
                return Ok((status, Json(failure).into_response()));
            }
            Err(e)
        }
    }
}

/// Maps the known gateway failure classes onto the structured checkout error
/// contract. Everything else falls through to the generic error response.
fn checkout_failure(
    error: &ServiceError,
    state: &AppState,
) -> Option<(StatusCode, CheckoutFailureResponse)> {
    let support_contact = state.config.email.support_contact.clone();
    match error {
        ServiceError::GatewayOrder { code, message } => Some((
            StatusCode::UNPROCESSABLE_ENTITY,
            CheckoutFailureResponse {
                error_code: code.clone(),
                user_message: message.clone(),
                support_contact,
            },
        )),
        ServiceError::AuthError(_) => Some((
            StatusCode::BAD_GATEWAY,
            CheckoutFailureResponse {
                error_code: "GATEWAY_CREDENTIALS".to_string(),
                user_message:
                    "The payment provider rejected our credentials. Please contact support."
                        .to_string(),
                support_contact,
            },
        )),
        ServiceError::GatewayUnavailable(_) => Some((
            StatusCode::BAD_GATEWAY,
            CheckoutFailureResponse {
                error_code: "GATEWAY_UNAVAILABLE".to_string(),
                user_message:
                    "The payment service is temporarily unreachable. Please try again shortly."
                        .to_string(),
                support_contact,
            },
        )),
        _ => None,
    }
}

/// Get an order with its payment state
#[utoipa::path(
    get,
    path = "/api/v1/checkout/orders/{id}",
    summary = "Get checkout order",
    description = "Returns the order, its lines and the current payment transaction state",
    params(
        ("id" = Uuid, Path, description = "Order id")
    ),
    responses(
        (status = 200, description = "Order found", body = ApiResponse<OrderStatusResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "Checkout"
)]
pub async fn get_checkout_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderStatusResponse>>, ServiceError> {
    let details = state.services.checkout.get_order(id).await?;
    Ok(Json(ApiResponse::success(order_status_response(details))))
}

fn order_status_response(details: OrderDetails) -> OrderStatusResponse {
    OrderStatusResponse {
        order_id: details.order_id,
        order_number: details.order_number,
        customer_name: details.customer_name,
        customer_email: details.customer_email,
        status: details.status,
        payment_status: details.payment_status,
        total_amount: details.total_amount,
        currency: details.currency,
        order_date: details.order_date,
        items: details
            .items
            .into_iter()
            .map(|item| OrderStatusItem {
                product_id: item.product_id,
                sku: item.sku,
                name: item.name,
                quantity: item.quantity,
                unit_price: item.unit_price,
                total_price: item.total_price,
            })
            .collect(),
        payment: details.payment.map(|payment| OrderPaymentStatus {
            transaction_id: payment.transaction_id,
            status: payment.status,
            tracking_id: payment.tracking_id,
            redirect_url: payment.redirect_url,
            gateway_description: payment.gateway_description,
        }),
    }
}
