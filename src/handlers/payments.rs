use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{errors::ServiceError, AppState};

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct SyncPaymentsRequest {
    #[validate(length(min = 1, max = 100, message = "Provide between 1 and 100 order ids"))]
    pub order_ids: Vec<Uuid>,
}

/// Wire format the storefront consumes; camelCase by contract.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderSyncRow {
    pub order_id: Uuid,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncPaymentsResponse {
    pub results: Vec<OrderSyncRow>,
}

/// Manually re-check payment status for a batch of orders
///
/// Each order is reconciled against the gateway with exactly the semantics of
/// a webhook delivery. Per-order failures land in that order's row; the batch
/// itself always answers 200.
#[utoipa::path(
    post,
    path = "/api/v1/payments/sync",
    summary = "Sync payment statuses",
    request_body = SyncPaymentsRequest,
    responses(
        (status = 200, description = "Per-order sync results", body = SyncPaymentsResponse,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
#[instrument(skip(state, request), fields(order_count = request.order_ids.len()))]
pub async fn sync_payments(
    State(state): State<AppState>,
    Json(request): Json<SyncPaymentsRequest>,
) -> Result<Json<SyncPaymentsResponse>, ServiceError> {
    request.validate()?;

    let mut results = Vec::with_capacity(request.order_ids.len());
    for order_id in request.order_ids {
        let row = match state.services.reconciler.sync_order(order_id).await {
            Ok(report) => OrderSyncRow {
                order_id: report.order_id,
                old_status: Some(report.old_status.as_str().to_string()),
                new_status: Some(report.new_status.as_str().to_string()),
                updated: report.updated,
                error: None,
            },
            Err(e) => {
                warn!(error = %e, order_id = %order_id, "Manual sync failed for order");
                OrderSyncRow {
                    order_id,
                    old_status: None,
                    new_status: None,
                    updated: false,
                    error: Some(e.to_string()),
                }
            }
        };
        results.push(row);
    }

    info!(
        synced = results.iter().filter(|r| r.updated).count(),
        total = results.len(),
        "Manual payment sync finished"
    );

    Ok(Json(SyncPaymentsResponse { results }))
}
