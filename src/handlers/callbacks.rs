use axum::{
    extract::{Query, RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
};
use metrics::counter;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};
use utoipa::IntoParams;

use crate::{errors::ServiceError, AppState};

/// Query parameters the gateway appends to its callback. Field names are the
/// gateway's, not ours.
#[derive(Debug, Deserialize, IntoParams)]
#[allow(non_snake_case)]
pub struct CallbackQuery {
    pub OrderTrackingId: Option<String>,
    pub OrderMerchantReference: Option<String>,
    pub OrderNotificationType: Option<String>,
}

/// Gateway payment notification
///
/// The notification body is never trusted: whatever the type field claims,
/// the gateway is re-queried for the authoritative status and the ledger is
/// reconciled against that answer. Any 5xx tells the gateway to redeliver.
#[utoipa::path(
    get,
    path = "/callback",
    summary = "Gateway payment notification",
    params(CallbackQuery),
    responses(
        (status = 200, description = "Notification processed", body = String),
        (status = 400, description = "Missing tracking id"),
        (status = 404, description = "No matching payment transaction"),
        (status = 500, description = "Reconciliation failed, gateway should redeliver"),
        (status = 503, description = "Gateway status unavailable, gateway should redeliver"),
    ),
    tag = "Callbacks"
)]
#[instrument(skip(state, raw_query), fields(
    tracking_id = query.OrderTrackingId.as_deref().unwrap_or("-"),
    merchant_reference = query.OrderMerchantReference.as_deref().unwrap_or("-")
))]
pub async fn gateway_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    RawQuery(raw_query): RawQuery,
) -> Result<impl IntoResponse, ServiceError> {
    let tracking_id = match query
        .OrderTrackingId
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        Some(id) => id.to_string(),
        None => {
            counter!("gateway_callbacks_total", 1, "outcome" => "missing_tracking_id");
            warn!("Callback arrived without a tracking id");
            return Ok((StatusCode::BAD_REQUEST, "missing OrderTrackingId").into_response());
        }
    };
    let merchant_reference = query
        .OrderMerchantReference
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());

    // Log first, process second: the audit row outlives any failure below.
    let callback_log = state
        .services
        .ledger
        .record_callback(
            Some(&tracking_id),
            merchant_reference,
            query.OrderNotificationType.as_deref(),
            raw_query.as_deref().unwrap_or(""),
        )
        .await?;

    let transaction = match state
        .services
        .ledger
        .resolve_callback_transaction(&tracking_id, merchant_reference)
        .await?
    {
        Some(transaction) => transaction,
        None => {
            counter!("gateway_callbacks_total", 1, "outcome" => "unresolved");
            warn!(tracking_id = %tracking_id, "Callback does not match any payment transaction");
            if let Err(e) = state
                .services
                .ledger
                .mark_callback_failed(callback_log.id, "no matching payment transaction")
                .await
            {
                error!(error = %e, callback_id = %callback_log.id, "Failed to annotate callback log");
            }
            return Ok((StatusCode::NOT_FOUND, "unknown payment transaction").into_response());
        }
    };

    match state
        .services
        .reconciler
        .reconcile_with_tracking_id(&transaction, &tracking_id)
        .await
    {
        Ok(outcome) => {
            counter!("gateway_callbacks_total", 1, "outcome" => "processed");
            info!(
                transaction_id = %transaction.id,
                new_status = %outcome.new_status,
                transitioned = outcome.transitioned,
                "Callback reconciled"
            );
            if let Err(e) = state
                .services
                .ledger
                .mark_callback_processed(callback_log.id)
                .await
            {
                error!(error = %e, callback_id = %callback_log.id, "Failed to flag callback processed");
            }
            Ok((StatusCode::OK, "OK").into_response())
        }
        Err(e) => {
            counter!("gateway_callbacks_total", 1, "outcome" => "error");
            error!(error = %e, transaction_id = %transaction.id, "Callback reconciliation failed");
            if let Err(mark_err) = state
                .services
                .ledger
                .mark_callback_failed(callback_log.id, &e.to_string())
                .await
            {
                error!(error = %mark_err, callback_id = %callback_log.id, "Failed to annotate callback log");
            }
            // Propagate as an error response (always 5xx here) so the
            // gateway's at-least-once redelivery kicks in.
            Err(e)
        }
    }
}

/// CORS preflight for the callback endpoint. The gateway probes it before the
/// real notification; anything but a permissive answer stops deliveries.
pub async fn callback_preflight() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        header::HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        header::HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        header::HeaderValue::from_static("*"),
    );
    (StatusCode::NO_CONTENT, headers)
}
