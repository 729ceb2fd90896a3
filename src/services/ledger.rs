use crate::{
    db::DbPool,
    entities::callback_log::{self, Entity as CallbackLogEntity},
    entities::order::{self, ActiveModel as OrderActiveModel, Entity as OrderEntity},
    entities::order_item::{self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity},
    entities::payment_transaction::{
        self, ActiveModel as PaymentTransactionActiveModel, Entity as PaymentTransactionEntity,
        PaymentStatus,
    },
    errors::ServiceError,
};
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Order header as the checkout flow hands it to the ledger, already priced
/// and validated.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub currency: String,
    pub total_amount: Decimal,
    pub notes: Option<String>,
}

/// One priced line of a new order.
#[derive(Debug, Clone)]
pub struct NewOrderLine {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl NewOrderLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Persistence for orders, payment transactions and callback audit rows.
///
/// All payment status writes go through [`TransactionLedger::apply_transition`],
/// a conditional update that only fires while the row still holds the expected
/// current status. That single guard is what makes concurrent webhook
/// deliveries, manual syncs and the background sweep safe against each other:
/// exactly one caller observes the flip, everyone else sees a no-op.
#[derive(Clone)]
pub struct TransactionLedger {
    db_pool: Arc<DbPool>,
}

impl TransactionLedger {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Creates the order, its lines and its PENDING payment transaction in one
    /// database transaction. The payment transaction starts without a tracking
    /// id; the merchant reference (the order number) is the only identifier
    /// until the gateway accepts the submission.
    #[instrument(skip(self, new_order, lines), fields(order_number = %new_order.order_number, line_count = lines.len()))]
    pub async fn create_order_with_transaction(
        &self,
        new_order: NewOrder,
        lines: Vec<NewOrderLine>,
    ) -> Result<(order::Model, payment_transaction::Model), ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let transaction_id = Uuid::new_v4();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e.into())
        })?;

        let order_model = OrderActiveModel {
            id: Set(order_id),
            order_number: Set(new_order.order_number.clone()),
            customer_name: Set(new_order.customer_name),
            customer_email: Set(new_order.customer_email),
            customer_phone: Set(new_order.customer_phone),
            status: Set("pending".to_string()),
            order_date: Set(now),
            total_amount: Set(new_order.total_amount),
            currency: Set(new_order.currency.clone()),
            payment_status: Set(PaymentStatus::Pending.order_payment_status().to_string()),
            notes: Set(new_order.notes),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order in database");
            ServiceError::DatabaseError(e.into())
        })?;

        for line in lines {
            OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                sku: Set(line.sku.clone()),
                name: Set(line.name.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                total_price: Set(line.line_total()),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            }
            .insert(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, sku = %line.sku, "Failed to create order line");
                ServiceError::DatabaseError(e.into())
            })?;
        }

        let transaction_model = PaymentTransactionActiveModel {
            id: Set(transaction_id),
            order_id: Set(order_id),
            merchant_reference: Set(new_order.order_number),
            tracking_id: Set(None),
            status: Set(PaymentStatus::Pending.as_str().to_string()),
            amount: Set(new_order.total_amount),
            currency: Set(new_order.currency),
            gateway_status_code: Set(None),
            gateway_description: Set(None),
            redirect_url: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create payment transaction");
            ServiceError::DatabaseError(e.into())
        })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e.into())
        })?;

        info!(
            order_id = %order_id,
            transaction_id = %transaction_id,
            "Order and payment transaction created"
        );

        Ok((order_model, transaction_model))
    }

    /// Records the gateway's tracking id and hosted page URL on a still-PENDING
    /// transaction. Only PENDING rows accept a tracking id: a transaction that
    /// was finalized in the meantime must not be re-keyed.
    #[instrument(skip(self), fields(transaction_id = %transaction_id, tracking_id = %tracking_id))]
    pub async fn attach_tracking_id(
        &self,
        transaction_id: Uuid,
        tracking_id: &str,
        redirect_url: &str,
    ) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();

        let result = PaymentTransactionEntity::update_many()
            .col_expr(
                payment_transaction::Column::TrackingId,
                Expr::value(Some(tracking_id.to_string())),
            )
            .col_expr(
                payment_transaction::Column::RedirectUrl,
                Expr::value(Some(redirect_url.to_string())),
            )
            .col_expr(payment_transaction::Column::UpdatedAt, Expr::value(now))
            .filter(payment_transaction::Column::Id.eq(transaction_id))
            .filter(payment_transaction::Column::Status.eq(PaymentStatus::Pending.as_str()))
            .exec(db)
            .await
            .map_err(|e| {
                error!(error = %e, transaction_id = %transaction_id, "Failed to attach tracking id");
                ServiceError::DatabaseError(e.into())
            })?;

        if result.rows_affected == 0 {
            warn!(
                transaction_id = %transaction_id,
                "Transaction no longer pending, refusing to attach tracking id"
            );
            return Err(ServiceError::TransitionConflict { transaction_id });
        }

        Ok(())
    }

    /// Flips a transaction from `from` to `to` if and only if it still holds
    /// `from`. Returns whether this caller won the flip. The order's derived
    /// payment status is updated in the same database transaction, so the two
    /// rows can never disagree.
    ///
    /// Terminal states are final: a transition whose `from` is terminal is
    /// rejected here without touching the database, no matter what the row
    /// currently holds.
    #[instrument(skip(self), fields(transaction_id = %transaction_id, from = %from, to = %to))]
    pub async fn apply_transition(
        &self,
        transaction_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        gateway_status_code: Option<i32>,
        gateway_description: Option<String>,
    ) -> Result<bool, ServiceError> {
        if from.is_terminal() {
            warn!(
                transaction_id = %transaction_id,
                from = %from,
                to = %to,
                "Rejected transition out of a terminal status"
            );
            return Ok(false);
        }

        let db = &*self.db_pool;
        let now = Utc::now();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, transaction_id = %transaction_id, "Failed to start transition transaction");
            ServiceError::DatabaseError(e.into())
        })?;

        let result = PaymentTransactionEntity::update_many()
            .col_expr(
                payment_transaction::Column::Status,
                Expr::value(to.as_str()),
            )
            .col_expr(
                payment_transaction::Column::GatewayStatusCode,
                Expr::value(gateway_status_code),
            )
            .col_expr(
                payment_transaction::Column::GatewayDescription,
                Expr::value(gateway_description),
            )
            .col_expr(payment_transaction::Column::UpdatedAt, Expr::value(now))
            .filter(payment_transaction::Column::Id.eq(transaction_id))
            .filter(payment_transaction::Column::Status.eq(from.as_str()))
            .exec(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, transaction_id = %transaction_id, "Conditional status update failed");
                ServiceError::DatabaseError(e.into())
            })?;

        if result.rows_affected == 0 {
            txn.commit().await.map_err(|e| {
                error!(error = %e, transaction_id = %transaction_id, "Failed to commit no-op transition");
                ServiceError::DatabaseError(e.into())
            })?;
            info!(
                transaction_id = %transaction_id,
                "Transition lost the conditional update, another writer got there first"
            );
            return Ok(false);
        }

        // The winning flip also moves the order's derived payment status.
        let transaction = PaymentTransactionEntity::find_by_id(transaction_id)
            .one(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, transaction_id = %transaction_id, "Failed to re-read transaction after transition");
                ServiceError::DatabaseError(e.into())
            })?
            .ok_or_else(|| ServiceError::TransactionNotFound(transaction_id.to_string()))?;

        OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(to.order_payment_status()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(transaction.order_id))
            .exec(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %transaction.order_id, "Failed to update order payment status");
                ServiceError::DatabaseError(e.into())
            })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, transaction_id = %transaction_id, "Failed to commit transition transaction");
            ServiceError::DatabaseError(e.into())
        })?;

        info!(
            transaction_id = %transaction_id,
            order_id = %transaction.order_id,
            from = %from,
            to = %to,
            "Payment transaction transitioned"
        );

        Ok(true)
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn find_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to fetch order");
                ServiceError::DatabaseError(e.into())
            })
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn find_order_lines(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to fetch order lines");
                ServiceError::DatabaseError(e.into())
            })
    }

    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    pub async fn find_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<payment_transaction::Model>, ServiceError> {
        PaymentTransactionEntity::find_by_id(transaction_id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, transaction_id = %transaction_id, "Failed to fetch transaction");
                ServiceError::DatabaseError(e.into())
            })
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn find_transaction_by_order_id(
        &self,
        order_id: Uuid,
    ) -> Result<Option<payment_transaction::Model>, ServiceError> {
        PaymentTransactionEntity::find()
            .filter(payment_transaction::Column::OrderId.eq(order_id))
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to fetch transaction by order id");
                ServiceError::DatabaseError(e.into())
            })
    }

    #[instrument(skip(self))]
    pub async fn find_transaction_by_tracking_id(
        &self,
        tracking_id: &str,
    ) -> Result<Option<payment_transaction::Model>, ServiceError> {
        PaymentTransactionEntity::find()
            .filter(payment_transaction::Column::TrackingId.eq(tracking_id))
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, tracking_id = %tracking_id, "Failed to fetch transaction by tracking id");
                ServiceError::DatabaseError(e.into())
            })
    }

    #[instrument(skip(self))]
    pub async fn find_transaction_by_merchant_reference(
        &self,
        merchant_reference: &str,
    ) -> Result<Option<payment_transaction::Model>, ServiceError> {
        PaymentTransactionEntity::find()
            .filter(payment_transaction::Column::MerchantReference.eq(merchant_reference))
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, merchant_reference = %merchant_reference, "Failed to fetch transaction by merchant reference");
                ServiceError::DatabaseError(e.into())
            })
    }

    /// Resolves the transaction a callback refers to: the tracking id is
    /// authoritative, the merchant reference covers the window where the
    /// gateway calls back before we managed to store the tracking id.
    #[instrument(skip(self))]
    pub async fn resolve_callback_transaction(
        &self,
        tracking_id: &str,
        merchant_reference: Option<&str>,
    ) -> Result<Option<payment_transaction::Model>, ServiceError> {
        if let Some(found) = self.find_transaction_by_tracking_id(tracking_id).await? {
            return Ok(Some(found));
        }

        if let Some(reference) = merchant_reference.filter(|r| !r.trim().is_empty()) {
            if let Some(found) = self.find_transaction_by_merchant_reference(reference).await? {
                warn!(
                    tracking_id = %tracking_id,
                    merchant_reference = %reference,
                    "Callback resolved by merchant reference, tracking id not yet attached"
                );
                return Ok(Some(found));
            }
        }

        Ok(None)
    }

    /// PENDING transactions old enough for the background sweep to re-query.
    /// Rows without a tracking id are skipped: the gateway never accepted
    /// them, so there is nothing to ask about.
    #[instrument(skip(self))]
    pub async fn list_pending_sweep_candidates(
        &self,
        min_age: std::time::Duration,
        limit: u64,
    ) -> Result<Vec<payment_transaction::Model>, ServiceError> {
        use sea_orm::QuerySelect;

        let cutoff = Utc::now()
            - ChronoDuration::from_std(min_age).unwrap_or_else(|_| ChronoDuration::seconds(0));

        PaymentTransactionEntity::find()
            .filter(payment_transaction::Column::Status.eq(PaymentStatus::Pending.as_str()))
            .filter(payment_transaction::Column::TrackingId.is_not_null())
            .filter(payment_transaction::Column::CreatedAt.lt(cutoff))
            .order_by_asc(payment_transaction::Column::CreatedAt)
            .limit(limit)
            .all(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to list pending sweep candidates");
                ServiceError::DatabaseError(e.into())
            })
    }

    /// Writes the audit row for a received callback before any processing, so
    /// even a crash mid-reconciliation leaves evidence of the delivery.
    #[instrument(skip(self, raw_query))]
    pub async fn record_callback(
        &self,
        tracking_id: Option<&str>,
        merchant_reference: Option<&str>,
        notification_type: Option<&str>,
        raw_query: &str,
    ) -> Result<callback_log::Model, ServiceError> {
        callback_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            tracking_id: Set(tracking_id.map(str::to_string)),
            merchant_reference: Set(merchant_reference.map(str::to_string)),
            notification_type: Set(notification_type.map(str::to_string)),
            raw_query: Set(raw_query.to_string()),
            processed: Set(false),
            processing_error: Set(None),
            received_at: Set(Utc::now()),
            processed_at: Set(None),
        }
        .insert(&*self.db_pool)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to record callback");
            ServiceError::DatabaseError(e.into())
        })
    }

    #[instrument(skip(self), fields(callback_id = %callback_id))]
    pub async fn mark_callback_processed(&self, callback_id: Uuid) -> Result<(), ServiceError> {
        self.close_callback(callback_id, true, None).await
    }

    #[instrument(skip(self), fields(callback_id = %callback_id))]
    pub async fn mark_callback_failed(
        &self,
        callback_id: Uuid,
        error_message: &str,
    ) -> Result<(), ServiceError> {
        self.close_callback(callback_id, false, Some(error_message.to_string()))
            .await
    }

    async fn close_callback(
        &self,
        callback_id: Uuid,
        processed: bool,
        error_message: Option<String>,
    ) -> Result<(), ServiceError> {
        let now = Utc::now();

        CallbackLogEntity::update_many()
            .col_expr(callback_log::Column::Processed, Expr::value(processed))
            .col_expr(
                callback_log::Column::ProcessingError,
                Expr::value(error_message),
            )
            .col_expr(callback_log::Column::ProcessedAt, Expr::value(Some(now)))
            .filter(callback_log::Column::Id.eq(callback_id))
            .exec(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, callback_id = %callback_id, "Failed to close callback log row");
                ServiceError::DatabaseError(e.into())
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn line_total_multiplies_unit_price_by_quantity() {
        let line = NewOrderLine {
            product_id: Uuid::new_v4(),
            sku: "SKU-1".to_string(),
            name: "Ceramic mug".to_string(),
            quantity: 3,
            unit_price: dec!(1250.50),
        };

        assert_eq!(line.line_total(), dec!(3751.50));
    }

    #[test]
    fn order_payment_status_collapses_terminal_failures() {
        assert_eq!(PaymentStatus::Pending.order_payment_status(), "pending");
        assert_eq!(PaymentStatus::Completed.order_payment_status(), "completed");
        assert_eq!(PaymentStatus::Failed.order_payment_status(), "failed");
        assert_eq!(PaymentStatus::Cancelled.order_payment_status(), "failed");
    }
}
