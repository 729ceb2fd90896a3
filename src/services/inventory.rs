use crate::{
    db::DbPool,
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Catalog lookups and stock movements.
///
/// The stock decrement is a conditional update guarded by the current on-hand
/// quantity, the same pattern the payment ledger uses for status flips: the
/// database decides who wins, the service only reports the outcome.
#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DbPool>,
}

impl InventoryService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn find_active_product(
        &self,
        product_id: Uuid,
    ) -> Result<Option<product::Model>, ServiceError> {
        ProductEntity::find_by_id(product_id)
            .filter(product::Column::IsActive.eq(true))
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, product_id = %product_id, "Failed to fetch product");
                ServiceError::DatabaseError(e.into())
            })
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn find_product(
        &self,
        product_id: Uuid,
    ) -> Result<Option<product::Model>, ServiceError> {
        ProductEntity::find_by_id(product_id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, product_id = %product_id, "Failed to fetch product");
                ServiceError::DatabaseError(e.into())
            })
    }

    /// Subtracts `quantity` units if at least that many are on hand. Returns
    /// whether the decrement happened; `false` means the guard failed and
    /// stock was left untouched.
    #[instrument(skip(self), fields(product_id = %product_id, quantity = quantity))]
    pub async fn decrement_stock(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::InvalidInput(
                "Stock decrement quantity must be positive".to_string(),
            ));
        }

        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).sub(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::StockQuantity.gte(quantity))
            .exec(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, product_id = %product_id, "Failed to decrement stock");
                ServiceError::DatabaseError(e.into())
            })?;

        if result.rows_affected == 0 {
            warn!(
                product_id = %product_id,
                quantity,
                "Stock decrement refused, not enough units on hand"
            );
            return Ok(false);
        }

        info!(product_id = %product_id, quantity, "Stock decremented");
        Ok(true)
    }
}
