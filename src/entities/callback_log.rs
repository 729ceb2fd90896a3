use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit row for every gateway callback, written before any processing so a
/// crash mid-reconciliation still leaves a trace of the delivery.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "callback_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tracking_id: Option<String>,
    pub merchant_reference: Option<String>,
    pub notification_type: Option<String>,

    /// Query string exactly as the gateway sent it
    pub raw_query: String,

    pub processed: bool,
    pub processing_error: Option<String>,

    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;

        if insert {
            if let ActiveValue::NotSet = active_model.received_at {
                active_model.received_at = Set(Utc::now());
            }
            if let ActiveValue::NotSet = active_model.processed {
                active_model.processed = Set(false);
            }
        }

        Ok(active_model)
    }
}
