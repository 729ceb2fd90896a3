use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{Display, EnumIter as StrumEnumIter, EnumString};
use uuid::Uuid;

/// Lifecycle status of a payment transaction.
///
/// PENDING is the only non-terminal state. Terminal states never change
/// again; the conditional-update transition in the ledger enforces this.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    StrumEnumIter,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// The order-level payment status derived from this transaction status.
    /// Orders only distinguish pending/completed/failed.
    pub fn order_payment_status(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed | PaymentStatus::Cancelled => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        PaymentStatus::from_str(raw.trim().to_uppercase().as_str()).ok()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// One transaction per order
    pub order_id: Uuid,

    /// Our identifier sent to the gateway on submission; equals the order
    /// number. Used to resolve callbacks when the tracking id is unknown.
    pub merchant_reference: String,

    /// Gateway-issued identifier, unknown until the gateway accepts the order
    pub tracking_id: Option<String>,

    /// One of PENDING, COMPLETED, FAILED, CANCELLED
    pub status: String,

    pub amount: Decimal,
    pub currency: String,

    /// Last raw numeric status code reported by the gateway
    pub gateway_status_code: Option<i32>,

    /// Last textual payment status reported by the gateway
    pub gateway_description: Option<String>,

    /// Hosted checkout page URL returned on submission
    pub redirect_url: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    /// Typed view of the status column. Rows are only ever written through
    /// [`PaymentStatus::as_str`], so an unparseable value means external
    /// tampering and maps to None.
    pub fn payment_status(&self) -> Option<PaymentStatus> {
        PaymentStatus::parse(&self.status)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;

        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(now);
            }
        }

        if let ActiveValue::NotSet = active_model.updated_at {
            active_model.updated_at = Set(Some(now));
        }

        Ok(active_model)
    }
}
