use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Order aggregate root. Money fields are integers in the smallest currency
/// unit and always computed server-side; `total == max(0, subtotal +
/// shipping - discount)` holds for every persisted row.
///
/// `order_number` is stamped in a second write after the store assigns the
/// id, inside the same transaction as the insert.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub order_number: Option<String>,
    pub status: String,

    pub subtotal: i64,
    pub discount: i64,
    pub shipping: i64,
    pub total: i64,

    pub customer_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub shipping_address: String,
    pub note: Option<String>,
    pub payment_method: Option<String>,
    pub payment_slip_url: Option<String>,

    /// Linkage only; the discount amount above is captured at placement and
    /// never recomputed, so coupon edits cannot change historical orders.
    pub coupon_id: Option<i64>,

    pub placed_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    /// SHA-256 hex digest of the raw confirmation token; null once consumed.
    pub placement_token_hash: Option<String>,
    pub placement_token_expires_at: Option<DateTime<Utc>>,

    pub updated_at: Option<DateTime<Utc>>,
}

/// Order lifecycle states. `Draft` exists only for the cart-draft/QR-prefill
/// flow and is never produced by the placement path.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Draft,
    PendingConfirmation,
    PendingVerification,
    Verified,
    Processing,
    Shipped,
    Delivered,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Rejected | Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cod,
    Online,
}

impl Model {
    pub fn status(&self) -> Result<OrderStatus, strum::ParseError> {
        self.status.parse()
    }

    /// Display identifier derived deterministically from the store id.
    pub fn derive_order_number(id: i64) -> String {
        format!("ORDER-{id:06}")
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(
        belongs_to = "super::coupon::Entity",
        from = "Column::CouponId",
        to = "super::coupon::Column::Id"
    )]
    Coupon,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::coupon::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Coupon.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;

        if !insert && matches!(active_model.updated_at, ActiveValue::NotSet) {
            active_model.updated_at = Set(Some(chrono::Utc::now()));
        }

        Ok(active_model)
    }
}
