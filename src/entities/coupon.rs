use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Discount coupon. `used_count` is the single contended counter in the
/// system and is only ever advanced through the conditional increment in
/// `services::coupons`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub code: String,
    pub discount_type: String,
    pub discount_value: i64,
    pub min_purchase: Option<i64>,
    /// When set, the coupon only applies to carts containing this product.
    pub product_id: Option<i64>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// None or 0 means unlimited.
    pub usage_limit: Option<i32>,
    pub used_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

impl Model {
    pub fn discount_type(&self) -> Result<DiscountType, strum::ParseError> {
        self.discount_type.parse()
    }

    /// Whether the coupon's activity window covers `now` and it is enabled.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.valid_from <= now
            && self.valid_until.map_or(true, |until| now <= until)
    }

    /// Fast-path usage check; the authoritative check is the conditional
    /// increment at redemption time.
    pub fn has_remaining_use(&self) -> bool {
        match self.usage_limit {
            None | Some(0) => true,
            Some(limit) => self.used_count < limit,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order::Entity")]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
