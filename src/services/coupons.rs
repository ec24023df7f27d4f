use crate::{
    db::DbPool,
    entities::coupon::{self, DiscountType, Entity as CouponEntity, Model as CouponModel},
    errors::ServiceError,
    services::pricing::PricedCart,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, instrument, warn};
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateCouponRequest {
    #[validate(length(min = 1, max = 50, message = "Coupon code is required"))]
    pub code: String,
    pub discount_type: DiscountType,
    #[validate(range(min = 0))]
    pub discount_value: i64,
    pub min_purchase: Option<i64>,
    pub product_id: Option<i64>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default = "default_is_active")]
    pub is_active: bool,
    pub usage_limit: Option<i32>,
}

fn default_is_active() -> bool {
    true
}

/// Admin edit payload. `used_count` is deliberately absent: the counter only
/// moves through `redeem`. Nullable fields distinguish "absent" (keep) from
/// "null" (clear) via `double_option`.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct UpdateCouponRequest {
    pub discount_type: Option<DiscountType>,
    #[validate(range(min = 0))]
    pub discount_value: Option<i64>,
    #[serde(default, deserialize_with = "double_option")]
    pub min_purchase: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub product_id: Option<Option<i64>>,
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "double_option")]
    pub valid_until: Option<Option<DateTime<Utc>>>,
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub usage_limit: Option<Option<i32>>,
}

/// Present-but-null deserializes to `Some(None)`; an absent field falls back
/// to the `default` of `None`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CouponListResponse {
    pub coupons: Vec<CouponModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Validates coupons against a priced cart and reserves usage units through
/// a conditional write. The store is the only synchronization point; there
/// is no in-process counter, so any number of service instances stay safe.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DbPool>,
}

impl CouponService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    pub async fn find_by_code<C: ConnectionTrait>(
        conn: &C,
        code: &str,
    ) -> Result<Option<CouponModel>, ServiceError> {
        Ok(CouponEntity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(conn)
            .await?)
    }

    /// Validation chain for a coupon against a resolved cart, short-circuiting
    /// on the first failure:
    /// 1. active and inside its validity window, else `CouponInvalid`;
    /// 2. product scoping satisfied, else `CouponNotApplicable`;
    /// 3. minimum purchase met, else `CouponMinNotMet`;
    /// 4. usage remaining, else `CouponExhausted` (fast-path only; the
    ///    authoritative check is the conditional increment in `redeem`).
    pub fn validate_for_cart(
        coupon: &CouponModel,
        now: DateTime<Utc>,
        cart: &PricedCart,
    ) -> Result<(), ServiceError> {
        if !coupon.is_live_at(now) {
            return Err(ServiceError::CouponInvalid);
        }

        if let Some(product_id) = coupon.product_id {
            if !cart.contains_product(product_id) {
                return Err(ServiceError::CouponNotApplicable);
            }
        }

        if let Some(min_purchase) = coupon.min_purchase {
            if cart.subtotal < min_purchase {
                return Err(ServiceError::CouponMinNotMet);
            }
        }

        if !coupon.has_remaining_use() {
            return Err(ServiceError::CouponExhausted);
        }

        Ok(())
    }

    /// Discount in the smallest currency unit, clamped to
    /// `[0, subtotal + shipping]` so the order total can never go negative.
    /// A discount exceeding the cap is a pricing bug, logged before clamping.
    pub fn discount_amount(
        coupon: &CouponModel,
        subtotal: i64,
        shipping: i64,
    ) -> Result<i64, ServiceError> {
        let discount_type = coupon.discount_type().map_err(|_| {
            error!(coupon_id = coupon.id, discount_type = %coupon.discount_type, "unknown discount type");
            ServiceError::InternalError(format!(
                "Coupon {} carries unknown discount type",
                coupon.id
            ))
        })?;

        let raw = match discount_type {
            DiscountType::Percentage => subtotal.saturating_mul(coupon.discount_value) / 100,
            DiscountType::Fixed => coupon.discount_value,
        };

        let cap = subtotal + shipping;
        if raw > cap {
            error!(
                coupon_id = coupon.id,
                raw, cap, "discount exceeds subtotal plus shipping; clamping"
            );
        }

        Ok(raw.clamp(0, cap))
    }

    /// Atomically reserves one usage unit: `UPDATE coupons SET used_count =
    /// used_count + 1 WHERE id = ? AND (no limit OR used_count < limit)`.
    /// Zero affected rows means a racing request took the last unit; the
    /// caller must abort its enclosing transaction.
    pub async fn redeem<C: ConnectionTrait>(
        conn: &C,
        coupon_id: i64,
    ) -> Result<(), ServiceError> {
        let result = CouponEntity::update_many()
            .col_expr(
                coupon::Column::UsedCount,
                Expr::col(coupon::Column::UsedCount).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(coupon::Column::Id.eq(coupon_id))
            .filter(
                Condition::any()
                    .add(coupon::Column::UsageLimit.is_null())
                    .add(coupon::Column::UsageLimit.eq(0))
                    .add(
                        Expr::col(coupon::Column::UsedCount)
                            .lt(Expr::col(coupon::Column::UsageLimit)),
                    ),
            )
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            warn!(coupon_id, "coupon usage limit reached during redemption");
            return Err(ServiceError::CouponExhausted);
        }

        Ok(())
    }

    // ---- admin surface ----

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create_coupon(
        &self,
        request: CreateCouponRequest,
    ) -> Result<CouponModel, ServiceError> {
        request.validate()?;

        if Self::find_by_code(&*self.db, &request.code).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Coupon code '{}' already exists",
                request.code
            )));
        }

        let active = coupon::ActiveModel {
            code: Set(request.code),
            discount_type: Set(request.discount_type.to_string()),
            discount_value: Set(request.discount_value),
            min_purchase: Set(request.min_purchase),
            product_id: Set(request.product_id),
            valid_from: Set(request.valid_from),
            valid_until: Set(request.valid_until),
            is_active: Set(request.is_active),
            usage_limit: Set(request.usage_limit),
            used_count: Set(0),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        Ok(active.insert(&*self.db).await?)
    }

    #[instrument(skip(self, request), fields(coupon_id))]
    pub async fn update_coupon(
        &self,
        coupon_id: i64,
        request: UpdateCouponRequest,
    ) -> Result<CouponModel, ServiceError> {
        request.validate()?;

        let existing = CouponEntity::find_by_id(coupon_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", coupon_id)))?;

        let mut active: coupon::ActiveModel = existing.into();
        if let Some(discount_type) = request.discount_type {
            active.discount_type = Set(discount_type.to_string());
        }
        if let Some(discount_value) = request.discount_value {
            active.discount_value = Set(discount_value);
        }
        if let Some(min_purchase) = request.min_purchase {
            active.min_purchase = Set(min_purchase);
        }
        if let Some(product_id) = request.product_id {
            active.product_id = Set(product_id);
        }
        if let Some(valid_from) = request.valid_from {
            active.valid_from = Set(valid_from);
        }
        if let Some(valid_until) = request.valid_until {
            active.valid_until = Set(valid_until);
        }
        if let Some(is_active) = request.is_active {
            active.is_active = Set(is_active);
        }
        if let Some(usage_limit) = request.usage_limit {
            active.usage_limit = Set(usage_limit);
        }
        active.updated_at = Set(Some(Utc::now()));

        Ok(active.update(&*self.db).await?)
    }

    pub async fn get_by_code(&self, code: &str) -> Result<CouponModel, ServiceError> {
        Self::find_by_code(&*self.db, code)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon '{}' not found", code)))
    }

    pub async fn list_coupons(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<CouponListResponse, ServiceError> {
        let paginator = CouponEntity::find()
            .order_by_desc(coupon::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let coupons = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(CouponListResponse {
            coupons,
            total,
            page,
            per_page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pricing::{LineItem, PricedCart};
    use chrono::Duration;

    fn cart(subtotal: i64, product_ids: &[i64]) -> PricedCart {
        PricedCart {
            subtotal,
            items: product_ids
                .iter()
                .map(|&product_id| LineItem {
                    product_id,
                    name: format!("product {product_id}"),
                    price: subtotal / product_ids.len() as i64,
                    quantity: 1,
                })
                .collect(),
        }
    }

    fn percentage_coupon(value: i64) -> CouponModel {
        let now = Utc::now();
        CouponModel {
            id: 1,
            code: "TEN".into(),
            discount_type: DiscountType::Percentage.to_string(),
            discount_value: value,
            min_purchase: None,
            product_id: None,
            valid_from: now - Duration::days(1),
            valid_until: None,
            is_active: true,
            usage_limit: None,
            used_count: 0,
            created_at: now,
            updated_at: None,
        }
    }

    #[test]
    fn percentage_discount_floors() {
        let coupon = percentage_coupon(10);
        // 10% of 2500 = 250
        assert_eq!(
            CouponService::discount_amount(&coupon, 2500, 100).unwrap(),
            250
        );
        // 10% of 999 floors to 99
        assert_eq!(
            CouponService::discount_amount(&coupon, 999, 0).unwrap(),
            99
        );
    }

    #[test]
    fn fixed_discount_is_clamped_to_subtotal_plus_shipping() {
        let mut coupon = percentage_coupon(0);
        coupon.discount_type = DiscountType::Fixed.to_string();
        coupon.discount_value = 5000;
        assert_eq!(
            CouponService::discount_amount(&coupon, 2500, 100).unwrap(),
            2600
        );
    }

    #[test]
    fn negative_discount_is_clamped_to_zero() {
        let mut coupon = percentage_coupon(0);
        coupon.discount_type = DiscountType::Fixed.to_string();
        coupon.discount_value = -500;
        assert_eq!(
            CouponService::discount_amount(&coupon, 2500, 100).unwrap(),
            0
        );
    }

    #[test]
    fn validation_order_short_circuits() {
        let now = Utc::now();

        // Inactive beats everything else.
        let mut coupon = percentage_coupon(10);
        coupon.is_active = false;
        coupon.product_id = Some(99);
        coupon.min_purchase = Some(100_000);
        assert!(matches!(
            CouponService::validate_for_cart(&coupon, now, &cart(2500, &[7])),
            Err(ServiceError::CouponInvalid)
        ));

        // Scoping is checked before minimum purchase.
        let mut coupon = percentage_coupon(10);
        coupon.product_id = Some(99);
        coupon.min_purchase = Some(100_000);
        assert!(matches!(
            CouponService::validate_for_cart(&coupon, now, &cart(2500, &[7])),
            Err(ServiceError::CouponNotApplicable)
        ));

        // Minimum purchase.
        let mut coupon = percentage_coupon(10);
        coupon.min_purchase = Some(3000);
        assert!(matches!(
            CouponService::validate_for_cart(&coupon, now, &cart(2500, &[7])),
            Err(ServiceError::CouponMinNotMet)
        ));

        // Exhausted fast path.
        let mut coupon = percentage_coupon(10);
        coupon.usage_limit = Some(3);
        coupon.used_count = 3;
        assert!(matches!(
            CouponService::validate_for_cart(&coupon, now, &cart(2500, &[7])),
            Err(ServiceError::CouponExhausted)
        ));
    }

    #[test]
    fn scoped_coupon_accepts_matching_cart() {
        let mut coupon = percentage_coupon(10);
        coupon.product_id = Some(7);
        assert!(CouponService::validate_for_cart(&coupon, Utc::now(), &cart(2500, &[7, 8])).is_ok());
    }

    #[test]
    fn ten_percent_with_min_purchase_over_discounted_cart() {
        let mut coupon = percentage_coupon(10);
        coupon.min_purchase = Some(2000);
        let cart = cart(2500, &[7]);
        CouponService::validate_for_cart(&coupon, Utc::now(), &cart).unwrap();
        let discount = CouponService::discount_amount(&coupon, cart.subtotal, 100).unwrap();
        assert_eq!(discount, 250);
        // total = subtotal + shipping - discount
        assert_eq!(cart.subtotal + 100 - discount, 2350);
    }
}
