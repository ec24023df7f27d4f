use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{
        coupon::Model as CouponModel,
        order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus, PaymentMethod},
        order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        confirmation::{generate_raw_token, hash_token},
        coupons::CouponService,
        pricing::{CartItemInput, PricingService},
    },
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use validator::Validate;

/// Placement payload. Prices, names, discounts, and totals are all computed
/// server-side; the client only names products, quantities, and a coupon
/// code.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PlaceOrderRequest {
    pub items: Vec<CartItemInput>,
    pub coupon_code: Option<String>,

    #[validate(length(max = 200))]
    pub customer_name: Option<String>,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    #[validate(length(min = 1, message = "Shipping address is required"))]
    pub shipping_address: String,
    pub note: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    #[validate(url(message = "Invalid payment slip URL"))]
    pub payment_slip_url: Option<String>,

    /// Shipping fee in the smallest currency unit.
    #[serde(default)]
    #[validate(range(min = 0, message = "Shipping fee cannot be negative"))]
    pub shipping: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderItemResponse {
    pub product_id: i64,
    pub name: String,
    pub price: i64,
    pub quantity: i32,
    pub line_total: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
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
    pub coupon_id: Option<i64>,
    pub placed_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItemResponse>,
}

impl OrderResponse {
    pub fn from_parts(order: OrderModel, items: Vec<OrderItemModel>) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            status: order.status,
            subtotal: order.subtotal,
            discount: order.discount,
            shipping: order.shipping,
            total: order.total,
            customer_name: order.customer_name,
            email: order.email,
            phone: order.phone,
            shipping_address: order.shipping_address,
            note: order.note,
            payment_method: order.payment_method,
            payment_slip_url: order.payment_slip_url,
            coupon_id: order.coupon_id,
            placed_at: order.placed_at,
            verified_at: order.verified_at,
            items: items
                .into_iter()
                .map(|item| OrderItemResponse {
                    line_total: item.line_total(),
                    product_id: item.product_id,
                    name: item.name,
                    price: item.price,
                    quantity: item.quantity,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Everything persisted by one successful placement, plus the raw token that
/// exists only long enough to build the confirmation link.
struct PlacedOrder {
    order: OrderModel,
    items: Vec<OrderItemModel>,
    coupon: Option<CouponModel>,
    raw_token: String,
}

/// `total == max(0, subtotal + shipping - discount)`, the invariant every
/// persisted order satisfies.
pub(crate) fn compute_total(subtotal: i64, shipping: i64, discount: i64) -> i64 {
    (subtotal + shipping - discount).max(0)
}

/// Order placement and admin read/delete surface. Placement runs pricing,
/// coupon validation, order assembly, number stamping, and coupon redemption
/// as one transaction; nothing is observable until commit.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    pricing: Arc<PricingService>,
    public_base_url: String,
    token_ttl: ChronoDuration,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: EventSender,
        pricing: Arc<PricingService>,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            pricing,
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            token_ttl: config.token_ttl(),
            retry_attempts: config.placement_retry_attempts,
            retry_backoff: Duration::from_millis(config.placement_retry_backoff_ms),
        }
    }

    /// Places an order. The write transaction is retried a bounded number of
    /// times with linear backoff, but only for transient connection errors;
    /// business failures (bad coupon, exhausted usage, unknown product) are
    /// never retried.
    #[instrument(skip(self, request), fields(lines = request.items.len()))]
    pub async fn place_order(
        &self,
        request: PlaceOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;

        let mut attempt: u32 = 0;
        let placed = loop {
            attempt += 1;
            match self.try_place(&request).await {
                Ok(placed) => break placed,
                Err(err) if err.is_transient() && attempt < self.retry_attempts => {
                    warn!(attempt, error = %err, "transient placement failure; retrying");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(err) => return Err(err),
            }
        };

        counter!("orders_placed_total", 1);

        let order_number = placed
            .order
            .order_number
            .clone()
            .unwrap_or_else(|| OrderModel::derive_order_number(placed.order.id));
        let link = self.confirmation_link(&order_number, &placed.raw_token);

        info!(
            order_id = placed.order.id,
            %order_number,
            total = placed.order.total,
            "order placed"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::OrderPlaced {
                order_id: placed.order.id,
                order_number: order_number.clone(),
                email: placed.order.email.clone(),
                total: placed.order.total,
                confirmation_link: link,
            })
            .await
        {
            warn!(order_id = placed.order.id, error = %e, "failed to send placement event");
        }

        if let Some(coupon) = &placed.coupon {
            counter!("coupons_redeemed_total", 1);
            if let Err(e) = self
                .event_sender
                .send(Event::CouponRedeemed {
                    coupon_id: coupon.id,
                    code: coupon.code.clone(),
                    order_id: placed.order.id,
                })
                .await
            {
                warn!(coupon_id = coupon.id, error = %e, "failed to send redemption event");
            }
        }

        Ok(OrderResponse::from_parts(placed.order, placed.items))
    }

    /// One placement attempt: a single transaction covering coupon checks,
    /// the order insert, order-number stamping, item inserts, and the
    /// conditional usage increment. Any error drops the transaction, which
    /// rolls everything back.
    async fn try_place(&self, request: &PlaceOrderRequest) -> Result<PlacedOrder, ServiceError> {
        let cart = self.pricing.resolve(&request.items).await?;

        let raw_token = generate_raw_token();
        let token_hash = hash_token(&raw_token);
        let now = Utc::now();

        let txn = self.db.begin().await?;

        let coupon = match normalized_code(&request.coupon_code) {
            Some(code) => {
                let coupon = CouponService::find_by_code(&txn, &code)
                    .await?
                    .ok_or(ServiceError::CouponInvalid)?;
                CouponService::validate_for_cart(&coupon, now, &cart)?;
                Some(coupon)
            }
            None => None,
        };

        let discount = match &coupon {
            Some(coupon) => {
                CouponService::discount_amount(coupon, cart.subtotal, request.shipping)?
            }
            None => 0,
        };
        let total = compute_total(cart.subtotal, request.shipping, discount);

        let order = order::ActiveModel {
            status: Set(OrderStatus::PendingConfirmation.to_string()),
            subtotal: Set(cart.subtotal),
            discount: Set(discount),
            shipping: Set(request.shipping),
            total: Set(total),
            customer_name: Set(request.customer_name.clone()),
            email: Set(request.email.clone()),
            phone: Set(request.phone.clone()),
            shipping_address: Set(request.shipping_address.clone()),
            note: Set(request.note.clone()),
            payment_method: Set(request.payment_method.map(|m| m.to_string())),
            payment_slip_url: Set(request.payment_slip_url.clone()),
            coupon_id: Set(coupon.as_ref().map(|c| c.id)),
            placed_at: Set(now),
            placement_token_hash: Set(Some(token_hash)),
            placement_token_expires_at: Set(Some(now + self.token_ttl)),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        // Second write of the two-phase numbering: the display number is
        // derived from the id the store just assigned.
        let order_id = order.id;
        let mut stamped: order::ActiveModel = order.into();
        stamped.order_number = Set(Some(OrderModel::derive_order_number(order_id)));
        let order = stamped.update(&txn).await?;

        let mut items = Vec::with_capacity(cart.items.len());
        for line in &cart.items {
            let item = order_item::ActiveModel {
                order_id: Set(order.id),
                product_id: Set(line.product_id),
                name: Set(line.name.clone()),
                price: Set(line.price),
                quantity: Set(line.quantity),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        // Last step before commit; a lost race surfaces here and aborts the
        // whole placement.
        if let Some(coupon) = &coupon {
            CouponService::redeem(&txn, coupon.id).await?;
        }

        txn.commit().await?;

        Ok(PlacedOrder {
            order,
            items,
            coupon,
            raw_token,
        })
    }

    fn confirmation_link(&self, order_number: &str, raw_token: &str) -> String {
        format!(
            "{}/api/v1/orders/confirm?token={}&order={}",
            self.public_base_url, raw_token, order_number
        )
    }

    // ---- read / admin surface ----

    pub async fn get_order(&self, id: i64) -> Result<OrderResponse, ServiceError> {
        let order = OrderEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
        let items = order.find_related(OrderItemEntity).all(&*self.db).await?;
        Ok(OrderResponse::from_parts(order, items))
    }

    pub async fn get_order_by_number(&self, number: &str) -> Result<OrderResponse, ServiceError> {
        let order = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order '{}' not found", number)))?;
        let items = order.find_related(OrderItemEntity).all(&*self.db).await?;
        Ok(OrderResponse::from_parts(order, items))
    }

    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
        status: Option<OrderStatus>,
    ) -> Result<OrderListResponse, ServiceError> {
        let mut query = OrderEntity::find().order_by_desc(order::Column::PlacedAt);
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status.to_string()));
        }

        let paginator = query.paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Hard delete of an order and its items, in one transaction.
    #[instrument(skip(self))]
    pub async fn delete_order(&self, id: i64) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        OrderItemEntity::delete_many()
            .filter(order_item::Column::OrderId.eq(id))
            .exec(&txn)
            .await?;

        let result = OrderEntity::delete_by_id(id).exec(&txn).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Order {} not found", id)));
        }

        txn.commit().await?;
        info!(order_id = id, "order deleted");
        Ok(())
    }
}

fn normalized_code(code: &Option<String>) -> Option<String> {
    code.as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}
