use crate::{
    db::DbPool,
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

/// Raw cart line as submitted by the client. Only the product reference and
/// quantity are read; any client-supplied price or name is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItemInput {
    pub product_id: i64,
    pub quantity: i32,
}

/// Immutable snapshot of one resolved line, persisted verbatim as an
/// order item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: i64,
    pub name: String,
    pub price: i64,
    pub quantity: i32,
}

impl LineItem {
    pub fn line_total(&self) -> i64 {
        self.price * self.quantity as i64
    }
}

#[derive(Debug, Clone)]
pub struct PricedCart {
    pub subtotal: i64,
    pub items: Vec<LineItem>,
}

impl PricedCart {
    pub fn contains_product(&self, product_id: i64) -> bool {
        self.items.iter().any(|item| item.product_id == product_id)
    }
}

/// Resolves authoritative unit prices and names from the catalog store.
#[derive(Clone)]
pub struct PricingService {
    db: Arc<DbPool>,
}

impl PricingService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Recomputes line items and subtotal from the catalog. Fails the whole
    /// placement if the cart is empty, a quantity is non-positive, or any
    /// referenced product is missing or inactive; no partial orders.
    #[instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn resolve(&self, items: &[CartItemInput]) -> Result<PricedCart, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::NoItems);
        }

        let ids: Vec<i64> = items.iter().map(|item| item.product_id).collect();
        let products: HashMap<i64, product::Model> = ProductEntity::find()
            .filter(product::Column::Id.is_in(ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        price_cart(&products, items)
    }
}

/// Pure pricing step, separated from the catalog fetch so the money math is
/// testable without a database.
pub(crate) fn price_cart(
    products: &HashMap<i64, product::Model>,
    items: &[CartItemInput],
) -> Result<PricedCart, ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::NoItems);
    }

    let mut lines = Vec::with_capacity(items.len());
    let mut subtotal: i64 = 0;

    for item in items {
        if item.quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "Quantity for product {} must be at least 1",
                item.product_id
            )));
        }

        let product = products
            .get(&item.product_id)
            .filter(|p| p.is_active)
            .ok_or(ServiceError::InvalidProduct(item.product_id))?;

        let line = LineItem {
            product_id: product.id,
            name: product.name.clone(),
            price: product.effective_price(),
            quantity: item.quantity,
        };
        subtotal += line.line_total();
        lines.push(line);
    }

    Ok(PricedCart {
        subtotal,
        items: lines,
    })
}
