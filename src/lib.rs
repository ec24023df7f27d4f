pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod notifications;
pub mod services;

use axum::{
    extract::State,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        confirmation::ConfirmationService, coupons::CouponService, order_status::OrderStatusService,
        orders::OrderService, pricing::PricingService,
    },
};

/// Service registry shared by all handlers.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
    pub confirmation: Arc<ConfirmationService>,
    pub coupons: Arc<CouponService>,
}

impl AppServices {
    pub fn new(db: Arc<DbPool>, config: &AppConfig, event_sender: EventSender) -> Self {
        let pricing = Arc::new(PricingService::new(db.clone()));
        Self {
            orders: Arc::new(OrderService::new(
                db.clone(),
                event_sender.clone(),
                pricing,
                config,
            )),
            order_status: Arc::new(OrderStatusService::new(db.clone(), event_sender.clone())),
            confirmation: Arc::new(ConfirmationService::new(db.clone(), event_sender)),
            coupons: Arc::new(CouponService::new(db)),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub services: AppServices,
}

impl AppState {
    pub fn new(db: Arc<DbPool>, config: Arc<AppConfig>, event_sender: EventSender) -> Self {
        let services = AppServices::new(db.clone(), &config, event_sender);
        Self {
            db,
            config,
            services,
        }
    }
}

/// All routes under `/api/v1`, plus the bare health probes.
pub fn app_router(state: AppState) -> Router {
    let api = Router::new()
        // Placement and listing; confirm is the public email-link target.
        .route(
            "/orders",
            post(handlers::orders::place_order).get(handlers::orders::list_orders),
        )
        .route("/orders/confirm", get(handlers::orders::confirm_order))
        .route(
            "/orders/:id",
            get(handlers::orders::get_order).delete(handlers::orders::delete_order),
        )
        .route(
            "/orders/by-number/:number",
            get(handlers::orders::get_order_by_number),
        )
        .route(
            "/orders/:id/status",
            put(handlers::orders::update_order_status),
        )
        .route("/orders/:id/verify", post(handlers::orders::verify_order))
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order))
        .route(
            "/coupons",
            post(handlers::coupons::create_coupon).get(handlers::coupons::list_coupons),
        )
        .route("/coupons/:id", put(handlers::coupons::update_coupon))
        .route(
            "/coupons/by-code/:code",
            get(handlers::coupons::get_coupon_by_code),
        )
        .route("/health", get(health_handler))
        .route("/status", get(status_handler));

    Router::new()
        .route("/", get(root_handler))
        .nest("/api/v1", api)
        .with_state(state)
}

async fn root_handler() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let db_healthy = db::check_connection(&state.db).await.is_ok();
    Json(json!({
        "status": if db_healthy { "ok" } else { "degraded" },
        "database": db_healthy,
    }))
}

async fn status_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "environment": state.config.environment,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
