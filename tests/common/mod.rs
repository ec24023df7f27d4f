#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use orderflow_api::{
    config::AppConfig,
    db::{establish_connection_with_config, run_migrations, DbConfig, DbPool},
    entities::{coupon, product},
    events::{Event, EventSender},
    AppState,
};
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;

/// Full application wired against a throwaway SQLite file. The event
/// receiver is held here instead of being drained by a worker, so tests can
/// observe emitted events and fish the raw confirmation token out of the
/// placement event.
pub struct TestApp {
    pub db: Arc<DbPool>,
    pub router: Router,
    pub events: mpsc::Receiver<Event>,
    db_path: String,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let db_path = format!("/tmp/orderflow-test-{}.db", uuid::Uuid::new_v4());
        let db_url = format!("sqlite://{db_path}?mode=rwc");

        // A single connection serializes transactions at the pool, which
        // keeps concurrent-placement tests deterministic on SQLite.
        let db_config = DbConfig {
            url: db_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let db = Arc::new(
            establish_connection_with_config(&db_config)
                .await
                .expect("test database"),
        );
        run_migrations(&db).await.expect("migrations");

        let (tx, rx) = mpsc::channel(64);
        let config = Arc::new(AppConfig::new(
            db_url,
            "127.0.0.1".into(),
            0,
            "test".into(),
            "http://localhost:8080".into(),
            "http://localhost:3000/order-confirmation".into(),
        ));

        let state = AppState::new(db.clone(), config, EventSender::new(tx));
        let router = orderflow_api::app_router(state);

        Self {
            db,
            router,
            events: rx,
            db_path,
        }
    }

    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(body) => {
                builder = builder.header("content-type", "application/json");
                builder.body(Body::from(body.to_string())).unwrap()
            }
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn post_json(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.request("POST", path, Some(body)).await
    }

    pub async fn put_json(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.request("PUT", path, Some(body)).await
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.request("GET", path, None).await
    }

    /// GET that returns the raw response so redirects can be inspected.
    pub async fn get_raw(&self, path: &str) -> (StatusCode, Option<String>) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let location = response
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        (status, location)
    }

    pub async fn seed_product(
        &self,
        name: &str,
        price: i64,
        sale_price: Option<i64>,
        is_active: bool,
    ) -> i64 {
        let model = product::ActiveModel {
            name: Set(name.to_string()),
            price: Set(price),
            sale_price: Set(sale_price),
            is_active: Set(is_active),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("seed product");
        model.id
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_type: &str,
        discount_value: i64,
        min_purchase: Option<i64>,
        product_id: Option<i64>,
        valid_until: Option<DateTime<Utc>>,
        usage_limit: Option<i32>,
    ) -> i64 {
        let model = coupon::ActiveModel {
            code: Set(code.to_string()),
            discount_type: Set(discount_type.to_string()),
            discount_value: Set(discount_value),
            min_purchase: Set(min_purchase),
            product_id: Set(product_id),
            valid_from: Set(Utc::now() - Duration::days(1)),
            valid_until: Set(valid_until),
            is_active: Set(true),
            usage_limit: Set(usage_limit),
            used_count: Set(0),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("seed coupon");
        model.id
    }

    /// Drains events until the next `OrderPlaced` and returns its
    /// confirmation link.
    pub fn confirmation_link(&mut self) -> String {
        while let Ok(event) = self.events.try_recv() {
            if let Event::OrderPlaced {
                confirmation_link, ..
            } = event
            {
                return confirmation_link;
            }
        }
        panic!("no OrderPlaced event was emitted");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
    }
}

/// Extracts the `token` and `order` query values from a confirmation link.
pub fn parse_confirmation_link(link: &str) -> (String, String) {
    let query = link.split_once('?').map(|(_, q)| q).unwrap_or_default();
    let mut token = None;
    let mut order = None;
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("token", v)) => token = Some(v.to_string()),
            Some(("order", v)) => order = Some(v.to_string()),
            _ => {}
        }
    }
    (token.expect("token in link"), order.expect("order in link"))
}
