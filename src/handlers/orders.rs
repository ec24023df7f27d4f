use crate::{
    entities::order::OrderStatus,
    errors::ServiceError,
    handlers::common::PaginationParams,
    services::{
        confirmation::ConfirmationOutcome,
        orders::{OrderListResponse, OrderResponse, PlaceOrderRequest},
    },
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    Json,
};
use serde::Deserialize;
use tracing::error;

/// POST /api/v1/orders
///
/// Public placement endpoint. Everything that affects money is recomputed
/// server-side; the response carries the persisted snapshot.
pub async fn place_order(
    State(state): State<AppState>,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.place_order(request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    pub token: Option<String>,
    pub order: Option<String>,
}

/// GET /api/v1/orders/confirm?token=...&order=...
///
/// Link target from the placement email. Always answers with a redirect to
/// the customer-facing confirmation page, carrying the outcome in the query
/// string; malformed links count as invalid and store failures map to
/// `status=error` so the browser never sees a bare 500.
pub async fn confirm_order(
    State(state): State<AppState>,
    Query(query): Query<ConfirmQuery>,
) -> Redirect {
    let outcome = match (query.order.as_deref(), query.token.as_deref()) {
        (Some(order), Some(token)) if !order.is_empty() && !token.is_empty() => {
            state.services.confirmation.confirm(order, token).await
        }
        _ => Ok(ConfirmationOutcome::Invalid),
    };

    let status = match outcome {
        Ok(outcome) => outcome.as_query_value(),
        Err(err) => {
            error!(error = %err, "confirmation lookup failed");
            "error"
        }
    };

    Redirect::to(&format!(
        "{}?status={}",
        state.config.confirmation_redirect_url, status
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    #[serde(default = "crate::handlers::common::default_page")]
    pub page: u64,
    #[serde(default = "crate::handlers::common::default_per_page")]
    pub per_page: u64,
    pub status: Option<String>,
}

/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<OrderListResponse>, ServiceError> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            s.parse::<OrderStatus>()
                .map_err(|_| ServiceError::InvalidStatus(s.to_string()))
        })
        .transpose()?;

    let pagination = PaginationParams {
        page: query.page,
        per_page: query.per_page,
    };
    let response = state
        .services
        .orders
        .list_orders(pagination.page(), pagination.per_page(), status)
        .await?;
    Ok(Json(response))
}

/// GET /api/v1/orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<OrderResponse>, ServiceError> {
    Ok(Json(state.services.orders.get_order(id).await?))
}

/// GET /api/v1/orders/by-number/:number
pub async fn get_order_by_number(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> Result<Json<OrderResponse>, ServiceError> {
    Ok(Json(
        state.services.orders.get_order_by_number(&number).await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// PUT /api/v1/orders/:id/status
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let status: OrderStatus = request
        .status
        .parse()
        .map_err(|_| ServiceError::InvalidStatus(request.status.clone()))?;
    let order = state.services.order_status.update_status(id, status).await?;
    Ok(Json(order))
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyRequest {
    #[serde(default = "default_approve")]
    pub approve: bool,
}

fn default_approve() -> bool {
    true
}

/// POST /api/v1/orders/:id/verify
pub async fn verify_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<VerifyRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .order_status
        .verify(id, request.approve)
        .await?;
    Ok(Json(order))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

/// POST /api/v1/orders/:id/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<CancelRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .order_status
        .cancel(id, request.reason)
        .await?;
    Ok(Json(order))
}

/// DELETE /api/v1/orders/:id
pub async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.orders.delete_order(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
