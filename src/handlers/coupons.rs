use crate::{
    entities::coupon::Model as CouponModel,
    errors::ServiceError,
    handlers::common::PaginationParams,
    services::coupons::{CouponListResponse, CreateCouponRequest, UpdateCouponRequest},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

/// POST /api/v1/coupons
pub async fn create_coupon(
    State(state): State<AppState>,
    Json(request): Json<CreateCouponRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let coupon = state.services.coupons.create_coupon(request).await?;
    Ok((StatusCode::CREATED, Json(coupon)))
}

/// GET /api/v1/coupons
pub async fn list_coupons(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<CouponListResponse>, ServiceError> {
    let response = state
        .services
        .coupons
        .list_coupons(pagination.page(), pagination.per_page())
        .await?;
    Ok(Json(response))
}

/// GET /api/v1/coupons/by-code/:code
pub async fn get_coupon_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<CouponModel>, ServiceError> {
    Ok(Json(state.services.coupons.get_by_code(&code).await?))
}

/// PUT /api/v1/coupons/:id
pub async fn update_coupon(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateCouponRequest>,
) -> Result<Json<CouponModel>, ServiceError> {
    Ok(Json(
        state.services.coupons.update_coupon(id, request).await?,
    ))
}
