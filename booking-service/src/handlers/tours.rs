use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;

use crate::dtos::{ApiResponse, BookingResponse, TourStatusRequest};
use crate::startup::AppState;

/// Bookings assigned to a guide.
#[tracing::instrument(skip(state))]
pub async fn assigned_tours(
    State(state): State<AppState>,
    Path(guide_email): Path<String>,
) -> Result<Json<ApiResponse<Vec<BookingResponse>>>, AppError> {
    let tours = state.lifecycle.tours_for_guide(&guide_email).await?;
    Ok(Json(ApiResponse::data(
        tours.into_iter().map(BookingResponse::from).collect(),
    )))
}

/// Guide accepts or rejects a pending booking.
#[tracing::instrument(skip(state, request))]
pub async fn update_tour_status(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
    Json(request): Json<TourStatusRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    let status = state
        .lifecycle
        .review_tour(&booking_id, &request.status)
        .await?;
    Ok(Json(ApiResponse::message(format!(
        "Tour {} successfully",
        status
    ))))
}
