use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::dtos::{ApiResponse, BookingResponse, CreateBookingRequest};
use crate::startup::AppState;

#[tracing::instrument(skip(state, request))]
pub async fn create_booking(
    State(state): State<AppState>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<ApiResponse<BookingResponse>>), AppError> {
    let input = request.into_new_booking()?;
    let booking = state.lifecycle.create(input).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(
            "Booking created successfully",
            booking.into(),
        )),
    ))
}

/// Bookings made by a tourist, newest first.
#[tracing::instrument(skip(state))]
pub async fn bookings_for_user(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<ApiResponse<Vec<BookingResponse>>>, AppError> {
    let bookings = state.lifecycle.bookings_for_tourist(&email).await?;
    Ok(Json(ApiResponse::data(
        bookings.into_iter().map(BookingResponse::from).collect(),
    )))
}

#[tracing::instrument(skip(state))]
pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.lifecycle.cancel(&id).await?;
    Ok(Json(ApiResponse::message("Booking cancelled successfully")))
}

#[tracing::instrument(skip(state))]
pub async fn delete_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.lifecycle.delete(&id).await?;
    Ok(Json(ApiResponse::message("Booking deleted successfully")))
}
