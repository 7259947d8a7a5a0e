use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;

use crate::dtos::{
    ApiResponse, ConfirmPaymentRequest, ConfirmPaymentResponse, PaymentIntentRequest,
    PaymentIntentResponse, PaymentTransactionResponse,
};
use crate::startup::AppState;

#[tracing::instrument(skip(state, request))]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    Json(request): Json<PaymentIntentRequest>,
) -> Result<Json<PaymentIntentResponse>, AppError> {
    let (Some(amount), Some(booking_id)) = (request.amount, request.booking_id) else {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Amount and booking ID are required"
        )));
    };

    let handle = state
        .lifecycle
        .request_payment_intent(&booking_id, amount, request.currency.as_deref())
        .await?;

    Ok(Json(handle.into()))
}

/// Re-verify settlement with the processor and record it.
///
/// A payment recorded without advancing the booking still answers 200, with
/// `bookingUpdateFailed: true` and a `warning`.
#[tracing::instrument(skip(state, request))]
pub async fn confirm_payment(
    State(state): State<AppState>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<ConfirmPaymentResponse>, AppError> {
    let outcome = state
        .lifecycle
        .confirm_payment(&request.payment_intent_id, &request.booking_id)
        .await?;

    Ok(Json(outcome.into()))
}

pub async fn list_payments(
    State(state): State<AppState>,
) -> Result<Json<Vec<PaymentTransactionResponse>>, AppError> {
    let payments = state.lifecycle.all_payments().await?;
    Ok(Json(
        payments
            .into_iter()
            .map(PaymentTransactionResponse::from)
            .collect(),
    ))
}

/// Ledger rows for one booking, newest first.
#[tracing::instrument(skip(state))]
pub async fn payment_history(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<PaymentTransactionResponse>>>, AppError> {
    let payments = state.lifecycle.payment_history(&booking_id).await?;
    Ok(Json(ApiResponse::data(
        payments
            .into_iter()
            .map(PaymentTransactionResponse::from)
            .collect(),
    )))
}
