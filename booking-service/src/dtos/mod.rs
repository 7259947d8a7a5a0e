//! Request and response bodies. Field names are camelCase on the wire.

use crate::models::{Booking, BookingStatus, GuideSnapshot, PaymentStatus, PaymentTransaction};
use crate::services::{ConfirmationOutcome, NewBooking, PaymentIntentHandle};
use chrono::{DateTime, NaiveDate, Utc};
use mongodb::bson;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use validator::{Validate, ValidationError, ValidationErrors};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    #[validate(
        required(message = "packageName is required"),
        length(min = 1, message = "packageName cannot be empty")
    )]
    pub package_name: Option<String>,

    #[validate(
        required(message = "touristName is required"),
        length(min = 1, message = "touristName cannot be empty")
    )]
    pub tourist_name: Option<String>,

    #[validate(
        required(message = "touristEmail is required"),
        email(message = "Invalid email format")
    )]
    pub tourist_email: Option<String>,

    pub tourist_image: Option<String>,

    /// Accepts a JSON number or a numeric string.
    #[validate(required(message = "price is required"))]
    pub price: Option<Decimal>,

    /// RFC 3339 timestamp or a plain `YYYY-MM-DD` date.
    #[validate(
        required(message = "tourDate is required"),
        length(min = 1, message = "tourDate cannot be empty")
    )]
    pub tour_date: Option<String>,

    #[validate(required(message = "selectedGuide is required"), nested)]
    pub selected_guide: Option<SelectedGuide>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct SelectedGuide {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub photo: Option<String>,
    #[validate(
        required(message = "guide email is required"),
        email(message = "Invalid guide email format")
    )]
    pub email: Option<String>,
}

fn field_error(field: &'static str, code: &'static str, message: &'static str) -> ValidationErrors {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    let mut errors = ValidationErrors::new();
    errors.add(field, error);
    errors
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, ValidationErrors> {
    value.ok_or_else(|| field_error(field, "required", "This field is required"))
}

pub fn parse_tour_date(raw: &str) -> Option<bson::DateTime> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(bson::DateTime::from_chrono(at.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|at| bson::DateTime::from_chrono(at.and_utc()))
}

impl CreateBookingRequest {
    /// Validate and convert into lifecycle input.
    pub fn into_new_booking(self) -> Result<NewBooking, ValidationErrors> {
        self.validate()?;

        let tour_date = required(self.tour_date, "tour_date")?;
        let tour_date = parse_tour_date(&tour_date).ok_or_else(|| {
            field_error(
                "tour_date",
                "date",
                "tourDate must be an RFC 3339 timestamp or YYYY-MM-DD",
            )
        })?;
        let guide = required(self.selected_guide, "selected_guide")?;

        Ok(NewBooking {
            package_name: required(self.package_name, "package_name")?,
            tourist_name: required(self.tourist_name, "tourist_name")?,
            tourist_email: required(self.tourist_email, "tourist_email")?,
            tourist_image: self.tourist_image,
            price: required(self.price, "price")?,
            tour_date,
            guide: GuideSnapshot {
                id: guide.id.unwrap_or_default(),
                name: guide.name.unwrap_or_default(),
                photo: guide.photo,
                email: required(guide.email, "guide_email")?,
            },
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentRequest {
    pub amount: Option<Decimal>,
    pub booking_id: Option<String>,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    #[serde(default)]
    pub payment_intent_id: String,
    #[serde(default)]
    pub booking_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TourStatusRequest {
    #[serde(default)]
    pub status: String,
}

/// `{success, message?, data?}` envelope used by most routes.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn data(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponse {
    #[serde(rename = "_id")]
    pub id: Option<String>,
    pub booking_id: String,
    pub package_name: String,
    pub tourist_name: String,
    pub tourist_email: String,
    pub tourist_image: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub tour_date: DateTime<Utc>,
    pub tour_guide: GuideSnapshot,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub booking_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
}

impl From<Booking> for BookingResponse {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id.map(|id| id.to_hex()),
            booking_id: b.booking_id,
            package_name: b.package_name,
            tourist_name: b.tourist_name,
            tourist_email: b.tourist_email,
            tourist_image: b.tourist_image,
            price: b.price,
            tour_date: b.tour_date.to_chrono(),
            tour_guide: b.tour_guide,
            status: b.status,
            payment_status: b.payment_status,
            booking_date: b.booking_date.to_chrono(),
            updated_at: b.updated_at.map(|at| at.to_chrono()),
            cancelled_at: b.cancelled_at.map(|at| at.to_chrono()),
            payment_date: b.payment_date.map(|at| at.to_chrono()),
            payment_transaction_id: b.payment_transaction_id,
            payment_intent_id: b.payment_intent_id,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTransactionResponse {
    #[serde(rename = "_id")]
    pub id: Option<String>,
    pub booking_id: String,
    pub booking_object_id: String,
    pub payment_intent_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
    pub status: crate::models::SettlementStatus,
    pub payment_method: Option<serde_json::Value>,
    pub payment_date: DateTime<Utc>,
    pub transaction_id: String,
    pub stripe_charge_id: Option<String>,
    pub tourist_email: String,
    pub package_name: String,
}

impl From<PaymentTransaction> for PaymentTransactionResponse {
    fn from(p: PaymentTransaction) -> Self {
        Self {
            id: p.id.map(|id| id.to_hex()),
            booking_id: p.booking_id,
            booking_object_id: p.booking_object_id.to_hex(),
            payment_intent_id: p.payment_intent_id,
            amount: p.amount,
            currency: p.currency,
            status: p.status,
            payment_method: p.payment_method,
            payment_date: p.payment_date.to_chrono(),
            transaction_id: p.transaction_id,
            stripe_charge_id: p.stripe_charge_id,
            tourist_email: p.tourist_email,
            package_name: p.package_name,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentResponse {
    pub success: bool,
    pub client_secret: String,
    pub payment_intent_id: String,
}

impl From<PaymentIntentHandle> for PaymentIntentResponse {
    fn from(handle: PaymentIntentHandle) -> Self {
        Self {
            success: true,
            client_secret: handle.client_secret,
            payment_intent_id: handle.payment_intent_id,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentResponse {
    pub success: bool,
    pub message: String,
    pub payment_status: String,
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_update_failed: Option<bool>,
}

impl From<ConfirmationOutcome> for ConfirmPaymentResponse {
    fn from(outcome: ConfirmationOutcome) -> Self {
        match outcome {
            ConfirmationOutcome::Settled(settlement) => Self {
                success: true,
                message: "Payment confirmed and booking updated successfully".to_string(),
                payment_status: settlement.payment_status,
                transaction_id: settlement.transaction.transaction_id,
                payment_transaction_id: settlement.transaction.id.map(|id| id.to_hex()),
                warning: None,
                booking_update_failed: None,
            },
            ConfirmationOutcome::PartialSuccess {
                settlement,
                warning,
            } => Self {
                success: true,
                message: "Payment confirmed successfully".to_string(),
                payment_status: settlement.payment_status,
                transaction_id: settlement.transaction.transaction_id,
                payment_transaction_id: settlement.transaction.id.map(|id| id.to_hex()),
                warning: Some(warning),
                booking_update_failed: Some(true),
            },
        }
    }
}
