//! Booking lifecycle and payment settlement.
//!
//! Every operation is a short sequence of awaited store and gateway calls made
//! on the request's own task. Nothing is retried and the two collections are
//! written independently, so a settlement can be recorded in the ledger while
//! the booking itself is left behind. That case is reported as
//! [`ConfirmationOutcome::PartialSuccess`] instead of being hidden.

use crate::models::{
    Booking, BookingStatus, GuideSnapshot, PaymentStatus, PaymentTransaction, SettlementStatus,
};
use crate::services::gateway::{
    from_minor_units, ExpandableCharge, GatewayError, IntentMetadata, PaymentGateway,
    ProcessorError, RetrievedIntent,
};
use crate::services::metrics;
use crate::services::store::{
    BookingFilter, BookingKey, BookingPatch, BookingStore, LedgerFilter, PaymentLedger, SortOrder,
    StoreError,
};
use crate::utils::{BOOKING_IDS, TRANSACTION_IDS};
use mongodb::bson::DateTime;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::borrow::Cow;
use std::sync::Arc;
use thiserror::Error;
use validator::{ValidationError, ValidationErrors};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Payment not completed (status: {status})")]
    PaymentNotCompleted { status: String },

    #[error("Payment intent {0} has already been recorded")]
    AlreadySettled(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Validation(errors) => AppError::ValidationError(errors),
            LifecycleError::InvalidRequest(message) => {
                AppError::BadRequest(anyhow::anyhow!(message))
            }
            LifecycleError::NotFound(message) => AppError::NotFound(anyhow::anyhow!(message)),
            err @ LifecycleError::PaymentNotCompleted { .. } => {
                AppError::BadRequest(anyhow::Error::new(err))
            }
            err @ LifecycleError::AlreadySettled(_) => AppError::Conflict(anyhow::Error::new(err)),
            LifecycleError::Gateway(
                err @ (GatewayError::InvalidAmount(_)
                | GatewayError::AmountOutOfRange(_)
                | GatewayError::Processor(ProcessorError::InvalidId(_))),
            ) => AppError::BadRequest(anyhow::Error::new(err)),
            LifecycleError::Gateway(err) => AppError::InternalError(anyhow::Error::new(err)),
            LifecycleError::Store(err) => AppError::DatabaseError(anyhow::Error::new(err)),
        }
    }
}

fn invalid_field(field: &'static str, code: &'static str, message: &'static str) -> LifecycleError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    let mut errors = ValidationErrors::new();
    errors.add(field, error);
    LifecycleError::Validation(errors)
}

/// Validated input for a new booking.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub package_name: String,
    pub tourist_name: String,
    pub tourist_email: String,
    pub tourist_image: Option<String>,
    pub price: Decimal,
    pub tour_date: DateTime,
    pub guide: GuideSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntentHandle {
    pub client_secret: String,
    pub payment_intent_id: String,
}

/// A ledger row written by a confirmation, plus the processor status it was based on.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub transaction: PaymentTransaction,
    pub payment_status: String,
}

#[derive(Debug, Clone)]
pub enum ConfirmationOutcome {
    /// Ledger written and booking moved to `in review`.
    Settled(Settlement),
    /// Ledger written but the booking was not advanced.
    PartialSuccess {
        settlement: Settlement,
        warning: String,
    },
}

impl ConfirmationOutcome {
    pub fn settlement(&self) -> &Settlement {
        match self {
            Self::Settled(settlement) => settlement,
            Self::PartialSuccess { settlement, .. } => settlement,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Self::PartialSuccess { .. })
    }
}

#[derive(Clone)]
pub struct BookingLifecycle {
    bookings: Arc<dyn BookingStore>,
    ledger: Arc<dyn PaymentLedger>,
    gateway: PaymentGateway,
    default_currency: String,
}

impl BookingLifecycle {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        ledger: Arc<dyn PaymentLedger>,
        gateway: PaymentGateway,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            bookings,
            ledger,
            gateway,
            default_currency: default_currency.into().to_ascii_lowercase(),
        }
    }

    /// Create a `pending`, `unpaid` booking with a fresh `BK...` business key.
    #[tracing::instrument(skip(self, input), fields(tourist_email = %input.tourist_email))]
    pub async fn create(&self, input: NewBooking) -> Result<Booking, LifecycleError> {
        for (field, value) in [
            ("package_name", &input.package_name),
            ("tourist_name", &input.tourist_name),
            ("tourist_email", &input.tourist_email),
            ("guide_email", &input.guide.email),
        ] {
            if value.trim().is_empty() {
                return Err(invalid_field(field, "required", "This field is required"));
            }
        }
        if input.price <= Decimal::ZERO {
            return Err(invalid_field(
                "price",
                "positive",
                "Price must be greater than zero",
            ));
        }

        let mut booking = Booking {
            id: None,
            booking_id: BOOKING_IDS.next_id(),
            package_name: input.package_name,
            tourist_name: input.tourist_name,
            tourist_email: input.tourist_email,
            tourist_image: input.tourist_image,
            price: input.price,
            tour_date: input.tour_date,
            tour_guide: input.guide,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            booking_date: DateTime::now(),
            updated_at: None,
            cancelled_at: None,
            payment_date: None,
            payment_transaction_id: None,
            payment_intent_id: None,
        };

        booking.id = Some(self.bookings.insert(&booking).await?);
        metrics::record_booking_created();

        tracing::info!(
            booking_id = %booking.booking_id,
            price = %booking.price,
            guide_email = %booking.tour_guide.email,
            "Booking created"
        );
        Ok(booking)
    }

    /// Create a processor-side payment intent for a `pending` booking.
    ///
    /// The booking itself is not modified.
    #[tracing::instrument(skip(self))]
    pub async fn request_payment_intent(
        &self,
        booking_ref: &str,
        amount: Decimal,
        currency: Option<&str>,
    ) -> Result<PaymentIntentHandle, LifecycleError> {
        if booking_ref.trim().is_empty() {
            return Err(LifecycleError::InvalidRequest(
                "Amount and booking ID are required".to_string(),
            ));
        }
        if amount <= Decimal::ZERO {
            return Err(LifecycleError::InvalidRequest(
                "Amount must be greater than zero".to_string(),
            ));
        }

        let booking = self
            .resolve(booking_ref, Some(&[BookingStatus::Pending]))
            .await?
            .ok_or_else(|| {
                LifecycleError::NotFound("Booking not found or not eligible for payment".to_string())
            })?;

        if amount != booking.price {
            tracing::warn!(
                booking_id = %booking.booking_id,
                requested = %amount,
                price = %booking.price,
                "Requested amount differs from booking price"
            );
        }

        let currency = currency
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(self.default_currency.as_str())
            .to_ascii_lowercase();

        let metadata = IntentMetadata {
            booking_id: booking.booking_id.clone(),
            tourist_email: booking.tourist_email.clone(),
            package_name: booking.package_name.clone(),
        };

        let intent = self
            .gateway
            .create_intent(amount, &currency, &metadata)
            .await?;
        let client_secret = intent
            .client_secret
            .ok_or_else(|| GatewayError::MissingClientSecret(intent.id.clone()))?;

        metrics::record_intent_created(&currency);
        tracing::info!(
            booking_id = %booking.booking_id,
            payment_intent_id = %intent.id,
            "Payment intent created"
        );

        Ok(PaymentIntentHandle {
            client_secret,
            payment_intent_id: intent.id,
        })
    }

    /// Record a settled payment and advance the booking to `in review`.
    ///
    /// Settlement is re-read from the processor on every call; nothing the
    /// client says about the payment is trusted.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_payment(
        &self,
        payment_intent_id: &str,
        booking_ref: &str,
    ) -> Result<ConfirmationOutcome, LifecycleError> {
        let payment_intent_id = payment_intent_id.trim();
        if payment_intent_id.is_empty() || booking_ref.trim().is_empty() {
            return Err(LifecycleError::InvalidRequest(
                "Payment Intent ID and Booking ID are required".to_string(),
            ));
        }

        let intent = self.gateway.retrieve_intent(payment_intent_id).await?;
        if !intent.is_succeeded() {
            metrics::record_confirmation("not_completed");
            tracing::info!(status = %intent.status, "Payment not completed");
            return Err(LifecycleError::PaymentNotCompleted {
                status: intent.status,
            });
        }

        let booking = self
            .resolve(booking_ref, None)
            .await?
            .ok_or_else(|| LifecycleError::NotFound("Booking not found".to_string()))?;
        match intent.booking_id() {
            Some(intended) if intended != booking.booking_id => {
                metrics::record_confirmation("booking_mismatch");
                tracing::warn!(
                    booking_id = %booking.booking_id,
                    intent_booking_id = %intended,
                    "Payment intent was created for a different booking"
                );
                return Err(LifecycleError::InvalidRequest(format!(
                    "Payment intent {} does not belong to booking {}",
                    intent.id, booking.booking_id
                )));
            }
            Some(_) => {}
            None => tracing::warn!(
                booking_id = %booking.booking_id,
                "Payment intent carries no booking metadata"
            ),
        }

        let booking_object_id = booking.id.ok_or_else(|| {
            StoreError::Backend(anyhow::anyhow!(
                "Booking {} has no store id",
                booking.booking_id
            ))
        })?;

        let (payment_method, stripe_charge_id) = self.payment_method_of(&intent).await;

        let now = DateTime::now();
        let mut transaction = PaymentTransaction {
            id: None,
            booking_id: booking.booking_id.clone(),
            booking_object_id,
            payment_intent_id: intent.id.clone(),
            amount: from_minor_units(intent.amount, &intent.currency),
            currency: intent.currency.clone(),
            status: SettlementStatus::Succeeded,
            payment_method,
            payment_date: now,
            transaction_id: TRANSACTION_IDS.next_id(),
            stripe_charge_id,
            tourist_email: booking.tourist_email.clone(),
            package_name: booking.package_name.clone(),
        };

        match self.ledger.append(&transaction).await {
            Ok(id) => transaction.id = Some(id),
            Err(StoreError::Duplicate(_)) => {
                metrics::record_confirmation("duplicate");
                tracing::warn!("Payment intent already recorded in ledger");
                return Err(LifecycleError::AlreadySettled(intent.id));
            }
            Err(e) => return Err(e.into()),
        }
        metrics::record_settled_amount(&intent.currency, intent.amount);

        let settlement = Settlement {
            payment_status: intent.status.clone(),
            transaction,
        };

        let patch = BookingPatch {
            status: Some(BookingStatus::InReview),
            payment_status: Some(PaymentStatus::Paid),
            updated_at: Some(now),
            payment_date: Some(now),
            payment_transaction_id: Some(settlement.transaction.transaction_id.clone()),
            payment_intent_id: Some(intent.id.clone()),
            ..Default::default()
        };
        let filter = BookingFilter::by_object_id(booking_object_id)
            .with_statuses(BookingStatus::sources_of(BookingStatus::InReview));

        let warning = match self.bookings.update_one(&filter, &patch).await {
            Ok(0) => "Payment succeeded but booking status update failed".to_string(),
            Ok(_) => {
                metrics::record_confirmation("settled");
                tracing::info!(
                    booking_id = %booking.booking_id,
                    transaction_id = %settlement.transaction.transaction_id,
                    amount = %settlement.transaction.amount,
                    "Payment settled"
                );
                return Ok(ConfirmationOutcome::Settled(settlement));
            }
            Err(e) => {
                tracing::error!(error = %e, "Booking update failed after ledger write");
                format!("Payment succeeded but booking status update failed: {}", e)
            }
        };

        metrics::record_confirmation("partial");
        tracing::warn!(
            booking_id = %booking.booking_id,
            current_status = %booking.status,
            transaction_id = %settlement.transaction.transaction_id,
            "Payment recorded but booking was not advanced"
        );
        Ok(ConfirmationOutcome::PartialSuccess {
            settlement,
            warning,
        })
    }

    /// Payment-method snapshot and charge id, from whatever the processor exposes.
    async fn payment_method_of(
        &self,
        intent: &RetrievedIntent,
    ) -> (Option<serde_json::Value>, Option<String>) {
        if let Some(charge) = intent.settled_charge() {
            return (charge.payment_method_details.clone(), Some(charge.id.clone()));
        }

        let charge_id = match intent.latest_charge {
            Some(ExpandableCharge::Id(ref id)) => Some(id.clone()),
            _ => None,
        };

        let Some(ref method_id) = intent.payment_method else {
            return (None, charge_id);
        };

        match self.gateway.retrieve_payment_method(method_id).await {
            Ok(method) => (Some(method.to_value()), charge_id),
            Err(e) => {
                tracing::warn!(
                    payment_method = %method_id,
                    error = %e,
                    "Could not retrieve payment method"
                );
                (None, charge_id)
            }
        }
    }

    /// Cancel a booking that is still `pending`.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, booking_ref: &str) -> Result<(), LifecycleError> {
        let now = DateTime::now();
        let patch = BookingPatch {
            status: Some(BookingStatus::Cancelled),
            cancelled_at: Some(now),
            ..Default::default()
        };

        if self.transition(booking_ref, BookingStatus::Cancelled, &patch).await? {
            tracing::info!("Booking cancelled");
            Ok(())
        } else {
            Err(LifecycleError::NotFound(
                "Booking not found or cannot be cancelled".to_string(),
            ))
        }
    }

    /// Guide decision on a `pending` booking: `accepted` or `rejected`.
    #[tracing::instrument(skip(self))]
    pub async fn review_tour(
        &self,
        booking_ref: &str,
        decision: &str,
    ) -> Result<BookingStatus, LifecycleError> {
        let next = match decision.trim().to_ascii_lowercase().as_str() {
            "accepted" => BookingStatus::Accepted,
            "rejected" => BookingStatus::Rejected,
            _ => {
                return Err(LifecycleError::InvalidRequest(
                    "Invalid status. Must be \"accepted\" or \"rejected\"".to_string(),
                ))
            }
        };

        let patch = BookingPatch {
            status: Some(next),
            updated_at: Some(DateTime::now()),
            ..Default::default()
        };

        if self.transition(booking_ref, next, &patch).await? {
            tracing::info!(status = %next, "Tour reviewed");
            Ok(next)
        } else {
            Err(LifecycleError::NotFound(
                "Booking not found or no longer pending".to_string(),
            ))
        }
    }

    pub async fn bookings_for_tourist(&self, email: &str) -> Result<Vec<Booking>, LifecycleError> {
        Ok(self
            .bookings
            .find(&BookingFilter::by_tourist(email.trim()), SortOrder::NewestFirst)
            .await?)
    }

    pub async fn tours_for_guide(&self, email: &str) -> Result<Vec<Booking>, LifecycleError> {
        Ok(self
            .bookings
            .find(&BookingFilter::by_guide(email.trim()), SortOrder::Unsorted)
            .await?)
    }

    /// Ledger rows for a booking, newest first.
    ///
    /// Rows are keyed by the business key; a store id is translated when the
    /// booking still exists.
    pub async fn payment_history(
        &self,
        booking_ref: &str,
    ) -> Result<Vec<PaymentTransaction>, LifecycleError> {
        let booking_id = match self.resolve(booking_ref, None).await? {
            Some(booking) => booking.booking_id,
            None => booking_ref.trim().to_string(),
        };

        Ok(self
            .ledger
            .find(&LedgerFilter::by_booking_id(booking_id), SortOrder::NewestFirst)
            .await?)
    }

    pub async fn all_payments(&self) -> Result<Vec<PaymentTransaction>, LifecycleError> {
        Ok(self
            .ledger
            .find(&LedgerFilter::all(), SortOrder::Unsorted)
            .await?)
    }

    /// Administrative delete. Ledger rows for the booking are kept.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, booking_ref: &str) -> Result<(), LifecycleError> {
        for filter in BookingKey::parse(booking_ref).candidate_filters() {
            if self.bookings.delete_one(&filter).await? > 0 {
                tracing::info!("Booking deleted");
                return Ok(());
            }
        }
        Err(LifecycleError::NotFound("Booking not found".to_string()))
    }

    /// Find a booking by store id or business key, optionally restricted to `statuses`.
    async fn resolve(
        &self,
        booking_ref: &str,
        statuses: Option<&[BookingStatus]>,
    ) -> Result<Option<Booking>, LifecycleError> {
        for filter in BookingKey::parse(booking_ref).candidate_filters() {
            let filter = match statuses {
                Some(statuses) => filter.with_statuses(statuses.to_vec()),
                None => filter,
            };
            if let Some(booking) = self.bookings.find_one(&filter).await? {
                return Ok(Some(booking));
            }
        }
        Ok(None)
    }

    /// Apply `patch` to the booking if it is in a state that may move to `next`.
    async fn transition(
        &self,
        booking_ref: &str,
        next: BookingStatus,
        patch: &BookingPatch,
    ) -> Result<bool, LifecycleError> {
        let sources = BookingStatus::sources_of(next);
        for filter in BookingKey::parse(booking_ref).candidate_filters() {
            let filter = filter.with_statuses(sources.clone());
            if self.bookings.update_one(&filter, patch).await? > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::{
        Charge, ChargeList, CreatedIntent, PaymentMethodSnapshot, PaymentProcessor,
        ProcessorError,
    };
    use crate::services::memory::{InMemoryBookingStore, InMemoryPaymentLedger};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct FakeProcessor {
        status: Mutex<String>,
        amount: i64,
        charge: Option<Charge>,
        payment_method: Option<String>,
        method_lookup: Option<PaymentMethodSnapshot>,
        created: Mutex<Vec<(i64, String, BTreeMap<String, String>)>>,
    }

    impl FakeProcessor {
        fn succeeded(amount: i64) -> Self {
            Self {
                status: Mutex::new("succeeded".to_string()),
                amount,
                charge: Some(Charge {
                    id: "ch_1".to_string(),
                    payment_method_details: Some(serde_json::json!({
                        "type": "card",
                        "card": { "brand": "visa", "last4": "4242" }
                    })),
                }),
                payment_method: Some("pm_1".to_string()),
                method_lookup: None,
                created: Mutex::new(Vec::new()),
            }
        }

        fn set_status(&self, status: &str) {
            *self.status.lock().unwrap() = status.to_string();
        }

        fn created_count(&self) -> usize {
            self.created.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PaymentProcessor for FakeProcessor {
        async fn create_payment_intent(
            &self,
            amount_minor: i64,
            currency: &str,
            metadata: &BTreeMap<String, String>,
        ) -> Result<CreatedIntent, ProcessorError> {
            let mut created = self.created.lock().unwrap();
            created.push((amount_minor, currency.to_string(), metadata.clone()));
            Ok(CreatedIntent {
                id: format!("pi_{}", created.len()),
                client_secret: Some(format!("pi_{}_secret", created.len())),
                status: "requires_payment_method".to_string(),
            })
        }

        async fn retrieve_payment_intent(
            &self,
            id: &str,
        ) -> Result<RetrievedIntent, ProcessorError> {
            // intents created through this fake echo their metadata back
            let metadata = self
                .created
                .lock()
                .unwrap()
                .iter()
                .enumerate()
                .find(|(i, _)| format!("pi_{}", i + 1) == id)
                .map(|(_, (_, _, metadata))| metadata.clone())
                .unwrap_or_default();
            Ok(RetrievedIntent {
                id: id.to_string(),
                object: Some("payment_intent".to_string()),
                status: self.status.lock().unwrap().clone(),
                amount: self.amount,
                currency: "usd".to_string(),
                charges: self.charge.clone().map(|c| ChargeList { data: vec![c] }),
                latest_charge: None,
                payment_method: self.payment_method.clone(),
                metadata,
            })
        }

        async fn retrieve_payment_method(
            &self,
            _id: &str,
        ) -> Result<PaymentMethodSnapshot, ProcessorError> {
            self.method_lookup.clone().ok_or(ProcessorError::Api {
                status: 404,
                code: "resource_missing".to_string(),
                message: "No such payment_method".to_string(),
            })
        }
    }

    struct Harness {
        lifecycle: BookingLifecycle,
        bookings: Arc<InMemoryBookingStore>,
        ledger: Arc<InMemoryPaymentLedger>,
        processor: Arc<FakeProcessor>,
    }

    fn harness_with(processor: FakeProcessor, unique_intents: bool) -> Harness {
        let bookings = Arc::new(InMemoryBookingStore::new());
        let ledger = Arc::new(InMemoryPaymentLedger::new(unique_intents));
        let processor = Arc::new(processor);
        let lifecycle = BookingLifecycle::new(
            bookings.clone(),
            ledger.clone(),
            PaymentGateway::new(processor.clone()),
            "USD",
        );
        Harness {
            lifecycle,
            bookings,
            ledger,
            processor,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeProcessor::succeeded(25000), false)
    }

    fn new_booking() -> NewBooking {
        NewBooking {
            package_name: "Sundarbans Safari".to_string(),
            tourist_name: "Rahim".to_string(),
            tourist_email: "rahim@example.com".to_string(),
            tourist_image: None,
            price: Decimal::new(25000, 2),
            tour_date: DateTime::from_millis(1_767_225_600_000),
            guide: GuideSnapshot {
                id: "guide-1".to_string(),
                name: "Karim".to_string(),
                photo: Some("https://img.example.com/karim.png".to_string()),
                email: "karim@example.com".to_string(),
            },
        }
    }

    async fn stored(h: &Harness, booking_id: &str) -> Booking {
        h.bookings
            .find_one(&BookingFilter::by_booking_id(booking_id))
            .await
            .unwrap()
            .unwrap()
    }

    async fn ledger_rows(h: &Harness) -> Vec<PaymentTransaction> {
        h.ledger
            .find(&LedgerFilter::all(), SortOrder::Unsorted)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_starts_pending_and_unpaid_with_unique_business_key() {
        let h = harness();
        let first = h.lifecycle.create(new_booking()).await.unwrap();
        let second = h.lifecycle.create(new_booking()).await.unwrap();

        assert!(first.id.is_some());
        assert_eq!(first.status, BookingStatus::Pending);
        assert_eq!(first.payment_status, PaymentStatus::Unpaid);
        assert!(first.booking_id.starts_with("BK"));
        assert_ne!(first.booking_id, second.booking_id);
        assert_eq!(stored(&h, &second.booking_id).await.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn create_rejects_blank_fields_and_non_positive_price() {
        let h = harness();

        let mut blank = new_booking();
        blank.tourist_name = "  ".to_string();
        assert!(matches!(
            h.lifecycle.create(blank).await,
            Err(LifecycleError::Validation(_))
        ));

        let mut free = new_booking();
        free.price = Decimal::ZERO;
        let err = h.lifecycle.create(free).await.unwrap_err();
        match err {
            LifecycleError::Validation(errors) => {
                assert!(errors.field_errors().contains_key("price"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn intent_is_requested_in_minor_units_with_booking_metadata() {
        let h = harness();
        let booking = h.lifecycle.create(new_booking()).await.unwrap();

        let handle = h
            .lifecycle
            .request_payment_intent(&booking.booking_id, Decimal::new(25000, 2), None)
            .await
            .unwrap();
        assert_eq!(handle.payment_intent_id, "pi_1");
        assert_eq!(handle.client_secret, "pi_1_secret");

        let created = h.processor.created.lock().unwrap();
        let (amount_minor, currency, metadata) = &created[0];
        assert_eq!(*amount_minor, 25000);
        assert_eq!(currency, "usd");
        assert_eq!(metadata["bookingId"], booking.booking_id);
        assert_eq!(metadata["touristEmail"], "rahim@example.com");
        assert_eq!(metadata["packageName"], "Sundarbans Safari");
    }

    #[tokio::test]
    async fn intent_accepts_store_id_and_leaves_booking_untouched() {
        let h = harness();
        let booking = h.lifecycle.create(new_booking()).await.unwrap();
        let object_id = booking.id.unwrap().to_hex();

        h.lifecycle
            .request_payment_intent(&object_id, Decimal::new(1999, 2), Some("EUR"))
            .await
            .unwrap();

        assert_eq!(h.processor.created.lock().unwrap()[0].1, "eur");
        let after = stored(&h, &booking.booking_id).await;
        assert_eq!(after.status, BookingStatus::Pending);
        assert_eq!(after.payment_status, PaymentStatus::Unpaid);
        assert!(after.payment_intent_id.is_none());
    }

    #[tokio::test]
    async fn intent_for_non_pending_booking_never_reaches_processor() {
        let h = harness();
        let booking = h.lifecycle.create(new_booking()).await.unwrap();
        h.lifecycle.cancel(&booking.booking_id).await.unwrap();

        let err = h
            .lifecycle
            .request_payment_intent(&booking.booking_id, Decimal::new(25000, 2), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));

        let err = h
            .lifecycle
            .request_payment_intent("BK404", Decimal::new(25000, 2), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));
        assert_eq!(h.processor.created_count(), 0);
    }

    #[tokio::test]
    async fn confirmation_settles_pending_booking() {
        let h = harness();
        let booking = h.lifecycle.create(new_booking()).await.unwrap();

        let outcome = h
            .lifecycle
            .confirm_payment("pi_1", &booking.booking_id)
            .await
            .unwrap();
        assert!(!outcome.is_partial());

        let after = stored(&h, &booking.booking_id).await;
        assert_eq!(after.status, BookingStatus::InReview);
        assert_eq!(after.payment_status, PaymentStatus::Paid);
        assert_eq!(after.payment_intent_id.as_deref(), Some("pi_1"));
        assert_eq!(
            after.payment_transaction_id.as_deref(),
            Some(outcome.settlement().transaction.transaction_id.as_str())
        );
        assert!(after.payment_date.is_some());

        let rows = ledger_rows(&h).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, Decimal::new(25000, 2));
        assert_eq!(rows[0].status, SettlementStatus::Succeeded);
        assert_eq!(rows[0].booking_id, booking.booking_id);
        assert_eq!(rows[0].booking_object_id, booking.id.unwrap());
        assert_eq!(rows[0].stripe_charge_id.as_deref(), Some("ch_1"));
        assert_eq!(rows[0].payment_method.as_ref().unwrap()["card"]["last4"], "4242");
        assert!(rows[0].transaction_id.starts_with("TXN"));
    }

    #[tokio::test]
    async fn confirmation_settles_accepted_booking_by_store_id() {
        let h = harness();
        let booking = h.lifecycle.create(new_booking()).await.unwrap();
        h.lifecycle
            .review_tour(&booking.booking_id, "Accepted")
            .await
            .unwrap();

        let outcome = h
            .lifecycle
            .confirm_payment("pi_1", &booking.id.unwrap().to_hex())
            .await
            .unwrap();

        assert!(!outcome.is_partial());
        assert_eq!(
            stored(&h, &booking.booking_id).await.status,
            BookingStatus::InReview
        );
        // ledger is keyed by the business key even when the store id was supplied
        assert_eq!(ledger_rows(&h).await[0].booking_id, booking.booking_id);
    }

    #[tokio::test]
    async fn intent_cannot_settle_a_different_booking() {
        let h = harness();
        let paid_for = h.lifecycle.create(new_booking()).await.unwrap();
        let other = h.lifecycle.create(new_booking()).await.unwrap();
        let handle = h
            .lifecycle
            .request_payment_intent(&paid_for.booking_id, Decimal::new(25000, 2), None)
            .await
            .unwrap();

        let err = h
            .lifecycle
            .confirm_payment(&handle.payment_intent_id, &other.booking_id)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidRequest(_)));
        assert_eq!(
            AppError::from(err).status_code(),
            axum::http::StatusCode::BAD_REQUEST
        );
        assert_eq!(stored(&h, &other.booking_id).await.status, BookingStatus::Pending);
        assert!(ledger_rows(&h).await.is_empty());

        h.lifecycle
            .confirm_payment(&handle.payment_intent_id, &paid_for.booking_id)
            .await
            .unwrap();
        assert_eq!(
            stored(&h, &paid_for.booking_id).await.status,
            BookingStatus::InReview
        );
    }

    #[tokio::test]
    async fn unsettled_intent_leaves_booking_and_ledger_untouched() {
        let h = harness();
        h.processor.set_status("processing");
        let booking = h.lifecycle.create(new_booking()).await.unwrap();

        let err = h
            .lifecycle
            .confirm_payment("pi_1", &booking.booking_id)
            .await
            .unwrap_err();
        match err {
            LifecycleError::PaymentNotCompleted { status } => assert_eq!(status, "processing"),
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(stored(&h, &booking.booking_id).await.status, BookingStatus::Pending);
        assert!(ledger_rows(&h).await.is_empty());

        // status is re-read on the next attempt
        h.processor.set_status("succeeded");
        h.lifecycle
            .confirm_payment("pi_1", &booking.booking_id)
            .await
            .unwrap();
        assert_eq!(
            stored(&h, &booking.booking_id).await.status,
            BookingStatus::InReview
        );
    }

    #[tokio::test]
    async fn unknown_booking_is_not_found_and_writes_nothing() {
        let h = harness();
        let err = h
            .lifecycle
            .confirm_payment("pi_1", "BK0000000000000")
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::NotFound(_)));
        assert!(ledger_rows(&h).await.is_empty());
    }

    #[tokio::test]
    async fn repeated_confirmation_appends_a_second_row_by_default() {
        let h = harness();
        let booking = h.lifecycle.create(new_booking()).await.unwrap();

        let first = h
            .lifecycle
            .confirm_payment("pi_1", &booking.booking_id)
            .await
            .unwrap();
        let second = h
            .lifecycle
            .confirm_payment("pi_1", &booking.booking_id)
            .await
            .unwrap();

        assert!(!first.is_partial());
        // booking is already `in review`, so the second call cannot advance it
        assert!(second.is_partial());
        assert_eq!(ledger_rows(&h).await.len(), 2);
    }

    #[tokio::test]
    async fn unique_ledger_rejects_repeated_confirmation() {
        let h = harness_with(FakeProcessor::succeeded(25000), true);
        let booking = h.lifecycle.create(new_booking()).await.unwrap();

        h.lifecycle
            .confirm_payment("pi_1", &booking.booking_id)
            .await
            .unwrap();
        let err = h
            .lifecycle
            .confirm_payment("pi_1", &booking.booking_id)
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::AlreadySettled(ref id) if id == "pi_1"));
        assert_eq!(ledger_rows(&h).await.len(), 1);
    }

    #[tokio::test]
    async fn payment_for_cancelled_booking_is_recorded_as_partial_success() {
        let h = harness();
        let booking = h.lifecycle.create(new_booking()).await.unwrap();
        h.lifecycle.cancel(&booking.booking_id).await.unwrap();

        let outcome = h
            .lifecycle
            .confirm_payment("pi_1", &booking.booking_id)
            .await
            .unwrap();

        match outcome {
            ConfirmationOutcome::PartialSuccess { ref warning, .. } => {
                assert!(warning.contains("booking status update failed"))
            }
            other => panic!("expected partial success, got {other:?}"),
        }
        assert_eq!(ledger_rows(&h).await.len(), 1);
        let after = stored(&h, &booking.booking_id).await;
        assert_eq!(after.status, BookingStatus::Cancelled);
        assert_eq!(after.payment_status, PaymentStatus::Unpaid);
    }

    #[tokio::test]
    async fn payment_method_falls_back_to_separate_lookup() {
        let mut processor = FakeProcessor::succeeded(25000);
        processor.charge = None;
        processor.method_lookup = Some(PaymentMethodSnapshot {
            method_type: "card".to_string(),
            card: Some(serde_json::json!({ "brand": "mastercard" })),
        });
        let h = harness_with(processor, false);
        let booking = h.lifecycle.create(new_booking()).await.unwrap();

        h.lifecycle
            .confirm_payment("pi_1", &booking.booking_id)
            .await
            .unwrap();

        let row = &ledger_rows(&h).await[0];
        assert_eq!(row.payment_method.as_ref().unwrap()["type"], "card");
        assert_eq!(
            row.payment_method.as_ref().unwrap()["card"]["brand"],
            "mastercard"
        );
        assert!(row.stripe_charge_id.is_none());
    }

    #[tokio::test]
    async fn failed_payment_method_lookup_is_tolerated() {
        let mut processor = FakeProcessor::succeeded(25000);
        processor.charge = None;
        let h = harness_with(processor, false);
        let booking = h.lifecycle.create(new_booking()).await.unwrap();

        let outcome = h
            .lifecycle
            .confirm_payment("pi_1", &booking.booking_id)
            .await
            .unwrap();

        assert!(!outcome.is_partial());
        assert!(ledger_rows(&h).await[0].payment_method.is_none());
    }

    #[tokio::test]
    async fn cancel_only_applies_to_pending_bookings() {
        let h = harness();
        let booking = h.lifecycle.create(new_booking()).await.unwrap();

        h.lifecycle
            .cancel(&booking.id.unwrap().to_hex())
            .await
            .unwrap();
        let after = stored(&h, &booking.booking_id).await;
        assert_eq!(after.status, BookingStatus::Cancelled);
        assert!(after.cancelled_at.is_some());

        assert!(matches!(
            h.lifecycle.cancel(&booking.booking_id).await,
            Err(LifecycleError::NotFound(_))
        ));

        let accepted = h.lifecycle.create(new_booking()).await.unwrap();
        h.lifecycle
            .review_tour(&accepted.booking_id, "accepted")
            .await
            .unwrap();
        assert!(matches!(
            h.lifecycle.cancel(&accepted.booking_id).await,
            Err(LifecycleError::NotFound(_))
        ));
        assert_eq!(
            stored(&h, &accepted.booking_id).await.status,
            BookingStatus::Accepted
        );
    }

    #[tokio::test]
    async fn review_accepts_only_known_decisions_from_pending() {
        let h = harness();
        let booking = h.lifecycle.create(new_booking()).await.unwrap();

        assert!(matches!(
            h.lifecycle.review_tour(&booking.booking_id, "maybe").await,
            Err(LifecycleError::InvalidRequest(_))
        ));

        let status = h
            .lifecycle
            .review_tour(&booking.booking_id, "REJECTED")
            .await
            .unwrap();
        assert_eq!(status, BookingStatus::Rejected);
        let after = stored(&h, &booking.booking_id).await;
        assert_eq!(after.status, BookingStatus::Rejected);
        assert!(after.updated_at.is_some());

        assert!(matches!(
            h.lifecycle.review_tour(&booking.booking_id, "accepted").await,
            Err(LifecycleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn listings_filter_by_tourist_and_guide() {
        let h = harness();
        let first = h.lifecycle.create(new_booking()).await.unwrap();
        let mut other = new_booking();
        other.tourist_email = "someone@example.com".to_string();
        other.guide.email = "other-guide@example.com".to_string();
        h.lifecycle.create(other).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let latest = h.lifecycle.create(new_booking()).await.unwrap();

        let mine = h
            .lifecycle
            .bookings_for_tourist("rahim@example.com")
            .await
            .unwrap();
        let ids: Vec<_> = mine.iter().map(|b| b.booking_id.clone()).collect();
        assert_eq!(ids, vec![latest.booking_id, first.booking_id]);

        let tours = h
            .lifecycle
            .tours_for_guide("other-guide@example.com")
            .await
            .unwrap();
        assert_eq!(tours.len(), 1);
        assert_eq!(tours[0].tourist_email, "someone@example.com");
    }

    #[tokio::test]
    async fn history_resolves_store_id_to_business_key() {
        let h = harness();
        let booking = h.lifecycle.create(new_booking()).await.unwrap();
        h.lifecycle
            .confirm_payment("pi_1", &booking.booking_id)
            .await
            .unwrap();
        h.lifecycle
            .confirm_payment("pi_2", &booking.booking_id)
            .await
            .unwrap();

        let by_key = h.lifecycle.payment_history(&booking.booking_id).await.unwrap();
        let by_id = h
            .lifecycle
            .payment_history(&booking.id.unwrap().to_hex())
            .await
            .unwrap();
        assert_eq!(by_key.len(), 2);
        assert_eq!(by_id.len(), 2);
        assert!(by_key[0].payment_date >= by_key[1].payment_date);

        assert!(h.lifecycle.payment_history("BK404").await.unwrap().is_empty());
        assert_eq!(h.lifecycle.all_payments().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_booking_but_keeps_ledger_history() {
        let h = harness();
        let booking = h.lifecycle.create(new_booking()).await.unwrap();
        h.lifecycle
            .confirm_payment("pi_1", &booking.booking_id)
            .await
            .unwrap();

        h.lifecycle.delete(&booking.booking_id).await.unwrap();
        assert!(matches!(
            h.lifecycle.delete(&booking.booking_id).await,
            Err(LifecycleError::NotFound(_))
        ));
        assert_eq!(
            h.lifecycle
                .payment_history(&booking.booking_id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn errors_map_to_http_statuses() {
        use axum::http::StatusCode;

        let cases = [
            (invalid_field("price", "positive", "bad"), StatusCode::UNPROCESSABLE_ENTITY),
            (LifecycleError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (LifecycleError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                LifecycleError::PaymentNotCompleted {
                    status: "processing".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (LifecycleError::AlreadySettled("pi_1".into()), StatusCode::CONFLICT),
            (
                LifecycleError::Gateway(GatewayError::Processor(ProcessorError::NotConfigured)),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                LifecycleError::Gateway(GatewayError::Processor(ProcessorError::InvalidId(
                    "../charges/ch_1".into(),
                ))),
                StatusCode::BAD_REQUEST,
            ),
            (
                LifecycleError::Gateway(GatewayError::Processor(
                    ProcessorError::UnexpectedObject {
                        expected: "payment_intent",
                        found: "charge".into(),
                        id: "ch_1".into(),
                    },
                )),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                LifecycleError::Store(StoreError::Backend(anyhow::anyhow!("down"))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status_code(), expected);
        }
    }
}
