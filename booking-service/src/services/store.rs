//! Storage contracts for bookings and the payment ledger.
//!
//! Both collections are accessed through exact-match filters and single-document
//! writes. There are no cross-collection transactions.

use crate::models::{Booking, BookingStatus, PaymentStatus, PaymentTransaction};
use async_trait::async_trait;
use mongodb::bson::{self, doc, oid::ObjectId, DateTime, Document};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Unsorted,
    /// Most recent first, by `bookingDate` for bookings and `paymentDate` for payments.
    NewestFirst,
}

/// A caller-supplied booking identifier.
///
/// Callers may hold either the store-native ObjectId or the `BK...` business
/// key. Anything shaped like an ObjectId is tried as one first; lookups then fall
/// back to the business key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingKey {
    Object(ObjectId),
    Reference(String),
}

impl BookingKey {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match ObjectId::parse_str(raw) {
            Ok(oid) => Self::Object(oid),
            Err(_) => Self::Reference(raw.to_string()),
        }
    }

    /// Filters to try, in order.
    pub fn candidate_filters(&self) -> Vec<BookingFilter> {
        match self {
            Self::Object(oid) => vec![
                BookingFilter::by_object_id(*oid),
                BookingFilter::by_booking_id(oid.to_hex()),
            ],
            Self::Reference(reference) => vec![BookingFilter::by_booking_id(reference.clone())],
        }
    }
}

/// Exact-match filter over booking documents. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingFilter {
    pub id: Option<ObjectId>,
    pub booking_id: Option<String>,
    pub tourist_email: Option<String>,
    pub guide_email: Option<String>,
    pub statuses: Option<Vec<BookingStatus>>,
}

impl BookingFilter {
    pub fn by_object_id(id: ObjectId) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub fn by_booking_id(booking_id: impl Into<String>) -> Self {
        Self {
            booking_id: Some(booking_id.into()),
            ..Default::default()
        }
    }

    pub fn by_tourist(email: impl Into<String>) -> Self {
        Self {
            tourist_email: Some(email.into()),
            ..Default::default()
        }
    }

    pub fn by_guide(email: impl Into<String>) -> Self {
        Self {
            guide_email: Some(email.into()),
            ..Default::default()
        }
    }

    pub fn with_statuses(mut self, statuses: impl Into<Vec<BookingStatus>>) -> Self {
        self.statuses = Some(statuses.into());
        self
    }

    pub fn to_document(&self) -> Document {
        let mut filter = Document::new();
        if let Some(id) = self.id {
            filter.insert("_id", id);
        }
        if let Some(ref booking_id) = self.booking_id {
            filter.insert("bookingId", booking_id.as_str());
        }
        if let Some(ref email) = self.tourist_email {
            filter.insert("touristEmail", email.as_str());
        }
        if let Some(ref email) = self.guide_email {
            filter.insert("tourGuide.email", email.as_str());
        }
        if let Some(ref statuses) = self.statuses {
            let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
            filter.insert("status", doc! { "$in": names });
        }
        filter
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        self.id.map_or(true, |id| booking.id == Some(id))
            && self
                .booking_id
                .as_ref()
                .map_or(true, |b| &booking.booking_id == b)
            && self
                .tourist_email
                .as_ref()
                .map_or(true, |e| &booking.tourist_email == e)
            && self
                .guide_email
                .as_ref()
                .map_or(true, |e| &booking.tour_guide.email == e)
            && self
                .statuses
                .as_ref()
                .map_or(true, |s| s.contains(&booking.status))
    }
}

/// Fields a lifecycle transition may set. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingPatch {
    pub status: Option<BookingStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub updated_at: Option<DateTime>,
    pub cancelled_at: Option<DateTime>,
    pub payment_date: Option<DateTime>,
    pub payment_transaction_id: Option<String>,
    pub payment_intent_id: Option<String>,
}

impl BookingPatch {
    /// The `$set` update document for this patch.
    pub fn to_update(&self) -> Result<Document, StoreError> {
        let mut set = Document::new();
        if let Some(status) = self.status {
            set.insert("status", status.as_str());
        }
        if let Some(payment_status) = self.payment_status {
            let value = bson::to_bson(&payment_status)
                .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
            set.insert("paymentStatus", value);
        }
        if let Some(at) = self.updated_at {
            set.insert("updatedAt", at);
        }
        if let Some(at) = self.cancelled_at {
            set.insert("cancelledAt", at);
        }
        if let Some(at) = self.payment_date {
            set.insert("paymentDate", at);
        }
        if let Some(ref id) = self.payment_transaction_id {
            set.insert("paymentTransactionId", id.as_str());
        }
        if let Some(ref id) = self.payment_intent_id {
            set.insert("paymentIntentId", id.as_str());
        }
        Ok(doc! { "$set": set })
    }

    pub fn apply(&self, booking: &mut Booking) {
        if let Some(status) = self.status {
            booking.status = status;
        }
        if let Some(payment_status) = self.payment_status {
            booking.payment_status = payment_status;
        }
        if self.updated_at.is_some() {
            booking.updated_at = self.updated_at;
        }
        if self.cancelled_at.is_some() {
            booking.cancelled_at = self.cancelled_at;
        }
        if self.payment_date.is_some() {
            booking.payment_date = self.payment_date;
        }
        if self.payment_transaction_id.is_some() {
            booking.payment_transaction_id = self.payment_transaction_id.clone();
        }
        if self.payment_intent_id.is_some() {
            booking.payment_intent_id = self.payment_intent_id.clone();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerFilter {
    pub booking_id: Option<String>,
    pub payment_intent_id: Option<String>,
}

impl LedgerFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_booking_id(booking_id: impl Into<String>) -> Self {
        Self {
            booking_id: Some(booking_id.into()),
            ..Default::default()
        }
    }

    pub fn by_payment_intent(payment_intent_id: impl Into<String>) -> Self {
        Self {
            payment_intent_id: Some(payment_intent_id.into()),
            ..Default::default()
        }
    }

    pub fn to_document(&self) -> Document {
        let mut filter = Document::new();
        if let Some(ref booking_id) = self.booking_id {
            filter.insert("bookingId", booking_id.as_str());
        }
        if let Some(ref intent) = self.payment_intent_id {
            filter.insert("paymentIntentId", intent.as_str());
        }
        filter
    }

    pub fn matches(&self, entry: &PaymentTransaction) -> bool {
        self.booking_id
            .as_ref()
            .map_or(true, |b| &entry.booking_id == b)
            && self
                .payment_intent_id
                .as_ref()
                .map_or(true, |p| &entry.payment_intent_id == p)
    }
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Insert a new booking and return its store-assigned id.
    async fn insert(&self, booking: &Booking) -> Result<ObjectId, StoreError>;

    async fn find_one(&self, filter: &BookingFilter) -> Result<Option<Booking>, StoreError>;

    async fn find(
        &self,
        filter: &BookingFilter,
        order: SortOrder,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Apply `patch` to the first matching booking and return the matched count.
    async fn update_one(
        &self,
        filter: &BookingFilter,
        patch: &BookingPatch,
    ) -> Result<u64, StoreError>;

    /// Delete the first matching booking and return the deleted count.
    async fn delete_one(&self, filter: &BookingFilter) -> Result<u64, StoreError>;
}

/// Append-only record of settled payments. Rows are never updated.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    async fn append(&self, entry: &PaymentTransaction) -> Result<ObjectId, StoreError>;

    async fn find(
        &self,
        filter: &LedgerFilter,
        order: SortOrder,
    ) -> Result<Vec<PaymentTransaction>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_shaped_keys_try_native_id_first() {
        let oid = ObjectId::new();
        let key = BookingKey::parse(&oid.to_hex());
        assert_eq!(key, BookingKey::Object(oid));

        let filters = key.candidate_filters();
        assert_eq!(filters[0], BookingFilter::by_object_id(oid));
        assert_eq!(filters[1], BookingFilter::by_booking_id(oid.to_hex()));
    }

    #[test]
    fn business_keys_resolve_by_booking_id_only() {
        let key = BookingKey::parse(" BK1718000000000 ");
        assert_eq!(key, BookingKey::Reference("BK1718000000000".to_string()));
        assert_eq!(
            key.candidate_filters(),
            vec![BookingFilter::by_booking_id("BK1718000000000")]
        );
    }

    #[test]
    fn filter_document_uses_stored_field_names() {
        let filter = BookingFilter::by_guide("guide@example.com")
            .with_statuses([BookingStatus::Pending, BookingStatus::Accepted]);
        let document = filter.to_document();

        assert_eq!(
            document.get_str("tourGuide.email").unwrap(),
            "guide@example.com"
        );
        let statuses = document
            .get_document("status")
            .unwrap()
            .get_array("$in")
            .unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[1].as_str(), Some("accepted"));
    }

    #[test]
    fn patch_only_sets_present_fields() {
        let patch = BookingPatch {
            status: Some(BookingStatus::InReview),
            payment_status: Some(PaymentStatus::Paid),
            payment_intent_id: Some("pi_123".to_string()),
            ..Default::default()
        };
        let update = patch.to_update().unwrap();
        let set = update.get_document("$set").unwrap();

        assert_eq!(set.get_str("status").unwrap(), "in review");
        assert_eq!(set.get_str("paymentStatus").unwrap(), "paid");
        assert_eq!(set.get_str("paymentIntentId").unwrap(), "pi_123");
        assert!(!set.contains_key("cancelledAt"));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn empty_ledger_filter_matches_everything() {
        assert!(LedgerFilter::all().to_document().is_empty());
        assert_eq!(
            LedgerFilter::by_payment_intent("pi_1")
                .to_document()
                .get_str("paymentIntentId")
                .unwrap(),
            "pi_1"
        );
    }
}
