//! In-process store implementations for local runs and tests.

use crate::models::{Booking, PaymentTransaction};
use crate::services::store::{
    BookingFilter, BookingPatch, BookingStore, LedgerFilter, PaymentLedger, SortOrder, StoreError,
};
use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryBookingStore {
    bookings: RwLock<Vec<Booking>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn insert(&self, booking: &Booking) -> Result<ObjectId, StoreError> {
        let mut bookings = self.bookings.write().await;
        if bookings.iter().any(|b| b.booking_id == booking.booking_id) {
            return Err(StoreError::Duplicate(format!(
                "bookingId {}",
                booking.booking_id
            )));
        }

        let id = ObjectId::new();
        let mut stored = booking.clone();
        stored.id = Some(id);
        bookings.push(stored);
        Ok(id)
    }

    async fn find_one(&self, filter: &BookingFilter) -> Result<Option<Booking>, StoreError> {
        let bookings = self.bookings.read().await;
        Ok(bookings.iter().find(|b| filter.matches(b)).cloned())
    }

    async fn find(
        &self,
        filter: &BookingFilter,
        order: SortOrder,
    ) -> Result<Vec<Booking>, StoreError> {
        let bookings = self.bookings.read().await;
        let mut found: Vec<Booking> = bookings.iter().filter(|b| filter.matches(b)).cloned().collect();
        if order == SortOrder::NewestFirst {
            found.sort_by(|a, b| b.booking_date.cmp(&a.booking_date));
        }
        Ok(found)
    }

    async fn update_one(
        &self,
        filter: &BookingFilter,
        patch: &BookingPatch,
    ) -> Result<u64, StoreError> {
        let mut bookings = self.bookings.write().await;
        match bookings.iter_mut().find(|b| filter.matches(b)) {
            Some(booking) => {
                patch.apply(booking);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_one(&self, filter: &BookingFilter) -> Result<u64, StoreError> {
        let mut bookings = self.bookings.write().await;
        match bookings.iter().position(|b| filter.matches(b)) {
            Some(index) => {
                bookings.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

/// Ledger kept in memory. With `unique_intents`, a second row for the same
/// payment intent is rejected the way a unique index would reject it.
#[derive(Default)]
pub struct InMemoryPaymentLedger {
    entries: RwLock<Vec<PaymentTransaction>>,
    unique_intents: bool,
}

impl InMemoryPaymentLedger {
    pub fn new(unique_intents: bool) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            unique_intents,
        }
    }
}

#[async_trait]
impl PaymentLedger for InMemoryPaymentLedger {
    async fn append(&self, entry: &PaymentTransaction) -> Result<ObjectId, StoreError> {
        let mut entries = self.entries.write().await;
        if self.unique_intents
            && entries
                .iter()
                .any(|e| e.payment_intent_id == entry.payment_intent_id)
        {
            return Err(StoreError::Duplicate(format!(
                "paymentIntentId {}",
                entry.payment_intent_id
            )));
        }

        let id = ObjectId::new();
        let mut stored = entry.clone();
        stored.id = Some(id);
        entries.push(stored);
        Ok(id)
    }

    async fn find(
        &self,
        filter: &LedgerFilter,
        order: SortOrder,
    ) -> Result<Vec<PaymentTransaction>, StoreError> {
        let entries = self.entries.read().await;
        let mut found: Vec<PaymentTransaction> =
            entries.iter().filter(|e| filter.matches(e)).cloned().collect();
        if order == SortOrder::NewestFirst {
            found.sort_by(|a, b| b.payment_date.cmp(&a.payment_date));
        }
        Ok(found)
    }
}
