use crate::models::{Booking, PaymentTransaction};
use crate::services::store::{
    BookingFilter, BookingPatch, BookingStore, LedgerFilter, PaymentLedger, SortOrder, StoreError,
};
use anyhow::anyhow;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{
    bson::{doc, oid::ObjectId, Bson, Document},
    Collection, Database, IndexModel,
};

const DUPLICATE_KEY: i32 = 11000;

fn store_error(err: mongodb::error::Error) -> StoreError {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY =>
        {
            StoreError::Duplicate(write_error.message.clone())
        }
        _ => StoreError::Backend(anyhow::Error::new(err)),
    }
}

fn inserted_object_id(id: Bson) -> Result<ObjectId, StoreError> {
    id.as_object_id()
        .ok_or_else(|| StoreError::Backend(anyhow!("Unexpected inserted id: {}", id)))
}

fn sort_options(order: SortOrder, field: &str) -> Option<FindOptions> {
    match order {
        SortOrder::Unsorted => None,
        SortOrder::NewestFirst => {
            let mut sort = Document::new();
            sort.insert(field, -1);
            Some(FindOptions::builder().sort(sort).build())
        }
    }
}

#[derive(Clone)]
pub struct MongoBookingStore {
    collection: Collection<Booking>,
}

impl MongoBookingStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("bookings"),
        }
    }

    /// Initialize booking indexes.
    pub async fn init_indexes(&self) -> anyhow::Result<()> {
        // The business key is the stable external reference, so it must be unique
        let booking_id_index = IndexModel::builder()
            .keys(doc! { "bookingId": 1 })
            .options(
                IndexOptions::builder()
                    .name("booking_id_unique_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        // Tourist dashboard: bookings by email, newest first
        let tourist_index = IndexModel::builder()
            .keys(doc! { "touristEmail": 1, "bookingDate": -1 })
            .options(
                IndexOptions::builder()
                    .name("tourist_booking_date_idx".to_string())
                    .build(),
            )
            .build();

        let guide_index = IndexModel::builder()
            .keys(doc! { "tourGuide.email": 1 })
            .options(
                IndexOptions::builder()
                    .name("guide_email_idx".to_string())
                    .build(),
            )
            .build();

        self.collection
            .create_indexes([booking_id_index, tourist_index, guide_index], None)
            .await?;

        tracing::info!("Booking indexes initialized");
        Ok(())
    }
}

#[async_trait]
impl BookingStore for MongoBookingStore {
    async fn insert(&self, booking: &Booking) -> Result<ObjectId, StoreError> {
        let result = self
            .collection
            .insert_one(booking, None)
            .await
            .map_err(store_error)?;
        inserted_object_id(result.inserted_id)
    }

    async fn find_one(&self, filter: &BookingFilter) -> Result<Option<Booking>, StoreError> {
        self.collection
            .find_one(filter.to_document(), None)
            .await
            .map_err(store_error)
    }

    async fn find(
        &self,
        filter: &BookingFilter,
        order: SortOrder,
    ) -> Result<Vec<Booking>, StoreError> {
        let cursor = self
            .collection
            .find(filter.to_document(), sort_options(order, "bookingDate"))
            .await
            .map_err(store_error)?;

        cursor.try_collect().await.map_err(store_error)
    }

    async fn update_one(
        &self,
        filter: &BookingFilter,
        patch: &BookingPatch,
    ) -> Result<u64, StoreError> {
        let result = self
            .collection
            .update_one(filter.to_document(), patch.to_update()?, None)
            .await
            .map_err(store_error)?;
        Ok(result.matched_count)
    }

    async fn delete_one(&self, filter: &BookingFilter) -> Result<u64, StoreError> {
        let result = self
            .collection
            .delete_one(filter.to_document(), None)
            .await
            .map_err(store_error)?;
        Ok(result.deleted_count)
    }
}

#[derive(Clone)]
pub struct MongoPaymentLedger {
    collection: Collection<PaymentTransaction>,
    unique_intents: bool,
}

impl MongoPaymentLedger {
    pub fn new(db: &Database, unique_intents: bool) -> Self {
        Self {
            collection: db.collection("payments"),
            unique_intents,
        }
    }

    /// Initialize ledger indexes.
    ///
    /// The `paymentIntentId` index is unique only when configured; an existing
    /// ledger that already holds duplicates must be cleaned up before enabling it.
    pub async fn init_indexes(&self) -> anyhow::Result<()> {
        let history_index = IndexModel::builder()
            .keys(doc! { "bookingId": 1, "paymentDate": -1 })
            .options(
                IndexOptions::builder()
                    .name("booking_payment_date_idx".to_string())
                    .build(),
            )
            .build();

        let intent_index_name = if self.unique_intents {
            "payment_intent_unique_idx"
        } else {
            "payment_intent_idx"
        };
        let intent_index = IndexModel::builder()
            .keys(doc! { "paymentIntentId": 1 })
            .options(
                IndexOptions::builder()
                    .name(intent_index_name.to_string())
                    .unique(self.unique_intents)
                    .build(),
            )
            .build();

        self.collection
            .create_indexes([history_index, intent_index], None)
            .await?;

        tracing::info!(
            unique_payment_intents = self.unique_intents,
            "Payment ledger indexes initialized"
        );
        Ok(())
    }
}

#[async_trait]
impl PaymentLedger for MongoPaymentLedger {
    async fn append(&self, entry: &PaymentTransaction) -> Result<ObjectId, StoreError> {
        let result = self
            .collection
            .insert_one(entry, None)
            .await
            .map_err(store_error)?;
        inserted_object_id(result.inserted_id)
    }

    async fn find(
        &self,
        filter: &LedgerFilter,
        order: SortOrder,
    ) -> Result<Vec<PaymentTransaction>, StoreError> {
        let cursor = self
            .collection
            .find(filter.to_document(), sort_options(order, "paymentDate"))
            .await
            .map_err(store_error)?;

        cursor.try_collect().await.map_err(store_error)
    }
}
