use mongodb::bson::{oid::ObjectId, DateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Only settled payments are ever written to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Succeeded,
}

/// One row of the append-only payment ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTransaction {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub booking_id: String,
    pub booking_object_id: ObjectId,
    pub payment_intent_id: String,
    /// Major currency units, converted back from the processor's minor units.
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
    pub status: SettlementStatus,
    /// Processor's payment-method details, kept as-is.
    #[serde(default)]
    pub payment_method: Option<serde_json::Value>,
    pub payment_date: DateTime,
    pub transaction_id: String,
    #[serde(default)]
    pub stripe_charge_id: Option<String>,
    pub tourist_email: String,
    pub package_name: String,
}
