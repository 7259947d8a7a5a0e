//! Payment gateway adapter.
//!
//! [`PaymentProcessor`] is the raw external contract, expressed in minor currency
//! units. [`PaymentGateway`] sits in front of it: it validates amounts, converts
//! between major and minor units and turns processor failures into
//! [`GatewayError`]. Nothing here retries.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Status the processor reports once funds are captured.
pub const SUCCEEDED: &str = "succeeded";

/// `object` tag of a payment intent.
pub const PAYMENT_INTENT_OBJECT: &str = "payment_intent";

/// Metadata key carrying the booking's business key.
pub const BOOKING_ID_METADATA_KEY: &str = "bookingId";

/// Currencies the processor treats as having no minor unit.
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "bif", "clp", "djf", "gnf", "jpy", "kmf", "krw", "mga", "pyg", "rwf", "ugx", "vnd", "vuv",
    "xaf", "xof", "xpf",
];

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Payment processor credentials not configured")]
    NotConfigured,

    #[error("Payment processor rejected the request ({status}): {code} - {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Malformed payment processor id: {0:?}")]
    InvalidId(String),

    #[error("Invalid payment processor base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Payment processor returned {found} {id} where a {expected} was expected")]
    UnexpectedObject {
        expected: &'static str,
        found: String,
        id: String,
    },

    #[error("Payment processor unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected payment processor response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Amount must be greater than zero, got {0}")]
    InvalidAmount(Decimal),

    #[error("Amount {0} cannot be represented in minor units")]
    AmountOutOfRange(Decimal),

    #[error("Payment intent {0} was created without a client secret")]
    MissingClientSecret(String),

    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

/// Metadata attached to an intent so it can be traced back to the booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentMetadata {
    pub booking_id: String,
    pub tourist_email: String,
    pub package_name: String,
}

impl IntentMetadata {
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (BOOKING_ID_METADATA_KEY.to_string(), self.booking_id.clone()),
            ("touristEmail".to_string(), self.tourist_email.clone()),
            ("packageName".to_string(), self.package_name.clone()),
        ])
    }
}

/// A freshly created payment intent.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charge {
    pub id: String,
    #[serde(default)]
    pub payment_method_details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChargeList {
    #[serde(default)]
    pub data: Vec<Charge>,
}

/// `latest_charge` is an id unless it was expanded.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExpandableCharge {
    Object(Charge),
    Id(String),
}

/// A payment intent as re-read from the processor.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievedIntent {
    pub id: String,
    #[serde(default)]
    pub object: Option<String>,
    pub status: String,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub charges: Option<ChargeList>,
    #[serde(default)]
    pub latest_charge: Option<ExpandableCharge>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RetrievedIntent {
    pub fn is_succeeded(&self) -> bool {
        self.status == SUCCEEDED
    }

    /// Booking the intent was created for, when it was created by this service.
    pub fn booking_id(&self) -> Option<&str> {
        self.metadata
            .get(BOOKING_ID_METADATA_KEY)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    /// The charge carrying payment-method details, if the processor included one.
    pub fn settled_charge(&self) -> Option<&Charge> {
        self.charges
            .as_ref()
            .and_then(|list| list.data.first())
            .or(match self.latest_charge {
                Some(ExpandableCharge::Object(ref charge)) => Some(charge),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentMethodSnapshot {
    #[serde(rename = "type")]
    pub method_type: String,
    #[serde(default)]
    pub card: Option<serde_json::Value>,
}

impl PaymentMethodSnapshot {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.method_type,
            "card": self.card,
        })
    }
}

/// External payment processor API.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<CreatedIntent, ProcessorError>;

    async fn retrieve_payment_intent(&self, id: &str) -> Result<RetrievedIntent, ProcessorError>;

    async fn retrieve_payment_method(
        &self,
        id: &str,
    ) -> Result<PaymentMethodSnapshot, ProcessorError>;
}

fn minor_unit_exponent(currency: &str) -> u32 {
    if ZERO_DECIMAL_CURRENCIES.contains(&currency.to_ascii_lowercase().as_str()) {
        0
    } else {
        2
    }
}

/// Convert a major-unit amount to the processor's integer minor units.
///
/// Rounds half away from zero, so 19.995 usd becomes 2000 cents rather than
/// being truncated to 1999.
pub fn to_minor_units(amount: Decimal, currency: &str) -> Option<i64> {
    let scale = Decimal::from(10_i64.pow(minor_unit_exponent(currency)));
    amount
        .checked_mul(scale)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Convert processor minor units back to major units.
pub fn from_minor_units(amount_minor: i64, currency: &str) -> Decimal {
    Decimal::new(amount_minor, minor_unit_exponent(currency))
}

#[derive(Clone)]
pub struct PaymentGateway {
    processor: Arc<dyn PaymentProcessor>,
}

impl PaymentGateway {
    pub fn new(processor: Arc<dyn PaymentProcessor>) -> Self {
        Self { processor }
    }

    /// Create an intent for `amount` major units of `currency`.
    pub async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
        metadata: &IntentMetadata,
    ) -> Result<CreatedIntent, GatewayError> {
        if amount <= Decimal::ZERO {
            return Err(GatewayError::InvalidAmount(amount));
        }
        let amount_minor =
            to_minor_units(amount, currency).ok_or(GatewayError::AmountOutOfRange(amount))?;
        if amount_minor <= 0 {
            return Err(GatewayError::InvalidAmount(amount));
        }

        tracing::debug!(
            amount = %amount,
            amount_minor,
            currency = %currency,
            "Creating payment intent"
        );

        let currency = currency.to_ascii_lowercase();
        Ok(self
            .processor
            .create_payment_intent(amount_minor, &currency, &metadata.to_map())
            .await?)
    }

    pub async fn retrieve_intent(&self, id: &str) -> Result<RetrievedIntent, GatewayError> {
        Ok(self.processor.retrieve_payment_intent(id).await?)
    }

    pub async fn retrieve_payment_method(
        &self,
        id: &str,
    ) -> Result<PaymentMethodSnapshot, GatewayError> {
        Ok(self.processor.retrieve_payment_method(id).await?)
    }
}
