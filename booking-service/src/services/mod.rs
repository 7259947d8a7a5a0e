pub mod gateway;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod repository;
pub mod store;
pub mod stripe;

pub use gateway::{PaymentGateway, PaymentProcessor};
pub use lifecycle::{
    BookingLifecycle, ConfirmationOutcome, LifecycleError, NewBooking, PaymentIntentHandle,
    Settlement,
};
pub use memory::{InMemoryBookingStore, InMemoryPaymentLedger};
pub use metrics::{get_metrics, init_metrics};
pub use repository::{MongoBookingStore, MongoPaymentLedger};
pub use store::{BookingStore, PaymentLedger};
pub use stripe::StripeClient;
