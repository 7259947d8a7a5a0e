pub mod booking;
pub mod payment;

pub use booking::{Booking, BookingStatus, GuideSnapshot, PaymentStatus};
pub use payment::{PaymentTransaction, SettlementStatus};
