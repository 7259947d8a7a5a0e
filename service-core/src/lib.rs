//! service-core: shared HTTP infrastructure for the booking platform services.
pub mod error;
pub mod middleware;
pub mod observability;
