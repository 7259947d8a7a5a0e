//! Time-derived identifier generation.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Issues `<prefix><millis>` tokens that are strictly increasing within the process.
///
/// Two calls in the same millisecond get consecutive values instead of a
/// duplicate; uniqueness across processes is enforced by the store's unique index.
#[derive(Debug)]
pub struct IdGenerator {
    prefix: &'static str,
    last: AtomicI64,
}

impl IdGenerator {
    pub const fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            last: AtomicI64::new(0),
        }
    }

    pub fn next_id(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let mut previous = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(previous + 1);
            match self.last.compare_exchange_weak(
                previous,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return format!("{}{}", self.prefix, candidate),
                Err(actual) => previous = actual,
            }
        }
    }
}

pub static BOOKING_IDS: IdGenerator = IdGenerator::new("BK");
pub static TRANSACTION_IDS: IdGenerator = IdGenerator::new("TXN");
