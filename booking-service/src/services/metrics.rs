use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// Only the first call installs anything; later calls (several test apps in one
/// process) reuse the existing handle.
pub fn init_metrics() -> anyhow::Result<()> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) if METRICS_HANDLE.get().is_some() => {
            tracing::debug!(error = %e, "Metrics recorder already installed");
        }
        Err(e) => {
            tracing::warn!(error = %e, "Metrics recorder not installed; /metrics will be empty");
        }
    }

    Ok(())
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_booking_created() {
    metrics::counter!("bookings_created_total").increment(1);
}

pub fn record_intent_created(currency: &str) {
    metrics::counter!("payment_intents_created_total", "currency" => currency.to_string())
        .increment(1);
}

/// `outcome` is one of `settled`, `partial`, `not_completed`, `duplicate`.
pub fn record_confirmation(outcome: &'static str) {
    metrics::counter!("payment_confirmations_total", "outcome" => outcome).increment(1);
}

/// Settled amount in the processor's minor units.
pub fn record_settled_amount(currency: &str, amount_minor: i64) {
    if let Ok(amount) = u64::try_from(amount_minor) {
        metrics::counter!(
            "payment_settled_amount_minor_total",
            "currency" => currency.to_string()
        )
        .increment(amount);
    }
}
