//! Lightweight metrics helpers for fpgate.
//!
//! Thin wrappers over the `metrics` crate macros. No exporter is embedded; the
//! embedding application may install any compatible recorder.
//!
//! Provided metrics:
//! * `fpgate_requests_total` (counter, labels: provenance, status)
//! * `fpgate_fallbacks_total` (counter, label: reason)
//! * `fpgate_backend_request_duration_seconds` (histogram, label: backend)
//! * `fpgate_legacy_process_up` (gauge)
use std::time::Instant;

use metrics::{Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::Lazy;

use crate::core::Provenance;

pub const FPGATE_REQUESTS_TOTAL: &str = "fpgate_requests_total";
pub const FPGATE_FALLBACKS_TOTAL: &str = "fpgate_fallbacks_total";
pub const FPGATE_BACKEND_REQUEST_DURATION_SECONDS: &str = "fpgate_backend_request_duration_seconds";
pub const FPGATE_LEGACY_PROCESS_UP: &str = "fpgate_legacy_process_up";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        FPGATE_REQUESTS_TOTAL,
        Unit::Count,
        "Routed requests by the backend that produced the final response."
    );
    describe_counter!(
        FPGATE_FALLBACKS_TOTAL,
        Unit::Count,
        "Requests handed to the legacy backend, by trigger."
    );
    describe_histogram!(
        FPGATE_BACKEND_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of a single archive or legacy backend attempt."
    );
    describe_gauge!(
        FPGATE_LEGACY_PROCESS_UP,
        "1 while the supervised legacy process is running, 0 otherwise."
    );
});

/// Count a completed routing decision.
pub fn increment_request_total(provenance: Provenance, status: u16) {
    counter!(
        FPGATE_REQUESTS_TOTAL,
        "provenance" => provenance.as_str(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Count a fallback and why it happened (`status` or `unreachable`).
pub fn increment_fallback_total(reason: &'static str) {
    counter!(FPGATE_FALLBACKS_TOTAL, "reason" => reason).increment(1);
}

pub fn set_legacy_process_up(up: bool) {
    gauge!(FPGATE_LEGACY_PROCESS_UP).set(if up { 1.0 } else { 0.0 });
}

/// RAII helper measuring one backend attempt.
pub struct BackendRequestTimer {
    start: Instant,
    backend: Provenance,
}

impl BackendRequestTimer {
    pub fn new(backend: Provenance) -> Self {
        Self {
            start: Instant::now(),
            backend,
        }
    }
}

impl Drop for BackendRequestTimer {
    fn drop(&mut self) {
        histogram!(
            FPGATE_BACKEND_REQUEST_DURATION_SECONDS,
            "backend" => self.backend.as_str()
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}

/// Register metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    Lazy::force(&DESCRIPTIONS);
    tracing::debug!("fpgate metric descriptions registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_recording_without_recorder_is_a_noop() {
        increment_request_total(Provenance::Legacy, 200);
        increment_fallback_total("status");
        set_legacy_process_up(true);
        drop(BackendRequestTimer::new(Provenance::Primary));
    }
}
