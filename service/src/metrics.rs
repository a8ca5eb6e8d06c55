//! Metrics for registration flows.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `registration_admissions_total{outcome}` - Admission attempts by outcome
//!   (confirmed, reserved, waitlisted, conflict, not_found, error)
//! - `registration_rollbacks_total{reason}` - Compensating rollbacks by cause
//! - `registration_webhooks_total{event,outcome}` - Provider notifications by
//!   kind and how they were applied
//! - `registration_provider_failures_total{operation}` - Failed provider calls

use metrics::describe_counter;
use registration_core::ErrorKind;

/// Register all metric descriptions.
///
/// Call once at startup, before any metrics are recorded.
pub fn register_metrics() {
    describe_counter!(
        "registration_admissions_total",
        "Registration admission attempts by outcome"
    );
    describe_counter!(
        "registration_rollbacks_total",
        "Compensating rollbacks of paid reservations by reason"
    );
    describe_counter!(
        "registration_webhooks_total",
        "Payment provider notifications by event and outcome"
    );
    describe_counter!(
        "registration_provider_failures_total",
        "Failed payment provider calls by operation"
    );

    tracing::info!("Registration metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a successful admission.
pub fn record_admission(outcome: &'static str) {
    metrics::counter!("registration_admissions_total", "outcome" => outcome).increment(1);
    tracing::debug!(outcome, "Recorded admission metric");
}

/// Record a rejected or failed admission.
pub fn record_admission_failure(kind: ErrorKind) {
    let outcome = match kind {
        ErrorKind::Conflict => "conflict",
        ErrorKind::NotFound => "not_found",
        ErrorKind::Forbidden => "forbidden",
        ErrorKind::Internal => "error",
    };
    record_admission(outcome);
}

/// Record a compensating rollback.
pub fn record_rollback(reason: &'static str) {
    metrics::counter!("registration_rollbacks_total", "reason" => reason).increment(1);
    tracing::debug!(reason, "Recorded rollback metric");
}

/// Record a processed webhook.
pub fn record_webhook(event: &'static str, outcome: &'static str) {
    metrics::counter!("registration_webhooks_total", "event" => event, "outcome" => outcome)
        .increment(1);
    tracing::debug!(event, outcome, "Recorded webhook metric");
}

/// Record a failed provider call.
pub fn record_provider_failure(operation: &'static str) {
    metrics::counter!("registration_provider_failures_total", "operation" => operation)
        .increment(1);
    tracing::debug!(operation, "Recorded provider failure metric");
}
