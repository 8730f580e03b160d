//! Metric instrument factories.
//!
//! Instruments come from the globally registered `MeterProvider` under the
//! `"clickwork-engine"` meter. Without an OTLP endpoint they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("clickwork-engine")
}

/// Counter: review sessions started and stopped.
/// Labels: `transition` ("started" | "stopped" | "cap_reached").
pub fn review_sessions() -> Counter<u64> {
    meter()
        .u64_counter("clickwork.review.sessions")
        .with_description("Review session lifecycle transitions")
        .build()
}

/// Counter: verdicts recorded by QC reviewers.
/// Labels: `verdict` ("good" | "bad").
pub fn review_decisions() -> Counter<u64> {
    meter()
        .u64_counter("clickwork.review.decisions")
        .with_description("QC verdicts recorded")
        .build()
}

/// Counter: review items locked by their time box.
pub fn review_lockouts() -> Counter<u64> {
    meter()
        .u64_counter("clickwork.review.lockouts")
        .with_description("Review items that ran out of time")
        .build()
}

/// Counter: link review lifecycle.
/// Labels: `outcome` ("started" | "completed" | "expired" | "reloaded").
pub fn link_reviews() -> Counter<u64> {
    meter()
        .u64_counter("clickwork.task.link_reviews")
        .with_description("Link review transitions")
        .build()
}

/// Counter: accepted submissions.
/// Labels: `phase` ("subtask" | "clicker" | "final").
pub fn submissions() -> Counter<u64> {
    meter()
        .u64_counter("clickwork.task.submissions")
        .with_description("Evidence-gated submissions accepted")
        .build()
}

/// Counter: gate evaluations.
/// Labels: `status` ("open" | "self_attendance" | "team_verification" | "performance").
pub fn gate_evaluations() -> Counter<u64> {
    meter()
        .u64_counter("clickwork.gate.evaluations")
        .with_description("Workflow gate recomputations")
        .build()
}

/// Counter: ledger writes that reached storage.
/// Labels: `ledger`.
pub fn ledger_writes() -> Counter<u64> {
    meter()
        .u64_counter("clickwork.ledger.writes")
        .with_description("Ledger records written")
        .build()
}

/// Histogram: request handling time in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("clickwork.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
