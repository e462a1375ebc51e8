//! Metric instrument factories for renderq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"renderq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for renderq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter(super::SERVICE_NAME)
}

/// Counter: content submissions.
/// Labels: `result` ("cached" | "accepted" | "error").
pub fn submissions() -> Counter<u64> {
    meter()
        .u64_counter("renderq.submissions")
        .with_description("Number of content submissions")
        .build()
}

/// Counter: jobs finished by the worker.
/// Labels: `outcome` ("completed" | "failed").
pub fn jobs_finished() -> Counter<u64> {
    meter()
        .u64_counter("renderq.jobs.finished")
        .with_description("Number of jobs the worker finished")
        .build()
}

/// Counter: notification attempts.
/// Labels: `delivery` ("delivered" | "dropped" | "closed").
pub fn notifications() -> Counter<u64> {
    meter()
        .u64_counter("renderq.notifications")
        .with_description("Number of notification attempts")
        .build()
}

/// Counter: dedup cache flushes that failed to reach disk.
pub fn cache_flush_failures() -> Counter<u64> {
    meter()
        .u64_counter("renderq.cache.flush_failures")
        .with_description("Dedup cache flushes that failed")
        .build()
}

/// Histogram: render duration in milliseconds.
/// Labels: `outcome`.
pub fn render_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("renderq.render.duration_ms")
        .with_description("Render duration in milliseconds")
        .with_unit("ms")
        .build()
}
