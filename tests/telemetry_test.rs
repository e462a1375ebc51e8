//! Integration tests for telemetry initialization and span helpers.

use renderq::fingerprint::Fingerprint;
use renderq::model::JobId;
use renderq::telemetry::job::{record_state_transition, start_job_span};
use renderq::config::Config;
use renderq::telemetry::{SERVICE_NAME, TelemetryConfig, init_telemetry};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process; a second
    // init returns Err instead of panicking, which is acceptable here.
    let config = TelemetryConfig {
        endpoint: None,
        service_name: "renderq-test".to_string(),
        log_level: "debug".to_string(),
    };
    let _guard = init_telemetry(config);
}

#[test]
fn job_span_creates_and_records_transition() {
    let span = start_job_span(&JobId::new(), &Fingerprint::derive(b"solid span"));
    record_state_transition(&span, "queued", "processing");
    record_state_transition(&span, "processing", "completed");
}

#[test]
fn telemetry_config_follows_service_config() {
    let config = Config {
        otel_endpoint: Some("http://localhost:4317".to_string()),
        log_level: "renderq=trace".to_string(),
        ..Config::default()
    };
    let telemetry = TelemetryConfig::from_config(&config);
    assert_eq!(telemetry.service_name, SERVICE_NAME);
    assert_eq!(telemetry.endpoint.as_deref(), Some("http://localhost:4317"));
    assert_eq!(telemetry.log_level, "renderq=trace");
}
