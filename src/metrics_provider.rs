use std::sync::atomic::AtomicU64;
use std::sync::LazyLock;

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry,
};
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, Registry as PrometheusRegistry,
    TextEncoder,
};
use tracing::error;

use crate::server::Error;

pub static IN_FLIGHT_REQUESTS: AtomicU64 = AtomicU64::new(0);

/// `(stage, result)` label pairs reported by the gate.
pub const GATE_DECISION_LABELS: [[&str; 2]; 5] = [
    ["validation", "accepted"],
    ["validation", "rejected"],
    ["validation", "malformed"],
    ["authorization", "allow"],
    ["authorization", "deny"],
];

pub static METRICS_PROVIDER: LazyLock<MetricsProvider> =
    LazyLock::new(|| MetricsProvider::new().expect("Unable to create metrics provider"));

pub struct MetricsProvider {
    registry: PrometheusRegistry,
    pub metric_http_request_total: IntCounter,
    pub metric_http_request_duration: Histogram,
    pub metric_http_request_in_flight: IntGauge,
    pub metric_gate_decisions: IntCounterVec,
}

impl MetricsProvider {
    pub fn new() -> Result<Self, Error> {
        let registry = PrometheusRegistry::new();

        let metric_http_request_total = register_int_counter_with_registry!(
            "http_requests_total",
            "Total number of HTTP requests made.",
            &registry
        )
        .map_err(|error| {
            error!("Unable to create http_requests_total metric: {error}");
            Error::Initialization(String::from("Unable to create http_requests_total metric"))
        })?;

        let metric_http_request_duration = register_histogram_with_registry!(
            "http_request_duration_ms",
            "The HTTP request latencies in milliseconds.",
            &registry
        )
        .map_err(|error| {
            error!("Unable to create http_request_duration metric: {error}");
            Error::Initialization(String::from(
                "Unable to create http_request_duration metric",
            ))
        })?;

        let metric_http_request_in_flight = register_int_gauge_with_registry!(
            "http_requests_in_flight",
            "The current number of in-flight HTTP requests.",
            &registry
        )
        .map_err(|error| {
            error!("Unable to create http_requests_in_flight metric: {error}");
            Error::Initialization(String::from(
                "Unable to create http_requests_in_flight metric",
            ))
        })?;

        let metric_gate_decisions = register_int_counter_vec_with_registry!(
            "gate_decisions_total",
            "Total number of authentication gate decisions",
            &["stage", "result"],
            &registry
        )
        .map_err(|error| {
            error!("Unable to create gate_decisions_total metric: {error}");
            Error::Initialization(String::from("Unable to create gate_decisions_total metric"))
        })?;
        // Exported at zero until the first decision.
        for labels in &GATE_DECISION_LABELS {
            metric_gate_decisions.with_label_values(labels);
        }

        Ok(Self {
            registry,
            metric_http_request_total,
            metric_http_request_duration,
            metric_http_request_in_flight,
            metric_gate_decisions,
        })
    }

    pub fn gather(&self) -> Result<(String, Vec<u8>), Error> {
        let mut buffer = vec![];
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|error| Error::Internal(format!("Unable to encode metrics: {error}")))?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}
