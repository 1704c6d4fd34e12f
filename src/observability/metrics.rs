//! OTLP metrics for the bridge.
//!
//! Key metrics:
//! - sluice_accepted_total: Counter for connections taken from the listener
//! - sluice_delivered_total: Counter for connections handed downstream
//! - sluice_credit_issued_total: Counter for accept credits sent to the driver
//! - sluice_pending_connections: Gauge for the handoff buffer (0 or 1)

use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Bridge metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Connections delivered by the socket driver.
    pub accepted_total: Counter<u64>,
    /// Connections handed to the subscriber.
    pub delivered_total: Counter<u64>,
    /// Accept credits issued to the socket driver.
    pub credit_issued_total: Counter<u64>,
    /// Connections accepted but not yet handed off.
    pub pending_connections: Gauge<u64>,
}

impl Metrics {
    /// Create a new metrics registry from a meter.
    fn new(meter: &Meter) -> Self {
        Self {
            accepted_total: meter
                .u64_counter("sluice_accepted_total")
                .with_description("Connections delivered by the listener")
                .with_unit("1")
                .init(),
            delivered_total: meter
                .u64_counter("sluice_delivered_total")
                .with_description("Connections handed to the subscriber")
                .with_unit("1")
                .init(),
            credit_issued_total: meter
                .u64_counter("sluice_credit_issued_total")
                .with_description("Accept credits issued to the listener")
                .with_unit("1")
                .init(),
            pending_connections: meter
                .u64_gauge("sluice_pending_connections")
                .with_description("Accepted connections awaiting demand (0 or 1)")
                .with_unit("1")
                .init(),
        }
    }
}

fn manual_provider() -> SdkMeterProvider {
    let reader = ManualReader::builder().build();
    SdkMeterProvider::builder().with_reader(reader).build()
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
///
/// # Arguments
///
/// * `otel_endpoint` - Optional OTLP endpoint for metrics export
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        if let Some(endpoint) = otel_endpoint {
            use opentelemetry_otlp::{Protocol, WithExportConfig};

            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::Grpc);

            match opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_period(std::time::Duration::from_secs(10))
                .build()
            {
                Ok(provider) => {
                    global::set_meter_provider(provider);
                    tracing::info!(endpoint, "OTLP metrics exporter configured");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create OTLP exporter, using no-op metrics");
                    global::set_meter_provider(manual_provider());
                }
            }
        } else {
            // Recorded but not exported.
            global::set_meter_provider(manual_provider());
        }

        let meter = global::meter("tcp-sluice");
        Metrics::new(&meter)
    });
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

/// Get the global metrics instance, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

fn attrs(listener: &str) -> [KeyValue; 1] {
    [KeyValue::new("listener", listener.to_string())]
}

/// Record a connection taken from the listener.
pub fn record_accepted(listener: &str) {
    if let Some(m) = METRICS.get() {
        m.accepted_total.add(1, &attrs(listener));
    }
}

/// Record a connection handed downstream.
pub fn record_delivered(listener: &str) {
    if let Some(m) = METRICS.get() {
        m.delivered_total.add(1, &attrs(listener));
    }
}

/// Record an accept credit sent to the driver.
pub fn record_credit_issued(listener: &str) {
    if let Some(m) = METRICS.get() {
        m.credit_issued_total.add(1, &attrs(listener));
    }
}

/// Record whether a connection is waiting in the handoff buffer.
pub fn record_pending(listener: &str, pending: bool) {
    if let Some(m) = METRICS.get() {
        m.pending_connections.record(u64::from(pending), &attrs(listener));
    }
}
