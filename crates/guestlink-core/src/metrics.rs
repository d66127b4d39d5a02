//! `OpenTelemetry` metrics for worker traffic.
//!
//! Only compiled with the `metrics` Cargo feature. [`init_metrics`] sets up
//! OTLP export of traces and metrics; the `record_*` helpers feed counters
//! from the registry's reader tasks.

use std::sync::OnceLock;

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};

/// Errors that can occur during metrics / tracing pipeline initialisation.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("OpenTelemetry SDK error: {0}")]
    Sdk(#[from] opentelemetry_sdk::error::OTelSdkError),
}

/// Keeps the `OpenTelemetry` providers alive.
///
/// Providers are not shut down on drop; call [`MetricsGuard::shutdown`] to
/// flush before exiting.
pub struct MetricsGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl MetricsGuard {
    /// Tracer for the tracing-opentelemetry bridge.
    pub fn tracer(&self, name: &'static str) -> SdkTracer {
        self.tracer_provider.tracer(name)
    }

    /// Gracefully shut down both providers, flushing buffered telemetry.
    ///
    /// # Errors
    ///
    /// Returns an error if either provider fails to shut down cleanly.
    pub fn shutdown(self) -> Result<(), MetricsError> {
        self.tracer_provider.shutdown()?;
        self.meter_provider.shutdown()?;
        Ok(())
    }
}

/// Initialise the OTLP pipeline for traces and metrics.
///
/// # Errors
///
/// Returns [`MetricsError`] if the OTLP exporters cannot be constructed.
pub fn init_metrics(endpoint: &str) -> Result<MetricsGuard, MetricsError> {
    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(trace_exporter)
        .build();
    global::set_tracer_provider(tracer_provider.clone());

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter)
        .build();
    global::set_meter_provider(meter_provider.clone());

    Ok(MetricsGuard {
        tracer_provider,
        meter_provider,
    })
}

struct Instruments {
    frames: Counter<u64>,
    dropped: Counter<u64>,
    reconnects: Counter<u64>,
}

fn instruments() -> &'static Instruments {
    static INSTRUMENTS: OnceLock<Instruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("guestlink");
        Instruments {
            frames: meter
                .u64_counter("guestlink.frames.decoded")
                .with_description("Frames decoded and queued")
                .build(),
            dropped: meter
                .u64_counter("guestlink.frames.dropped")
                .with_description("Frames lost at chunk boundaries")
                .build(),
            reconnects: meter
                .u64_counter("guestlink.channel.reconnects")
                .with_description("Worker channels retired after a transport failure")
                .build(),
        }
    })
}

fn worker_attr(worker: &str) -> [KeyValue; 1] {
    [KeyValue::new("worker", worker.to_string())]
}

pub fn record_frames(worker: &str, count: usize) {
    instruments()
        .frames
        .add(u64::try_from(count).unwrap_or(u64::MAX), &worker_attr(worker));
}

pub fn record_dropped_frame(worker: &str) {
    instruments().dropped.add(1, &worker_attr(worker));
}

pub fn record_reconnect(worker: &str) {
    instruments().reconnects.add(1, &worker_attr(worker));
}
