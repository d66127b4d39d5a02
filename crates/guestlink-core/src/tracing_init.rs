//! Tracing/logging initialization for the guestlink binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Build the env-filter, preferring `RUST_LOG` over `default_filter`.
fn env_filter(default_filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    )
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- used when `RUST_LOG` is not set
///   (e.g. `"guestlink=info,guestlink_core=info"`).
/// * `log_json` -- emit JSON lines instead of the human-readable format.
///
/// Logs go to stderr; stdout carries command output.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let registry = tracing_subscriber::registry().with(env_filter(default_filter));
    if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Like [`init_tracing`], additionally exporting spans and metrics over OTLP
/// when `metrics_endpoint` is given.
///
/// The returned guard must be kept alive for the process lifetime.
#[cfg(feature = "metrics")]
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    metrics_endpoint: Option<&str>,
) -> Option<crate::metrics::MetricsGuard> {
    let pipeline = metrics_endpoint.map(crate::metrics::init_metrics);
    let (guard, failure) = match pipeline {
        Some(Ok(guard)) => (Some(guard), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let otel_layer = guard.as_ref().map(|g| {
        tracing_opentelemetry::layer().with_tracer(g.tracer("guestlink"))
    });
    tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(otel_layer)
        .with(log_json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!log_json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    if let Some(e) = failure {
        tracing::warn!(error = %e, "OpenTelemetry export disabled");
    }
    guard
}

/// Without the `metrics` feature the endpoint is ignored.
#[cfg(not(feature = "metrics"))]
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    metrics_endpoint: Option<&str>,
) -> Option<()> {
    init_tracing(default_filter, log_json);
    if metrics_endpoint.is_some() {
        tracing::warn!("Built without the `metrics` feature; OTLP endpoint ignored");
    }
    None
}
