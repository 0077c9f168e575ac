use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{TonicExporterBuilder, WithExportConfig};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::Config;
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use tracing_chrome::{ChromeLayerBuilder, FlushGuard};
use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Registry;

/// Keeps exporters alive, flushes the chrome trace and shuts the OTLP pipeline down on drop.
pub struct TelemetryGuard {
    _chrome: Option<FlushGuard>,
    exporting: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.exporting {
            global::shutdown_tracer_provider();
        }
    }
}

/// Installs the global subscriber. The OTLP layers are only built when an endpoint is given
/// and must be called from within a tokio runtime.
pub fn init_telemetry(
    endpoint: &Option<String>,
    console: bool,
    chrome_trace: Option<&Path>,
) -> Result<TelemetryGuard> {
    let (trace_layer, metrics_layer) = match endpoint {
        Some(endpoint) => {
            let service_resource = Resource::new(vec![
                KeyValue::new(SERVICE_NAME, env!("CARGO_PKG_NAME")),
                KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
            ]);

            let tracer_provider = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(build_tonic_exporter(endpoint))
                .with_trace_config(Config::default().with_resource(service_resource.clone()))
                .install_batch(runtime::Tokio)
                .context("Failed to install tracer")?;
            global::set_tracer_provider(tracer_provider.clone());
            let tracer = tracer_provider.tracer("opentelemetry-otlp");

            let meter = opentelemetry_otlp::new_pipeline()
                .metrics(runtime::Tokio)
                .with_exporter(build_tonic_exporter(endpoint))
                .with_resource(service_resource)
                .build()
                .context("Failed to install meter")?;

            global::set_text_map_propagator(TraceContextPropagator::new());
            (
                Some(OpenTelemetryLayer::new(tracer)),
                Some(MetricsLayer::new(meter)),
            )
        }
        None => (None, None),
    };

    let (chrome_layer, chrome_guard) = match chrome_trace {
        Some(path) => {
            let (layer, guard) = ChromeLayerBuilder::new().file(path).build();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let fmt_layer = if endpoint.is_none() || console {
        Some(tracing_subscriber::fmt::layer())
    } else {
        None
    };

    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new("INFO")))
        .with(trace_layer)
        .with(metrics_layer)
        .with(chrome_layer)
        .with(fmt_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(TelemetryGuard {
        _chrome: chrome_guard,
        exporting: endpoint.is_some(),
    })
}

fn build_tonic_exporter(endpoint: &str) -> TonicExporterBuilder {
    opentelemetry_otlp::new_exporter()
        .tonic()
        .with_timeout(Duration::from_secs(15))
        .with_endpoint(endpoint)
}
