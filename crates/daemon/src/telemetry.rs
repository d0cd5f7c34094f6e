//! OpenTelemetry export
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (e.g., http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name (default: quarry-engine)
//!
//! ```text
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 \
//! OTEL_SERVICE_NAME=quarry-dev \
//!     ./quarry-engine
//! ```

use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// What happened to OpenTelemetry at startup; logged once the subscriber is up
pub enum Status {
    NotConfigured,
    NotCompiled,
    Enabled { endpoint: String },
    Failed(String),
}

impl Status {
    pub fn log(&self) {
        match self {
            Status::NotConfigured => {
                tracing::debug!("OpenTelemetry not configured (OTEL_EXPORTER_OTLP_ENDPOINT not set)")
            }
            Status::NotCompiled => {
                tracing::warn!("OpenTelemetry endpoint set but feature 'telemetry' not enabled");
                tracing::warn!("Rebuild with: cargo build --features telemetry");
            }
            Status::Enabled { endpoint } => {
                tracing::info!(endpoint = %endpoint, "OpenTelemetry export enabled")
            }
            Status::Failed(e) => {
                tracing::warn!(error = %e, "Failed to initialize OpenTelemetry (continuing without it)")
            }
        }
    }
}

/// Build the export layer when an endpoint is configured
pub fn layer<S>() -> (Option<BoxedLayer<S>>, Status)
where
    S: Subscriber + for<'a> LookupSpan<'a> + Send + Sync,
{
    let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        return (None, Status::NotConfigured);
    };

    #[cfg(feature = "telemetry")]
    {
        match build_layer(&endpoint) {
            Ok(layer) => (Some(layer), Status::Enabled { endpoint }),
            Err(e) => (None, Status::Failed(e.to_string())),
        }
    }

    #[cfg(not(feature = "telemetry"))]
    {
        let _ = endpoint;
        (None, Status::NotCompiled)
    }
}

#[cfg(feature = "telemetry")]
fn build_layer<S>(endpoint: &str) -> anyhow::Result<BoxedLayer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a> + Send + Sync,
{
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::TracerProvider;
    use opentelemetry_sdk::Resource;

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "quarry-engine".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.clone(),
        )]))
        .build();
    let tracer = provider.tracer(service_name);
    opentelemetry::global::set_tracer_provider(provider);

    Ok(tracing_opentelemetry::layer().with_tracer(tracer).boxed())
}
