//! Log output for the ledger service, plus span export over OTLP/gRPC when a
//! collector endpoint is configured.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
    Resource,
};
use std::{env::var, time::Duration};
use tracing::{debug, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;

const ENV_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const ENV_PROTOCOL: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
const ENV_INSTANCE_ID: &str = "OTEL_SERVICE_INSTANCE_ID";

const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

/// Dependencies that are noisy at the service's own verbosity.
const QUIET_TARGETS: [&str; 5] = [
    "hyper=error",
    "tokio=error",
    "reqwest=warn",
    "sqlx=warn",
    "opentelemetry_sdk=warn",
];

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

/// Span export settings taken from the standard OTEL variables.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TracingConfig {
    endpoint: String,
    instance_id: String,
}

impl TracingConfig {
    /// `None` unless a collector endpoint is set; export stays off by default.
    fn from_env() -> Option<Self> {
        let endpoint = var(ENV_ENDPOINT).ok().filter(|ep| !ep.trim().is_empty())?;

        if let Ok(protocol) = var(ENV_PROTOCOL) {
            if protocol != "grpc" {
                warn!("{ENV_PROTOCOL}={protocol:?} ignored, spans are exported over gRPC");
            }
        }

        Some(Self {
            endpoint: normalize_endpoint(&endpoint),
            instance_id: var(ENV_INSTANCE_ID).unwrap_or_else(|_| Ulid::new().to_string()),
        })
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new("service.instance.id", self.instance_id.clone()),
                KeyValue::new("vcs.commit", crate::GIT_COMMIT_HASH),
            ])
            .build()
    }
}

/// Collector address with a scheme and without a trailing slash. gRPC
/// collectors without an explicit scheme are assumed to speak TLS.
fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

fn init_tracer(config: &TracingConfig) -> Result<Tracer> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .with_context(|| format!("failed to build span exporter for {}", config.endpoint))?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

fn env_filter(level: Level) -> Result<EnvFilter> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    for directive in QUIET_TARGETS {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// Install the global subscriber. Errors only are logged unless `-v` raises it.
///
/// # Errors
/// Returns an error if the exporter cannot be built or a subscriber is
/// already installed.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let filter = env_filter(verbosity_level.unwrap_or(Level::ERROR))?;

    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false)
        .pretty();

    let registry = Registry::default().with(fmt_layer);

    if let Some(config) = TracingConfig::from_env() {
        let tracer = init_tracer(&config)?;
        let subscriber = registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .with(filter);
        tracing::subscriber::set_global_default(subscriber)?;
        debug!("Exporting spans to {}", config.endpoint);
    } else {
        tracing::subscriber::set_global_default(registry.with(filter))?;
    }

    Ok(())
}

/// Flush pending spans before exit. No-op when export was never enabled.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(err) = provider.shutdown() {
            warn!("Failed to flush spans: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_keeps_an_explicit_scheme() {
        assert_eq!(
            normalize_endpoint("http://otel-collector:4317/"),
            "http://otel-collector:4317"
        );
    }

    #[test]
    fn endpoint_without_scheme_defaults_to_https() {
        assert_eq!(
            normalize_endpoint(" collector.example.com:4317/ "),
            "https://collector.example.com:4317"
        );
    }

    #[test]
    fn export_is_off_without_an_endpoint() {
        temp_env::with_vars(
            [(ENV_ENDPOINT, None::<&str>), (ENV_INSTANCE_ID, None)],
            || assert_eq!(TracingConfig::from_env(), None),
        );
        temp_env::with_var(ENV_ENDPOINT, Some("  "), || {
            assert_eq!(TracingConfig::from_env(), None);
        });
    }

    #[test]
    fn export_config_reads_otel_variables() {
        temp_env::with_vars(
            [
                (ENV_ENDPOINT, Some("localhost:4317")),
                (ENV_INSTANCE_ID, Some("tutela-1")),
                (ENV_PROTOCOL, Some("grpc")),
            ],
            || {
                assert_eq!(
                    TracingConfig::from_env(),
                    Some(TracingConfig {
                        endpoint: "https://localhost:4317".to_string(),
                        instance_id: "tutela-1".to_string(),
                    })
                );
            },
        );
    }

    #[test]
    fn quiet_targets_are_valid_directives() -> Result<()> {
        env_filter(Level::INFO)?;
        Ok(())
    }

    #[test]
    fn shutdown_without_export_is_a_noop() {
        shutdown_tracer();
    }
}
