use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ExporterError {
    #[error("OTLP metrics exporter build failed: {0}")]
    Build(String),
}

/// Resolved OTLP metrics settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtlpMetricsConfig {
    pub service_name: String,
    pub endpoint: String,
    pub period: Duration,
}

impl OtlpMetricsConfig {
    /// Resolve settings from an environment lookup. Returns `None` when no
    /// endpoint is configured, which disables the exporter.
    ///
    /// Variables:
    ///  - OTEL_EXPORTER_OTLP_METRICS_ENDPOINT, then OTEL_EXPORTER_OTLP_ENDPOINT
    ///  - OTEL_SERVICE_NAME (optional override)
    ///  - OTEL_METRICS_PERIOD_SECS (optional, default 30)
    pub fn resolve<F>(default_service: &str, lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup("OTEL_EXPORTER_OTLP_METRICS_ENDPOINT")
            .filter(|v| !v.trim().is_empty())
            .or_else(|| lookup("OTEL_EXPORTER_OTLP_ENDPOINT"))
            .filter(|v| !v.trim().is_empty())?;
        let service_name = lookup("OTEL_SERVICE_NAME")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default_service.to_string());
        let period = lookup("OTEL_METRICS_PERIOD_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(30);
        Some(Self {
            service_name,
            endpoint,
            period: Duration::from_secs(period),
        })
    }

    pub fn from_env(default_service: &str) -> Option<Self> {
        Self::resolve(default_service, |key| std::env::var(key).ok())
    }
}

/// Install a global meter provider exporting over OTLP/gRPC.
pub fn init_otlp_metrics(
    config: &OtlpMetricsConfig,
) -> Result<(), ExporterError> {
    let resource = Resource::builder()
        .with_attribute(KeyValue::new(
            "service.name",
            config.service_name.clone(),
        ))
        .build();

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.endpoint.as_str())
        .build()
        .map_err(|e| ExporterError::Build(e.to_string()))?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(config.period)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build();

    opentelemetry::global::set_meter_provider(provider);
    Ok(())
}

/// Install the OTLP exporter only when the environment configures an endpoint.
/// Returns Ok(true) if the exporter was installed.
pub fn init_otlp_metrics_if_configured(
    default_service: &str,
) -> Result<bool, ExporterError> {
    match OtlpMetricsConfig::from_env(default_service) {
        Some(cfg) => {
            init_otlp_metrics(&cfg)?;
            Ok(true)
        }
        None => Ok(false),
    }
}
