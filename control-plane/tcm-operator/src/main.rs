use envconfig::Envconfig;
use kube::Client;
use tcm_observability::{TracingConfig, init_otlp_metrics_if_configured, init_tracing};
use tcm_operator::{config::TcmConfig, runtime};
use tracing::{info, warn};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cfg = TcmConfig::init_from_env()?.validate()?;
    init_tracing(&TracingConfig::new("info", cfg.log_json));

    // Ensure rustls uses the aws-lc-rs provider explicitly.
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::aws_lc_rs::default_provider(),
    ) {
        tracing::debug!(
            ?e,
            "CryptoProvider already installed or incompatible; proceeding"
        );
    }

    let otel_enabled =
        match init_otlp_metrics_if_configured(runtime::CONTROLLER_NAME) {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!(error = %e, "OTLP metrics exporter disabled");
                false
            }
        };
    info!(?cfg, otel_enabled, "Starting TCM operator");

    let client = Client::try_default().await?;
    runtime::run_all(client, cfg, otel_enabled).await
}
