use std::net::SocketAddr;
use std::sync::Arc;

use kube::Client;
use tokio::{task::JoinHandle, try_join};
use tracing::info;

use crate::{
    access::KubeconfigSecretAccess,
    config::TcmConfig,
    controller::{ControllerContext, ReconcileSettings, run_controllers},
    metrics::{CounterSet, OperatorMetrics, OtelCounters},
    reporter::{EventSink, LogSink, StatusSink},
    store::KubeStore,
    templates::TemplateManager,
    web::run_http_server,
};

pub const CONTROLLER_NAME: &str = "tcm-operator";

/// Compute the HTTP bind address based on config.
pub fn compute_http_addr(cfg: &TcmConfig) -> SocketAddr {
    ([0, 0, 0, 0], cfg.http_port).into()
}

/// Wire the Kubernetes-backed collaborators into a controller context.
pub fn build_context(
    client: Client,
    cfg: &TcmConfig,
    counters: Arc<CounterSet>,
    otel_enabled: bool,
) -> ControllerContext {
    let otel = otel_enabled.then(OtelCounters::from_global);
    let sink: Arc<dyn StatusSink> = if cfg.events {
        Arc::new(EventSink::new(client.clone(), CONTROLLER_NAME))
    } else {
        Arc::new(LogSink)
    };
    ControllerContext {
        store: Arc::new(KubeStore::new(client.clone())),
        renderer: Arc::new(TemplateManager::new(cfg.template_defaults())),
        sink,
        metrics: Arc::new(OperatorMetrics::new(counters, otel)),
        access: Arc::new(KubeconfigSecretAccess::new(client)),
        settings: ReconcileSettings::from_config(cfg),
    }
}

/// Spawn the Kubernetes controller loops.
pub fn spawn_controllers(
    client: Client,
    ctx: Arc<ControllerContext>,
    namespace: Option<String>,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_controllers(client, ctx, namespace).await })
}

/// Spawn the health/metrics HTTP server.
pub fn spawn_http(
    addr: SocketAddr,
    counters: Arc<CounterSet>,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_http_server(addr, counters).await })
}

/// Start controllers and the HTTP server and wait until either finishes.
pub async fn run_all(
    client: Client,
    cfg: TcmConfig,
    otel_enabled: bool,
) -> anyhow::Result<()> {
    let http_addr = compute_http_addr(&cfg);
    let counters = Arc::new(CounterSet::new());
    let ctx = Arc::new(build_context(
        client.clone(),
        &cfg,
        counters.clone(),
        otel_enabled,
    ));
    let namespace = cfg.watch_namespace().map(str::to_string);
    info!(?namespace, events = cfg.events, "starting tcm runtime");

    let controllers = spawn_controllers(client, ctx, namespace);
    let http = spawn_http(http_addr, counters);

    let (c_res, h_res) = try_join!(controllers, http)?;
    c_res?;
    h_res?;
    Ok(())
}
