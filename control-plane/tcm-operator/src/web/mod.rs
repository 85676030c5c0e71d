use axum::{Router, extract::Extension, http::header, response::IntoResponse, routing::get};
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::metrics::CounterSet;

async fn metrics(Extension(counters): Extension<Arc<CounterSet>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        counters.render_prometheus(),
    )
}

pub fn router(counters: Arc<CounterSet>) -> Router {
    // Expose both /health (preferred) and /healthz (legacy) for compatibility
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(metrics))
        .layer(Extension(counters))
        .layer(TraceLayer::new_for_http())
}

pub async fn run_http_server(
    addr: SocketAddr,
    counters: Arc<CounterSet>,
) -> anyhow::Result<()> {
    let app = router(counters);
    info!("TCM HTTP listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
