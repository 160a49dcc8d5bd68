// Xtrack Reconcile - Web Server
// Periodic provider sync + integration info API

use anyhow::Context;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};
use xtrack_reconcile::api::{build_router, AppState};
use xtrack_reconcile::source::XtrackClient;
use xtrack_reconcile::sync::SyncService;
use xtrack_reconcile::{Config, EntityKind, Reconciler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing();
    info!(
        xtrack_url = %config.xtrack_url,
        interval_secs = config.sync_interval.as_secs(),
        policy = config.comparison_policy.as_str(),
        "🚀 Starting Xtrack reconcile server v{}",
        xtrack_reconcile::VERSION
    );

    // Store failures leave the reconciler unavailable; the server still runs
    let reconciler = Arc::new(Reconciler::from_config(&config));
    let source = Arc::new(XtrackClient::new(&config.xtrack_url)?);
    let sync = Arc::new(SyncService::new(reconciler, source, config.sync_interval));

    for kind in EntityKind::ALL {
        sync.spawn_periodic(kind);
    }

    let app = build_router(AppState { sync })
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("📡 Listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await.context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
