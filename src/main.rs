//! Pipeliner - pipeline orchestrator for reconnaissance toolchains
//!
//! YAML-declared tool pipelines run against a target domain; tool output is
//! streamed into a persistent scan record as it lands on disk.

mod api;
mod config;
mod db;
mod engine;
mod hooks;
mod locks;
mod monitor;
mod notifications;
mod parsers;
mod patterns;
mod status;

use api::{create_router, AppState};
use config::Stage;
use db::Database;
use engine::{ScanExecutor, ScanQueue};
use hooks::{CombineOutputHook, HookRegistry, NotifierHook};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeliner=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let db_path = std::env::var("PIPELINER_DB_PATH").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.pipeliner/pipeliner.db")
    });

    let port: u16 = std::env::var("PIPELINER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    let max_concurrent: usize = std::env::var("MAX_CONCURRENT_SCANS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %db_path, "Opening database");
    let db = Database::open(&db_path)?;

    // Process-wide scan queue
    let queue = ScanQueue::init_global(max_concurrent);

    // Notification sink and the bundled hooks
    let sink = notifications::sink_from_env();
    let hooks = Arc::new(HookRegistry::new());
    hooks.register_legacy(Stage::SubdomainEnum, Arc::new(CombineOutputHook));
    hooks.register_legacy(Stage::VulnScan, Arc::new(NotifierHook::new(sink.clone())));

    let executor = Arc::new(ScanExecutor::new(
        db.clone(),
        hooks,
        sink,
        queue.clone(),
    ));

    tracing::info!(
        max_concurrent,
        config_dir = %config::config_dir().display(),
        "Scan engine ready"
    );

    // Router
    let state = AppState::new(db, executor, queue);
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Pipeliner listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
