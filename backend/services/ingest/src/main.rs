use std::net::SocketAddr;

use mirror_config::{init_tracing, AppConfig};
use mirror_db::storage::Storage;
use mirror_db::{create_pool, schema};
use mirror_ingest::api::{build_router, AppState, SERVICE_NAME};
use mirror_ingest::jira::client::{JiraClient, JiraClientConfig};
use mirror_ingest::jira::project_sync::SyncSettings;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    init_tracing("info");

    let config = AppConfig::from_env().expect("failed to load config");
    let jira_config = JiraClientConfig::from_env().expect("failed to load jira config");
    let settings = SyncSettings::from_env().expect("failed to load sync settings");
    tracing::info!(
        service = SERVICE_NAME,
        upstream = %jira_config.base_url,
        threads = settings.thread_count,
        page_size = settings.page_size,
        "starting"
    );

    let primary = create_pool(&config.primary_database_url, &config.pool)
        .await
        .expect("failed to create primary pool");
    let replica = create_pool(&config.replica_database_url, &config.pool)
        .await
        .expect("failed to create replica pool");
    schema::apply(&primary)
        .await
        .expect("failed to apply schema");

    let shutdown = CancellationToken::new();
    let storage = Storage::new(primary, replica, tracing::info_span!("storage"))
        .with_shutdown(shutdown.clone());
    let client = JiraClient::new(jira_config, tracing::info_span!("jira"))
        .expect("failed to create jira client");

    let state = AppState::new(storage, client, settings, shutdown.clone());
    let app = build_router(state);
    let addr: SocketAddr = config.bind_addr().parse().expect("invalid bind address");

    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .expect("server error");

    tracing::info!("ingest service stopped");
}

/// Wait for Ctrl-C, then cancel every running sync and pending read.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
    shutdown.cancel();
}
