pub mod error;
pub mod extractors;
pub mod handlers;
pub mod responses;

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use mirror_common::types::ServiceInfo;
use mirror_db::storage::Storage;
use mirror_db::tracker::pg_repository::PgTrackerRepository;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::jira::client::JiraClient;
use crate::jira::project_sync::{ProjectSyncer, SyncSettings};
use crate::registry::SyncRegistry;

pub const SERVICE_NAME: &str = "mirror-ingest";

#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub repo: PgTrackerRepository,
    pub syncer: Arc<ProjectSyncer<PgTrackerRepository>>,
    pub registry: SyncRegistry,
    pub info: ServiceInfo,
    /// Cancelled on process shutdown; parent of every sync token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        storage: Storage,
        client: JiraClient,
        settings: SyncSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let repo = PgTrackerRepository::new(storage.clone());
        let info = ServiceInfo::new(SERVICE_NAME, &client.config().base_url);
        let syncer = ProjectSyncer::new(client, repo.clone(), settings, tracing::info_span!("sync"));

        Self {
            storage,
            repo,
            syncer: Arc::new(syncer),
            registry: SyncRegistry::new(shutdown.clone()),
            info,
            shutdown,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/info", get(handlers::info))
        .route("/projects", get(handlers::list_projects))
        .route("/projects/remote", get(handlers::list_remote_projects))
        .route(
            "/projects/{key}/sync",
            get(handlers::get_sync)
                .post(handlers::start_sync)
                .delete(handlers::cancel_sync),
        )
        .route("/projects/{key}/issues", get(handlers::list_project_issues))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
