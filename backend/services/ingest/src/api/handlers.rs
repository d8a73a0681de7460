use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use mirror_common::error::MirrorError;
use mirror_common::types::ServiceInfo;
use mirror_db::storage::HealthReport;
use mirror_db::tracker::repositories::TrackerReader;
use tracing::Instrument;

use crate::api::error::ApiError;
use crate::api::extractors::ProjectKey;
use crate::api::responses::{
    IssuesResponse, ProjectsResponse, RemoteProjectsResponse, SyncStatusResponse,
};
use crate::api::AppState;

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.storage.health().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

pub async fn info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(state.info.clone())
}

pub async fn list_projects(
    State(state): State<AppState>,
) -> Result<Json<ProjectsResponse>, ApiError> {
    let data = state.repo.list_projects().await?;
    let count = data.len();
    Ok(Json(ProjectsResponse { data, count }))
}

pub async fn list_remote_projects(
    State(state): State<AppState>,
) -> Result<Json<RemoteProjectsResponse>, ApiError> {
    let data = state.syncer.client().list_projects(&state.shutdown).await?;
    let count = data.len();
    Ok(Json(RemoteProjectsResponse { data, count }))
}

pub async fn list_project_issues(
    State(state): State<AppState>,
    ProjectKey(key): ProjectKey,
) -> Result<Json<IssuesResponse>, ApiError> {
    let project = state
        .repo
        .get_project_by_key(&key)
        .await?
        .ok_or_else(|| MirrorError::NotFound(format!("project {key} has not been synced")))?;

    let data = state.repo.list_issues_by_project(project.jira_id).await?;
    let count = data.len();
    Ok(Json(IssuesResponse {
        project,
        data,
        count,
    }))
}

/// Start a background sync of one project.
pub async fn start_sync(
    State(state): State<AppState>,
    ProjectKey(key): ProjectKey,
) -> Result<(StatusCode, Json<SyncStatusResponse>), ApiError> {
    let token = state
        .registry
        .try_start(&key)
        .ok_or_else(|| MirrorError::Conflict(format!("a sync of {key} is already running")))?;

    let syncer = state.syncer.clone();
    let registry = state.registry.clone();
    let project = key.clone();
    tokio::spawn(
        async move {
            let result = syncer.sync_project(&project, token).await;
            registry.finish(&project, &result);
        }
        .in_current_span(),
    );

    tracing::info!(project = %key, "sync started");
    sync_status(&state, &key).map(|status| (StatusCode::ACCEPTED, status))
}

pub async fn get_sync(
    State(state): State<AppState>,
    ProjectKey(key): ProjectKey,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    sync_status(&state, &key)
}

pub async fn cancel_sync(
    State(state): State<AppState>,
    ProjectKey(key): ProjectKey,
) -> Result<(StatusCode, Json<SyncStatusResponse>), ApiError> {
    if !state.registry.cancel(&key) {
        return Err(MirrorError::NotFound(format!("no sync of {key} is running")).into());
    }
    tracing::info!(project = %key, "sync cancellation requested");
    sync_status(&state, &key).map(|status| (StatusCode::ACCEPTED, status))
}

fn sync_status(state: &AppState, key: &str) -> Result<Json<SyncStatusResponse>, ApiError> {
    let data = state
        .registry
        .status(key)
        .ok_or_else(|| MirrorError::NotFound(format!("project {key} has never been synced")))?;
    Ok(Json(SyncStatusResponse { data }))
}
