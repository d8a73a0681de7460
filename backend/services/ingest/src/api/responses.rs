use mirror_db::tracker::models::{Issue, Project};
use serde::Serialize;

use crate::jira::models::JiraProject;
use crate::registry::SyncStatus;

#[derive(Debug, Serialize)]
pub struct ProjectsResponse {
    pub data: Vec<Project>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct RemoteProjectsResponse {
    pub data: Vec<JiraProject>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct IssuesResponse {
    pub project: Project,
    pub data: Vec<Issue>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct SyncStatusResponse {
    pub data: SyncStatus,
}
