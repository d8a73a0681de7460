use async_trait::async_trait;

use crate::tracker::models::{Author, Issue, Project, StatusChange};
use mirror_common::error::MirrorResult;

/// Write side of the replicated tracker data. Every call runs in its own
/// primary transaction; an empty batch is a no-op.
#[async_trait]
pub trait TrackerWriter: Send + Sync {
    /// Insert or update a project keyed by its external id; returns that id.
    async fn upsert_project(&self, project: &Project) -> MirrorResult<i64>;

    async fn upsert_author(&self, author: &Author) -> MirrorResult<i64>;

    /// Insert or update an issue. `created_time` is kept from the first insert.
    async fn upsert_issue(&self, issue: &Issue) -> MirrorResult<i64>;

    async fn upsert_authors(&self, authors: &[Author]) -> MirrorResult<()>;

    async fn upsert_issues(&self, issues: &[Issue]) -> MirrorResult<()>;

    /// Insert transitions; an already recorded (issue, time, new status) is skipped.
    async fn insert_status_changes(&self, changes: &[StatusChange]) -> MirrorResult<()>;
}

/// Read side. Served from the replica with fallback to the primary.
#[async_trait]
pub trait TrackerReader: Send + Sync {
    async fn list_projects(&self) -> MirrorResult<Vec<Project>>;
    async fn get_project_by_key(&self, key: &str) -> MirrorResult<Option<Project>>;
    async fn get_author(&self, jira_id: i64) -> MirrorResult<Option<Author>>;
    async fn list_issues_by_project(&self, project_id: i64) -> MirrorResult<Vec<Issue>>;
    async fn list_status_changes_by_issue(&self, issue_id: i64) -> MirrorResult<Vec<StatusChange>>;
}
