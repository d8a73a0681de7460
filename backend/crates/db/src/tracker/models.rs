use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::{SqlValue, UpsertRow};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub jira_id: i64,
    pub key: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub jira_id: i64,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub jira_id: i64,
    pub project_id: i64,
    pub key: String,
    pub summary: String,
    pub status: String,
    pub priority: String,
    pub created_time: DateTime<Utc>,
    pub updated_time: Option<DateTime<Utc>>,
    pub closed_time: Option<DateTime<Utc>>,
    /// Seconds logged against the issue.
    pub time_spent: Option<i64>,
    pub creator_id: Option<i64>,
    pub assignee_id: Option<i64>,
}

/// One status transition. `id` is assigned by the database and is `None`
/// until the row has been read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub issue_id: i64,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub change_time: DateTime<Utc>,
}

impl UpsertRow for Project {
    const TABLE: &'static str = "project";
    const COLUMNS: &'static [&'static str] = &["jira_id", "key", "name", "url"];
    const CONFLICT_KEY: &'static [&'static str] = &["jira_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.jira_id.into(),
            self.key.as_str().into(),
            self.name.as_str().into(),
            self.url.as_str().into(),
        ]
    }
}

impl UpsertRow for Author {
    const TABLE: &'static str = "author";
    const COLUMNS: &'static [&'static str] = &["jira_id", "username", "email"];
    const CONFLICT_KEY: &'static [&'static str] = &["jira_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.jira_id.into(),
            self.username.as_str().into(),
            self.email.as_deref().into(),
        ]
    }
}

impl UpsertRow for Issue {
    const TABLE: &'static str = "issue";
    const COLUMNS: &'static [&'static str] = &[
        "jira_id",
        "project_id",
        "key",
        "summary",
        "status",
        "priority",
        "created_time",
        "updated_time",
        "closed_time",
        "time_spent",
        "creator_id",
        "assignee_id",
    ];
    const CONFLICT_KEY: &'static [&'static str] = &["jira_id"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.jira_id.into(),
            self.project_id.into(),
            self.key.as_str().into(),
            self.summary.as_str().into(),
            self.status.as_str().into(),
            self.priority.as_str().into(),
            self.created_time.into(),
            self.updated_time.into(),
            self.closed_time.into(),
            self.time_spent.into(),
            self.creator_id.into(),
            self.assignee_id.into(),
        ]
    }
}

impl UpsertRow for StatusChange {
    const TABLE: &'static str = "status_change";
    const COLUMNS: &'static [&'static str] = &["issue_id", "old_status", "new_status", "change_time"];
    const CONFLICT_KEY: &'static [&'static str] = &["issue_id", "change_time", "new_status"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.issue_id.into(),
            self.old_status.as_deref().into(),
            self.new_status.as_deref().into(),
            self.change_time.into(),
        ]
    }
}
