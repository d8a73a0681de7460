use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::models::{JiraIssue, JiraProject, JiraUser};
use mirror_db::tracker::models::{Author, Issue, Project, StatusChange};

/// Layout of every timestamp the tracker sends, e.g. `2024-03-01T09:00:00.000+0000`.
pub const JIRA_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%z";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("{record}: invalid id {value:?}")]
    InvalidId { record: String, value: String },

    #[error("{record}: invalid {field} timestamp {value:?}")]
    InvalidTimestamp {
        record: String,
        field: &'static str,
        value: String,
    },

    #[error("{record}: missing {field}")]
    MissingField { record: String, field: &'static str },
}

pub fn parse_jira_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(value.trim(), JIRA_TIME_FORMAT)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Stable surrogate id for a username: the first eight bytes of its SHA-256
/// digest with the sign bit cleared.
pub fn author_id(username: &str) -> i64 {
    let digest = Sha256::digest(username.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) & i64::MAX as u64) as i64
}

pub fn to_author(user: &JiraUser) -> Result<Author, TransformError> {
    let username = user.username().ok_or_else(|| TransformError::MissingField {
        record: user.display_name.clone().unwrap_or_else(|| "user".to_owned()),
        field: "name",
    })?;

    Ok(Author {
        jira_id: author_id(username),
        username: username.to_owned(),
        email: user
            .email_address
            .as_deref()
            .filter(|e| !e.is_empty())
            .map(str::to_owned),
    })
}

pub fn to_project(project: &JiraProject) -> Result<Project, TransformError> {
    Ok(Project {
        jira_id: parse_id(&project.key, &project.id)?,
        key: project.key.clone(),
        name: project.name.clone(),
        url: project.self_url.clone(),
    })
}

/// Map an issue and rebuild its status history from the changelog, in
/// source order.
pub fn to_issue_and_history(
    issue: &JiraIssue,
    project_id: i64,
) -> Result<(Issue, Vec<StatusChange>), TransformError> {
    let record = issue.key.as_str();
    let jira_id = parse_id(record, &issue.id)?;
    let f = &issue.fields;

    let status = f
        .status
        .as_ref()
        .map(|s| s.name.clone())
        .ok_or_else(|| missing(record, "status"))?;
    let created = f.created.as_deref().ok_or_else(|| missing(record, "created"))?;

    let mapped = Issue {
        jira_id,
        project_id,
        key: issue.key.clone(),
        summary: f.summary.clone().unwrap_or_default(),
        status,
        priority: f.priority.as_ref().map(|p| p.name.clone()).unwrap_or_default(),
        created_time: required_time(record, "created", created)?,
        updated_time: optional_time(record, "updated", f.updated.as_deref())?,
        closed_time: optional_time(record, "resolutiondate", f.resolutiondate.as_deref())?,
        time_spent: f.timespent,
        creator_id: f.creator.as_ref().and_then(JiraUser::username).map(author_id),
        assignee_id: f.assignee.as_ref().and_then(JiraUser::username).map(author_id),
    };

    let mut history = Vec::new();
    for entry in &issue.changelog.histories {
        let status_items: Vec<_> = entry
            .items
            .iter()
            .filter(|item| item.field.eq_ignore_ascii_case("status"))
            .collect();
        if status_items.is_empty() {
            continue;
        }

        let change_time = required_time(record, "changelog", &entry.created)?;
        for item in status_items {
            history.push(StatusChange {
                id: None,
                issue_id: jira_id,
                old_status: item.from_string.clone(),
                new_status: item.to_string.clone(),
                change_time,
            });
        }
    }

    Ok((mapped, history))
}

/// Authors an issue references, in creator/assignee order.
pub fn issue_authors(issue: &JiraIssue) -> Vec<Author> {
    [&issue.fields.creator, &issue.fields.assignee]
        .into_iter()
        .flatten()
        .filter_map(|user| to_author(user).ok())
        .collect()
}

fn parse_id(record: &str, raw: &str) -> Result<i64, TransformError> {
    raw.trim().parse().map_err(|_| TransformError::InvalidId {
        record: record.to_owned(),
        value: raw.to_owned(),
    })
}

fn missing(record: &str, field: &'static str) -> TransformError {
    TransformError::MissingField {
        record: record.to_owned(),
        field,
    }
}

fn required_time(
    record: &str,
    field: &'static str,
    value: &str,
) -> Result<DateTime<Utc>, TransformError> {
    parse_jira_time(value).ok_or_else(|| TransformError::InvalidTimestamp {
        record: record.to_owned(),
        field,
        value: value.to_owned(),
    })
}

fn optional_time(
    record: &str,
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, TransformError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => required_time(record, field, v).map(Some),
        None => Ok(None),
    }
}
