use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::batch::{rows_of, BatchUpsert, ConflictAction, UpsertRow};
use crate::storage::Storage;
use crate::tracker::models::{Author, Issue, Project, StatusChange};
use crate::tracker::repositories::{TrackerReader, TrackerWriter};
use mirror_common::error::{MirrorError, MirrorResult};

const ISSUE_CONFLICT: ConflictAction = ConflictAction::UpdateAll {
    preserve: &["created_time"],
};

const UPDATE_ALL: ConflictAction = ConflictAction::UpdateAll { preserve: &[] };

#[derive(Clone)]
pub struct PgTrackerRepository {
    storage: Storage,
}

impl PgTrackerRepository {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    async fn upsert_one<R: UpsertRow + Sync>(
        &self,
        op: &'static str,
        item: &R,
        action: ConflictAction,
    ) -> MirrorResult<i64> {
        let key_column = R::CONFLICT_KEY.first().copied().ok_or_else(|| {
            MirrorError::Internal(format!("{} has no conflict key", R::TABLE))
        })?;
        let qb = BatchUpsert::for_row::<R>()
            .on_conflict(action)
            .returning(key_column)
            .build(&[item.values()])?;

        self.storage
            .write_tx(op, move |conn| {
                Box::pin(async move {
                    let mut qb = qb;
                    let row = qb.build().fetch_one(&mut *conn).await?;
                    row.try_get::<i64, _>(0)
                })
            })
            .await
    }

    async fn upsert_batch<R: UpsertRow + Sync>(
        &self,
        op: &'static str,
        items: &[R],
        action: ConflictAction,
    ) -> MirrorResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        // Built up front so a malformed batch never opens a transaction.
        let statements = BatchUpsert::for_row::<R>()
            .on_conflict(action)
            .build_chunked(&rows_of(items))?;
        let rows = items.len();
        let chunks = statements.len();

        self.storage
            .write_tx(op, move |conn| {
                Box::pin(async move {
                    for mut qb in statements {
                        qb.build().execute(&mut *conn).await?;
                    }
                    Ok(())
                })
            })
            .await?;

        tracing::debug!(op, rows, chunks, "batch written");
        Ok(())
    }

    fn map_project(row: PgRow) -> Result<Project, sqlx::Error> {
        Ok(Project {
            jira_id: row.try_get("jira_id")?,
            key: row.try_get("key")?,
            name: row.try_get("name")?,
            url: row.try_get("url")?,
        })
    }

    fn map_author(row: PgRow) -> Result<Author, sqlx::Error> {
        Ok(Author {
            jira_id: row.try_get("jira_id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
        })
    }

    fn map_issue(row: PgRow) -> Result<Issue, sqlx::Error> {
        Ok(Issue {
            jira_id: row.try_get("jira_id")?,
            project_id: row.try_get("project_id")?,
            key: row.try_get("key")?,
            summary: row.try_get("summary")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            created_time: row.try_get("created_time")?,
            updated_time: row.try_get("updated_time")?,
            closed_time: row.try_get("closed_time")?,
            time_spent: row.try_get("time_spent")?,
            creator_id: row.try_get("creator_id")?,
            assignee_id: row.try_get("assignee_id")?,
        })
    }

    fn map_status_change(row: PgRow) -> Result<StatusChange, sqlx::Error> {
        Ok(StatusChange {
            id: Some(row.try_get("id")?),
            issue_id: row.try_get("issue_id")?,
            old_status: row.try_get("old_status")?,
            new_status: row.try_get("new_status")?,
            change_time: row.try_get("change_time")?,
        })
    }
}

#[async_trait]
impl TrackerWriter for PgTrackerRepository {
    async fn upsert_project(&self, project: &Project) -> MirrorResult<i64> {
        self.upsert_one("upsert project", project, UPDATE_ALL)
            .await
            .map_err(|e| context(e, &format!("project {}", project.jira_id)))
    }

    async fn upsert_author(&self, author: &Author) -> MirrorResult<i64> {
        self.upsert_one("upsert author", author, UPDATE_ALL)
            .await
            .map_err(|e| context(e, &format!("author {}", author.jira_id)))
    }

    async fn upsert_issue(&self, issue: &Issue) -> MirrorResult<i64> {
        self.upsert_one("upsert issue", issue, ISSUE_CONFLICT)
            .await
            .map_err(|e| context(e, &format!("issue {}", issue.key)))
    }

    async fn upsert_authors(&self, authors: &[Author]) -> MirrorResult<()> {
        self.upsert_batch("upsert authors", authors, UPDATE_ALL).await
    }

    async fn upsert_issues(&self, issues: &[Issue]) -> MirrorResult<()> {
        self.upsert_batch("upsert issues", issues, ISSUE_CONFLICT).await
    }

    async fn insert_status_changes(&self, changes: &[StatusChange]) -> MirrorResult<()> {
        self.upsert_batch("insert status changes", changes, ConflictAction::DoNothing)
            .await
    }
}

#[async_trait]
impl TrackerReader for PgTrackerRepository {
    async fn list_projects(&self) -> MirrorResult<Vec<Project>> {
        self.storage
            .read("list projects", |pool| async move {
                sqlx::query("select jira_id, key, name, url from project order by key")
                    .fetch_all(&pool)
                    .await?
                    .into_iter()
                    .map(PgTrackerRepository::map_project)
                    .collect()
            })
            .await
    }

    async fn get_project_by_key(&self, key: &str) -> MirrorResult<Option<Project>> {
        self.storage
            .read("get project by key", |pool| {
                let key = key.to_owned();
                async move {
                    sqlx::query("select jira_id, key, name, url from project where key = $1")
                        .bind(key)
                        .fetch_optional(&pool)
                        .await?
                        .map(PgTrackerRepository::map_project)
                        .transpose()
                }
            })
            .await
    }

    async fn get_author(&self, jira_id: i64) -> MirrorResult<Option<Author>> {
        self.storage
            .read("get author", |pool| async move {
                sqlx::query("select jira_id, username, email from author where jira_id = $1")
                    .bind(jira_id)
                    .fetch_optional(&pool)
                    .await?
                    .map(PgTrackerRepository::map_author)
                    .transpose()
            })
            .await
    }

    async fn list_issues_by_project(&self, project_id: i64) -> MirrorResult<Vec<Issue>> {
        self.storage
            .read("list issues by project", |pool| async move {
                sqlx::query(
                    "select jira_id, project_id, key, summary, status, priority, created_time,
                            updated_time, closed_time, time_spent, creator_id, assignee_id
                     from issue
                     where project_id = $1
                     order by created_time asc",
                )
                .bind(project_id)
                .fetch_all(&pool)
                .await?
                .into_iter()
                .map(PgTrackerRepository::map_issue)
                .collect()
            })
            .await
    }

    async fn list_status_changes_by_issue(&self, issue_id: i64) -> MirrorResult<Vec<StatusChange>> {
        self.storage
            .read("list status changes", |pool| async move {
                sqlx::query(
                    "select id, issue_id, old_status, new_status, change_time
                     from status_change
                     where issue_id = $1
                     order by change_time asc, id asc",
                )
                .bind(issue_id)
                .fetch_all(&pool)
                .await?
                .into_iter()
                .map(PgTrackerRepository::map_status_change)
                .collect()
            })
            .await
    }
}

fn context(err: MirrorError, subject: &str) -> MirrorError {
    match err {
        MirrorError::Database(msg) => MirrorError::Database(format!("{subject}: {msg}")),
        other => other,
    }
}
