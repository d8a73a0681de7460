use sqlx::PgPool;

use mirror_common::error::{MirrorError, MirrorResult};

/// Tables of the replicated tracker data, in dependency order.
///
/// `status_change` uses `nulls not distinct` so a transition to an unlabeled
/// status is deduplicated like any other (Postgres 15+).
pub const STATEMENTS: &[&str] = &[
    "create table if not exists project (
        jira_id bigint primary key,
        key text not null,
        name text not null,
        url text not null
    )",
    "create table if not exists author (
        jira_id bigint primary key,
        username text not null,
        email text
    )",
    "create table if not exists issue (
        jira_id bigint primary key,
        project_id bigint not null references project(jira_id),
        key text not null,
        summary text not null,
        status text not null,
        priority text not null,
        created_time timestamptz not null,
        updated_time timestamptz,
        closed_time timestamptz,
        time_spent bigint,
        creator_id bigint references author(jira_id),
        assignee_id bigint references author(jira_id)
    )",
    "create index if not exists issue_project_idx on issue(project_id)",
    "create table if not exists status_change (
        id bigserial primary key,
        issue_id bigint not null references issue(jira_id),
        old_status text,
        new_status text,
        change_time timestamptz not null,
        constraint status_change_dedup unique nulls not distinct (issue_id, change_time, new_status)
    )",
];

/// Create any missing tables on the primary.
pub async fn apply(primary: &PgPool) -> MirrorResult<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(primary)
            .await
            .map_err(|e| MirrorError::Database(format!("apply schema: {e}")))?;
    }
    tracing::info!(statements = STATEMENTS.len(), "schema applied");
    Ok(())
}
