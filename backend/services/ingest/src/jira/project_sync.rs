use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use super::client::{FetchError, JiraClient};
use super::models::JiraSearchPage;
use super::transform::{issue_authors, to_issue_and_history, to_project, TransformError};
use mirror_common::error::{MirrorError, MirrorResult};
use mirror_config::env::parse_var_or;
use mirror_db::tracker::models::{Author, Issue, StatusChange};
use mirror_db::tracker::repositories::TrackerWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Page fetches in flight at once for one project.
    pub thread_count: usize,
    pub page_size: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            thread_count: 4,
            page_size: 50,
        }
    }
}

impl SyncSettings {
    pub fn from_env() -> MirrorResult<Self> {
        let defaults = Self::default();
        let settings = Self {
            thread_count: parse_var_or("SYNC_THREAD_COUNT", defaults.thread_count)?,
            page_size: parse_var_or("SYNC_PAGE_SIZE", defaults.page_size)?,
        };
        if settings.thread_count == 0 {
            return Err(MirrorError::Config("SYNC_THREAD_COUNT must be at least 1".into()));
        }
        if settings.page_size == 0 {
            return Err(MirrorError::Config("SYNC_PAGE_SIZE must be at least 1".into()));
        }
        Ok(settings)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Discovery,
    Paging,
    Persist,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discovery => "discovery",
            Self::Paging => "paging",
            Self::Persist => "persist",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("sync cancelled")]
    Cancelled,

    #[error("project {0} not found in remote tracker")]
    UnknownProject(String),

    #[error("{stage} failed: {source}")]
    Fetch {
        stage: SyncStage,
        #[source]
        source: FetchError,
    },

    #[error("{stage} failed: {source}")]
    Transform {
        stage: SyncStage,
        #[source]
        source: TransformError,
    },

    #[error("page at offset {offset}: all {records} records failed to transform, first: {first}")]
    SchemaDrift {
        offset: u32,
        records: usize,
        first: TransformError,
    },

    #[error("{stage} failed: {source}")]
    Storage {
        stage: SyncStage,
        #[source]
        source: MirrorError,
    },
}

impl SyncError {
    /// Stage the sync stopped in; `None` for a cancelled sync.
    pub fn stage(&self) -> Option<SyncStage> {
        match self {
            Self::Cancelled => None,
            Self::UnknownProject(_) => Some(SyncStage::Discovery),
            Self::SchemaDrift { .. } => Some(SyncStage::Paging),
            Self::Fetch { stage, .. } | Self::Transform { stage, .. } | Self::Storage { stage, .. } => {
                Some(*stage)
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    fn fetch(stage: SyncStage, source: FetchError) -> Self {
        if source.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Fetch { stage, source }
        }
    }

    fn storage(stage: SyncStage, source: MirrorError) -> Self {
        if source.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Storage { stage, source }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub project: String,
    pub project_id: i64,
    pub pages: usize,
    pub issues: usize,
    pub authors: usize,
    pub status_changes: usize,
    pub skipped_records: usize,
    pub duration_ms: u64,
}

/// Transformed contents of one fetched page.
#[derive(Debug)]
struct PageResult {
    total: u32,
    max_results: u32,
    issues: Vec<(Issue, Vec<StatusChange>)>,
    authors: Vec<Author>,
    skipped: usize,
}

/// Everything collected for one project before it is written.
#[derive(Debug, Default)]
struct SyncBatch {
    pages: usize,
    skipped: usize,
    authors: BTreeMap<i64, Author>,
    issues: BTreeMap<i64, Issue>,
    history: BTreeMap<i64, Vec<StatusChange>>,
}

impl SyncBatch {
    fn merge(&mut self, page: PageResult) {
        self.pages += 1;
        self.skipped += page.skipped;
        for author in page.authors {
            self.authors.insert(author.jira_id, author);
        }
        // An issue that moved between pages mid-sync keeps its latest copy.
        for (issue, changes) in page.issues {
            self.history.insert(issue.jira_id, changes);
            self.issues.insert(issue.jira_id, issue);
        }
    }
}

/// Offsets of the pages after the first, given the reported total.
pub fn remaining_offsets(total: u32, page_size: u32) -> Vec<u32> {
    if page_size == 0 {
        return Vec::new();
    }
    (1..total.div_ceil(page_size)).map(|page| page * page_size).collect()
}

/// Pulls every issue of one project, page by page with a bounded number
/// of fetches in flight, and writes the merged result.
pub struct ProjectSyncer<W> {
    client: JiraClient,
    writer: W,
    settings: SyncSettings,
    span: Span,
}

impl<W> ProjectSyncer<W>
where
    W: TrackerWriter,
{
    pub fn new(client: JiraClient, writer: W, settings: SyncSettings, span: Span) -> Self {
        Self {
            client,
            writer,
            settings,
            span,
        }
    }

    pub fn client(&self) -> &JiraClient {
        &self.client
    }

    pub async fn sync_project(
        &self,
        project_key: &str,
        cancel: CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let span = tracing::info_span!(parent: &self.span, "project_sync", project = project_key);
        let started = Instant::now();

        let outcome = self.run(project_key, &cancel, started).instrument(span.clone()).await;
        match &outcome {
            Ok(report) => tracing::info!(
                parent: &span,
                pages = report.pages,
                issues = report.issues,
                authors = report.authors,
                status_changes = report.status_changes,
                skipped = report.skipped_records,
                duration_ms = report.duration_ms,
                "project sync completed"
            ),
            Err(SyncError::Cancelled) => tracing::info!(parent: &span, "project sync cancelled"),
            Err(e) => tracing::error!(
                parent: &span,
                stage = ?e.stage(),
                error = %e,
                "project sync failed"
            ),
        }
        outcome
    }

    async fn run(
        &self,
        project_key: &str,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<SyncReport, SyncError> {
        let project_id = self.discover(project_key, cancel).await?;
        let page_size = self.settings.page_size;

        let first = self.fetch_page(project_key, project_id, 0, page_size, cancel).await?;
        let total = first.total;
        // The server may cap maxResults below what was asked for.
        let stride = match first.max_results {
            0 => page_size,
            reported => reported.min(page_size),
        };
        let offsets = remaining_offsets(total, stride);
        tracing::debug!(total, stride, remaining = offsets.len(), "paging project");

        let mut batch = SyncBatch::default();
        batch.merge(first);

        let mut pages = stream::iter(offsets)
            .map(|offset| self.fetch_page(project_key, project_id, offset, stride, cancel))
            .buffer_unordered(self.settings.thread_count.max(1));

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                next = pages.next() => next,
            };
            match next {
                Some(page) => batch.merge(page?),
                None => break,
            }
        }
        drop(pages);

        let mut report = SyncReport {
            project: project_key.to_owned(),
            project_id,
            pages: batch.pages,
            issues: batch.issues.len(),
            authors: batch.authors.len(),
            status_changes: batch.history.values().map(Vec::len).sum(),
            skipped_records: batch.skipped,
            duration_ms: 0,
        };

        self.persist(batch, cancel).await?;

        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Find the project in the remote tracker and upsert it.
    async fn discover(&self, project_key: &str, cancel: &CancellationToken) -> Result<i64, SyncError> {
        let projects = self
            .client
            .list_projects(cancel)
            .await
            .map_err(|e| SyncError::fetch(SyncStage::Discovery, e))?;

        let remote = projects
            .iter()
            .find(|p| p.key.eq_ignore_ascii_case(project_key))
            .ok_or_else(|| SyncError::UnknownProject(project_key.to_owned()))?;
        let project = to_project(remote).map_err(|source| SyncError::Transform {
            stage: SyncStage::Discovery,
            source,
        })?;

        guarded(cancel, self.writer.upsert_project(&project))
            .await
            .map_err(|e| SyncError::storage(SyncStage::Discovery, e))
    }

    async fn fetch_page(
        &self,
        project_key: &str,
        project_id: i64,
        offset: u32,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> Result<PageResult, SyncError> {
        let page = self
            .client
            .fetch_issue_page(project_key, offset, page_size, cancel)
            .await
            .map_err(|e| SyncError::fetch(SyncStage::Paging, e))?;
        let result = transform_page(page, project_id, offset)?;
        tracing::debug!(
            offset,
            issues = result.issues.len(),
            skipped = result.skipped,
            "page fetched"
        );
        Ok(result)
    }

    /// Authors first, then issues, then status changes: each step's rows
    /// are referenced by the next.
    async fn persist(&self, batch: SyncBatch, cancel: &CancellationToken) -> Result<(), SyncError> {
        let authors: Vec<Author> = batch.authors.into_values().collect();
        let issues: Vec<Issue> = batch.issues.into_values().collect();
        let changes: Vec<StatusChange> = batch.history.into_values().flatten().collect();

        let stage = SyncStage::Persist;
        guarded(cancel, self.writer.upsert_authors(&authors))
            .await
            .map_err(|e| SyncError::storage(stage, e))?;
        guarded(cancel, self.writer.upsert_issues(&issues))
            .await
            .map_err(|e| SyncError::storage(stage, e))?;
        guarded(cancel, self.writer.insert_status_changes(&changes))
            .await
            .map_err(|e| SyncError::storage(stage, e))?;
        Ok(())
    }
}

async fn guarded<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = MirrorResult<T>>,
) -> MirrorResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MirrorError::Cancelled),
        outcome = work => outcome,
    }
}

/// Bad records are logged and skipped. A page whose records all fail means
/// the payload no longer matches what we expect.
fn transform_page(page: JiraSearchPage, project_id: i64, offset: u32) -> Result<PageResult, SyncError> {
    let records = page.issues.len();
    let mut issues = Vec::with_capacity(records);
    let mut authors = Vec::new();
    let mut first_error = None;
    let mut skipped = 0;

    for wire in &page.issues {
        match to_issue_and_history(wire, project_id) {
            Ok(mapped) => {
                authors.extend(issue_authors(wire));
                issues.push(mapped);
            }
            Err(e) => {
                tracing::warn!(offset, error = %e, "skipping record");
                skipped += 1;
                first_error.get_or_insert(e);
            }
        }
    }

    if records > 0 && issues.is_empty() {
        if let Some(first) = first_error {
            return Err(SyncError::SchemaDrift {
                offset,
                records,
                first,
            });
        }
    }

    Ok(PageResult {
        total: page.total,
        max_results: page.max_results,
        issues,
        authors,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jira::client::JiraClientConfig;
    use crate::jira::models::JiraIssue;
    use crate::jira::transform::author_id;
    use async_trait::async_trait;
    use mirror_db::tracker::models::Project;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Project(i64),
        Authors(Vec<String>),
        Issues(Vec<String>),
        StatusChanges(usize),
    }

    /// Records every write. Optionally fails the issue batch.
    #[derive(Clone, Default)]
    struct MockWriter {
        calls: Arc<Mutex<Vec<Call>>>,
        fail_issues: bool,
    }

    impl MockWriter {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TrackerWriter for MockWriter {
        async fn upsert_project(&self, project: &Project) -> MirrorResult<i64> {
            self.calls.lock().unwrap().push(Call::Project(project.jira_id));
            Ok(project.jira_id)
        }

        async fn upsert_author(&self, author: &Author) -> MirrorResult<i64> {
            Ok(author.jira_id)
        }

        async fn upsert_issue(&self, issue: &Issue) -> MirrorResult<i64> {
            Ok(issue.jira_id)
        }

        async fn upsert_authors(&self, authors: &[Author]) -> MirrorResult<()> {
            let names = authors.iter().map(|a| a.username.clone()).collect();
            self.calls.lock().unwrap().push(Call::Authors(names));
            Ok(())
        }

        async fn upsert_issues(&self, issues: &[Issue]) -> MirrorResult<()> {
            if self.fail_issues {
                return Err(MirrorError::Database("issue_creator_id_fkey".to_string()));
            }
            let keys = issues.iter().map(|i| i.key.clone()).collect();
            self.calls.lock().unwrap().push(Call::Issues(keys));
            Ok(())
        }

        async fn insert_status_changes(&self, changes: &[StatusChange]) -> MirrorResult<()> {
            self.calls.lock().unwrap().push(Call::StatusChanges(changes.len()));
            Ok(())
        }
    }

    fn wire_issue(n: u32) -> serde_json::Value {
        serde_json::json!({
            "id": (20000 + n).to_string(),
            "key": format!("DEV-{n}"),
            "fields": {
                "summary": format!("issue {n}"),
                "status": {"name": "Done"},
                "priority": {"name": "Major"},
                "created": "2024-03-01T09:00:00.000+0000",
                "creator": {"name": "alice", "emailAddress": "alice@example.com"},
                "assignee": {"name": format!("dev{}", n % 3)}
            },
            "changelog": {"histories": [{
                "created": "2024-03-02T10:00:00.000+0000",
                "items": [{"field": "status", "fromString": "Open", "toString": "Done"}]
            }]}
        })
    }

    fn page_body(offset: u32, page_size: u32, total: u32) -> serde_json::Value {
        let end = (offset + page_size).min(total);
        let issues: Vec<_> = (offset..end).map(wire_issue).collect();
        serde_json::json!({"startAt": offset, "maxResults": page_size, "total": total, "issues": issues})
    }

    async fn mount_project(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/project"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "10000", "key": "DEV", "name": "Development", "self": "http://jira/project/10000"},
                {"id": "10001", "key": "OPS", "name": "Operations", "self": "http://jira/project/10001"}
            ])))
            .mount(server)
            .await;
    }

    async fn mount_pages(server: &MockServer, total: u32, page_size: u32) {
        let mut offset = 0;
        loop {
            Mock::given(method("GET"))
                .and(path("/search"))
                .and(query_param("startAt", offset.to_string()))
                .respond_with(ResponseTemplate::new(200).set_body_json(page_body(offset, page_size, total)))
                .expect(1)
                .mount(server)
                .await;
            offset += page_size;
            if offset >= total {
                break;
            }
        }
    }

    fn syncer(server: &MockServer, writer: MockWriter, settings: SyncSettings) -> ProjectSyncer<MockWriter> {
        let config = JiraClientConfig {
            base_url: server.uri(),
            email: None,
            api_token: None,
            timeout_secs: 5,
            min_sleep: Duration::from_millis(5),
            max_sleep: Duration::from_millis(20),
        };
        let client = JiraClient::new(config, Span::none()).unwrap();
        ProjectSyncer::new(client, writer, settings, Span::none())
    }

    #[test]
    fn remaining_offsets_cover_total() {
        assert_eq!(remaining_offsets(250, 100), vec![100, 200]);
        assert_eq!(remaining_offsets(200, 100), vec![100]);
        assert_eq!(remaining_offsets(100, 100), Vec::<u32>::new());
        assert_eq!(remaining_offsets(0, 100), Vec::<u32>::new());
    }

    #[test]
    fn settings_reject_zero_threads() {
        std::env::set_var("SYNC_THREAD_COUNT", "0");
        let result = SyncSettings::from_env();
        std::env::remove_var("SYNC_THREAD_COUNT");
        assert!(matches!(result, Err(MirrorError::Config(_))));
    }

    #[tokio::test]
    async fn pages_through_whole_project() {
        let server = MockServer::start().await;
        mount_project(&server).await;
        mount_pages(&server, 250, 100).await;

        let writer = MockWriter::default();
        let settings = SyncSettings {
            thread_count: 2,
            page_size: 100,
        };
        let report = syncer(&server, writer.clone(), settings)
            .sync_project("DEV", CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.pages, 3);
        assert_eq!(report.issues, 250);
        assert_eq!(report.status_changes, 250);
        assert_eq!(report.project_id, 10000);
        // alice plus dev0..dev2
        assert_eq!(report.authors, 4);
    }

    #[tokio::test]
    async fn author_seen_on_every_page_is_written_once() {
        let server = MockServer::start().await;
        mount_project(&server).await;
        mount_pages(&server, 30, 10).await;

        let writer = MockWriter::default();
        let settings = SyncSettings {
            thread_count: 3,
            page_size: 10,
        };
        syncer(&server, writer.clone(), settings)
            .sync_project("DEV", CancellationToken::new())
            .await
            .unwrap();

        let authors: Vec<String> = writer
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Authors(names) => Some(names),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(authors.iter().filter(|n| n.as_str() == "alice").count(), 1);
    }

    #[tokio::test]
    async fn writes_in_dependency_order() {
        let server = MockServer::start().await;
        mount_project(&server).await;
        mount_pages(&server, 5, 10).await;

        let writer = MockWriter::default();
        syncer(&server, writer.clone(), SyncSettings::default())
            .sync_project("DEV", CancellationToken::new())
            .await
            .unwrap();

        let calls = writer.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0], Call::Project(10000));
        assert!(matches!(calls[1], Call::Authors(_)));
        assert!(matches!(calls[2], Call::Issues(ref keys) if keys.len() == 5));
        assert_eq!(calls[3], Call::StatusChanges(5));
    }

    #[tokio::test]
    async fn empty_project_completes_without_rows() {
        let server = MockServer::start().await;
        mount_project(&server).await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(0, 50, 0)))
            .expect(1)
            .mount(&server)
            .await;

        let report = syncer(&server, MockWriter::default(), SyncSettings::default())
            .sync_project("DEV", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.pages, 1);
        assert_eq!(report.issues, 0);
    }

    #[tokio::test]
    async fn short_page_before_the_end_is_accepted() {
        let server = MockServer::start().await;
        mount_project(&server).await;
        let short = serde_json::json!({
            "startAt": 0, "maxResults": 10, "total": 15,
            "issues": (0..4).map(wire_issue).collect::<Vec<_>>()
        });
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("startAt", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(short))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("startAt", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(10, 10, 15)))
            .expect(1)
            .mount(&server)
            .await;

        let settings = SyncSettings {
            thread_count: 2,
            page_size: 10,
        };
        let report = syncer(&server, MockWriter::default(), settings)
            .sync_project("DEV", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(report.issues, 9);
    }

    #[tokio::test]
    async fn unknown_project_fails_discovery() {
        let server = MockServer::start().await;
        mount_project(&server).await;

        let err = syncer(&server, MockWriter::default(), SyncSettings::default())
            .sync_project("NOPE", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownProject(_)));
        assert_eq!(err.stage(), Some(SyncStage::Discovery));
    }

    #[tokio::test]
    async fn bad_record_is_skipped() {
        let server = MockServer::start().await;
        mount_project(&server).await;
        let mut broken = wire_issue(1);
        broken["fields"]["created"] = serde_json::json!("not a date");
        let body = serde_json::json!({
            "startAt": 0, "maxResults": 50, "total": 2,
            "issues": [wire_issue(0), broken]
        });
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let report = syncer(&server, MockWriter::default(), SyncSettings::default())
            .sync_project("DEV", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.issues, 1);
        assert_eq!(report.skipped_records, 1);
    }

    #[tokio::test]
    async fn page_of_only_bad_records_fails_paging() {
        let server = MockServer::start().await;
        mount_project(&server).await;
        let mut broken = wire_issue(1);
        broken["id"] = serde_json::json!("abc");
        let body = serde_json::json!({"startAt": 0, "maxResults": 50, "total": 1, "issues": [broken]});
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let writer = MockWriter::default();
        let err = syncer(&server, writer.clone(), SyncSettings::default())
            .sync_project("DEV", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SchemaDrift { records: 1, .. }));
        assert_eq!(err.stage(), Some(SyncStage::Paging));
        assert_eq!(writer.calls(), vec![Call::Project(10000)]);
    }

    #[tokio::test]
    async fn fetch_failure_reports_paging_stage() {
        let server = MockServer::start().await;
        mount_project(&server).await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = syncer(&server, MockWriter::default(), SyncSettings::default())
            .sync_project("DEV", CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(SyncStage::Paging));
        assert!(!err.is_cancelled());
    }

    #[tokio::test]
    async fn storage_failure_reports_persist_stage() {
        let server = MockServer::start().await;
        mount_project(&server).await;
        mount_pages(&server, 3, 10).await;

        let writer = MockWriter {
            fail_issues: true,
            ..MockWriter::default()
        };
        let err = syncer(&server, writer.clone(), SyncSettings::default())
            .sync_project("DEV", CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(SyncStage::Persist));
        assert!(err.to_string().contains("issue_creator_id_fkey"));
        // authors were committed before the failure and stay written
        assert!(writer.calls().iter().any(|c| matches!(c, Call::Authors(_))));
        assert!(!writer.calls().iter().any(|c| matches!(c, Call::StatusChanges(_))));
    }

    #[tokio::test]
    async fn cancellation_stops_sync_without_writes() {
        let server = MockServer::start().await;
        mount_project(&server).await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(page_body(0, 50, 10))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let writer = MockWriter::default();
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let err = syncer(&server, writer.clone(), SyncSettings::default())
            .sync_project("DEV", token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.stage(), None);
        assert_eq!(writer.calls(), vec![Call::Project(10000)]);
    }

    #[test]
    fn merge_keeps_one_copy_per_issue_and_author() {
        let (issue, changes) = to_issue_and_history(
            &serde_json::from_value::<JiraIssue>(wire_issue(7)).unwrap(),
            10000,
        )
        .unwrap();
        let alice = Author {
            jira_id: author_id("alice"),
            username: "alice".to_string(),
            email: None,
        };
        let page = || PageResult {
            total: 1,
            max_results: 50,
            issues: vec![(issue.clone(), changes.clone())],
            authors: vec![alice.clone()],
            skipped: 0,
        };

        let mut batch = SyncBatch::default();
        batch.merge(page());
        batch.merge(page());
        assert_eq!(batch.pages, 2);
        assert_eq!(batch.issues.len(), 1);
        assert_eq!(batch.authors.len(), 1);
        assert_eq!(batch.history.values().map(Vec::len).sum::<usize>(), 1);
    }
}
