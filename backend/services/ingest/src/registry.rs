use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::jira::project_sync::{SyncError, SyncReport, SyncStage};

/// How the most recent sync of a project ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed { report: SyncReport },
    Failed { stage: Option<SyncStage>, error: String },
    Cancelled,
}

impl From<&Result<SyncReport, SyncError>> for SyncOutcome {
    fn from(result: &Result<SyncReport, SyncError>) -> Self {
        match result {
            Ok(report) => Self::Completed {
                report: report.clone(),
            },
            Err(e) if e.is_cancelled() => Self::Cancelled,
            Err(e) => Self::Failed {
                stage: e.stage(),
                error: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub project: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<SyncOutcome>,
}

#[derive(Debug, Default)]
struct Entry {
    running: Option<(CancellationToken, DateTime<Utc>)>,
    finished_at: Option<DateTime<Utc>>,
    last: Option<SyncOutcome>,
}

/// Tracks running and finished syncs per project key. At most one sync
/// runs per project; every sync token is a child of the shutdown token.
#[derive(Clone)]
pub struct SyncRegistry {
    shutdown: CancellationToken,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl SyncRegistry {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `project` for a new sync. Returns `None` while one is running.
    pub fn try_start(&self, project: &str) -> Option<CancellationToken> {
        let mut entries = self.lock();
        let entry = entries.entry(project.to_owned()).or_default();
        if entry.running.is_some() {
            return None;
        }
        let token = self.shutdown.child_token();
        entry.running = Some((token.clone(), Utc::now()));
        Some(token)
    }

    pub fn finish(&self, project: &str, result: &Result<SyncReport, SyncError>) {
        let mut entries = self.lock();
        let entry = entries.entry(project.to_owned()).or_default();
        entry.running = None;
        entry.finished_at = Some(Utc::now());
        entry.last = Some(SyncOutcome::from(result));
    }

    /// Signal a running sync to stop. Returns `false` if none is running.
    pub fn cancel(&self, project: &str) -> bool {
        match self.lock().get(project).and_then(|e| e.running.as_ref()) {
            Some((token, _)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn status(&self, project: &str) -> Option<SyncStatus> {
        self.lock().get(project).map(|entry| SyncStatus {
            project: project.to_owned(),
            running: entry.running.is_some(),
            started_at: entry.running.as_ref().map(|(_, at)| *at),
            finished_at: entry.finished_at,
            last: entry.last.clone(),
        })
    }

    pub fn running(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, e)| e.running.is_some())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}
