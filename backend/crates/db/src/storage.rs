use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::retry::{read_with_fallback, ReadError, ReadRetryPolicy};
use mirror_common::error::{MirrorError, MirrorResult};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Primary/replica pair. Reads prefer the replica and fall back to the
/// primary; writes only ever run inside a primary transaction.
#[derive(Clone)]
pub struct Storage {
    primary: PgPool,
    replica: PgPool,
    read_policy: ReadRetryPolicy,
    shutdown: CancellationToken,
    span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct HandleHealth {
    pub reachable: bool,
    /// `true` when the server is a hot standby. `None` if it did not answer.
    pub in_recovery: Option<bool>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub primary: HandleHealth,
    pub replica: HandleHealth,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.primary.reachable && self.replica.reachable
    }
}

impl Storage {
    pub fn new(primary: PgPool, replica: PgPool, span: Span) -> Self {
        Self {
            primary,
            replica,
            read_policy: ReadRetryPolicy::default(),
            shutdown: CancellationToken::new(),
            span,
        }
    }

    pub fn with_read_policy(mut self, policy: ReadRetryPolicy) -> Self {
        self.read_policy = policy;
        self
    }

    /// Reads and their backoff sleeps abort once `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn primary(&self) -> &PgPool {
        &self.primary
    }

    /// Run `query` against the replica, retrying with linear backoff, then
    /// once against the primary.
    pub async fn read<T, F, Fut>(&self, op: &str, query: F) -> MirrorResult<T>
    where
        F: Fn(PgPool) -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let replica = self.replica.clone();
        let primary = self.primary.clone();

        read_with_fallback(
            self.read_policy,
            &self.shutdown,
            || query(replica.clone()),
            || query(primary.clone()),
        )
        .instrument(self.span.clone())
        .await
        .map_err(|e| match e {
            ReadError::Cancelled => MirrorError::Cancelled,
            ReadError::Failed { replica, primary } => {
                tracing::error!(parent: &self.span, op, %replica, %primary, "read failed on both handles");
                MirrorError::ReplicaUnavailable(format!(
                    "{op}: primary: {primary} (replica: {replica})"
                ))
            }
        })
    }

    /// Run `work` inside one primary transaction.
    ///
    /// Commits when `work` returns `Ok`, rolls back on `Err`. If `work` panics
    /// the transaction is rolled back first and the panic then resumes.
    pub async fn write_tx<T, F>(&self, op: &str, work: F) -> MirrorResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, sqlx::Error>> + Send,
    {
        let mut tx = self
            .primary
            .begin()
            .await
            .map_err(|e| MirrorError::Database(format!("{op}: begin transaction: {e}")))?;

        let outcome = AssertUnwindSafe(work(&mut *tx)).catch_unwind().await;

        match outcome {
            Ok(Ok(value)) => {
                tx.commit()
                    .await
                    .map_err(|e| MirrorError::Database(format!("{op}: commit: {e}")))?;
                Ok(value)
            }
            Ok(Err(err)) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(parent: &self.span, op, error = %rollback_err, "rollback failed");
                }
                Err(MirrorError::Database(format!("{op}: {err}")))
            }
            Err(panic) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(parent: &self.span, op, error = %rollback_err, "rollback after panic failed");
                }
                tracing::error!(parent: &self.span, op, "write panicked, transaction rolled back");
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Ping both handles concurrently. Failures are reported, never retried.
    pub async fn health(&self) -> HealthReport {
        let (primary, replica) = tokio::join!(probe(&self.primary), probe(&self.replica));
        HealthReport { primary, replica }
    }
}

async fn probe(pool: &PgPool) -> HandleHealth {
    let started = Instant::now();
    let outcome = tokio::time::timeout(
        HEALTH_TIMEOUT,
        sqlx::query_scalar::<_, bool>("select pg_is_in_recovery()").fetch_one(pool),
    )
    .await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(in_recovery)) => HandleHealth {
            reachable: true,
            in_recovery: Some(in_recovery),
            latency_ms,
            error: None,
        },
        Ok(Err(e)) => HandleHealth {
            reachable: false,
            in_recovery: None,
            latency_ms,
            error: Some(e.to_string()),
        },
        Err(_) => HandleHealth {
            reachable: false,
            in_recovery: None,
            latency_ms,
            error: Some(format!("no answer within {}ms", HEALTH_TIMEOUT.as_millis())),
        },
    }
}
