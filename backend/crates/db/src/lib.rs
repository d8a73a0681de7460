pub mod batch;
pub mod retry;
pub mod schema;
pub mod storage;
pub mod tracker;

use std::time::Duration;

use mirror_common::error::{MirrorError, MirrorResult};
use mirror_config::PoolSettings;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(3);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a Postgres connection pool from a database URL.
///
/// The first connection is retried up to `settings.connect_attempts` times,
/// three seconds apart, so the service can start before the database does.
pub async fn create_pool(database_url: &str, settings: &PoolSettings) -> MirrorResult<PgPool> {
    let attempts = settings.connect_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        tracing::info!(attempt, attempts, "connecting to database");
        let outcome = PgPoolOptions::new()
            .max_connections(settings.max_open.max(1))
            .min_connections(settings.max_idle)
            .max_lifetime(settings.max_lifetime())
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await;

        match outcome {
            Ok(pool) => return Ok(pool),
            Err(e) => {
                tracing::warn!(attempt, attempts, error = %e, "database connection failed");
                last_err = Some(e);
            }
        }

        if attempt < attempts {
            tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
        }
    }

    Err(MirrorError::Database(format!(
        "could not connect after {attempts} attempts: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}
