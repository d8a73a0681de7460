use thiserror::Error;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    /// Replica reads failed and the primary fallback failed too.
    #[error("read failed on replica and primary: {0}")]
    ReplicaUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The remote tracker failed or answered with something unusable.
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl MirrorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type MirrorResult<T> = Result<T, MirrorError>;
