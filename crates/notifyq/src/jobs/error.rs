use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The row changed (or vanished) since this copy was read.
    #[error("job {id} was modified concurrently (stale version {version})")]
    StaleVersion { id: i64, version: i64 },

    #[error("job payload could not be encoded: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl QueueError {
    pub fn is_stale(&self) -> bool {
        matches!(self, QueueError::StaleVersion { .. })
    }
}
