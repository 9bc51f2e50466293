use thiserror::Error;

/// Structured error kinds for sync operations.
///
/// The job driver retries whatever a sync returns; the kind is kept so the
/// operation log and the aggregate report can tell a bad bind from a dead
/// connection.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream query failed: {0}")]
    UpstreamQuery(String),

    #[error("local store error: {0}")]
    LocalStore(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("notifier error: {0}")]
    Notify(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Prefix the message with call-site context, preserving the kind.
    pub fn context(self, ctx: &str) -> SyncError {
        match self {
            SyncError::InvalidInput(m) => SyncError::InvalidInput(format!("{ctx}: {m}")),
            SyncError::UpstreamUnavailable(m) => {
                SyncError::UpstreamUnavailable(format!("{ctx}: {m}"))
            }
            SyncError::UpstreamQuery(m) => SyncError::UpstreamQuery(format!("{ctx}: {m}")),
            SyncError::LocalStore(m) => SyncError::LocalStore(format!("{ctx}: {m}")),
            SyncError::Cancelled(m) => SyncError::Cancelled(format!("{ctx}: {m}")),
            SyncError::Notify(m) => SyncError::Notify(format!("{ctx}: {m}")),
            SyncError::Config(m) => SyncError::Config(format!("{ctx}: {m}")),
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::LocalStore(err.to_string())
    }
}

/// Helper to add context to local database operations.
pub fn db_context(operation: &str, err: sqlx::Error) -> SyncError {
    SyncError::LocalStore(format!("{}: {}", operation, err))
}

/// Classify an upstream driver error: connection-shaped failures are
/// transient and retryable, everything else is a query/binding problem.
pub fn classify_upstream(operation: &str, err: sqlx::Error) -> SyncError {
    let msg = format!("{}: {}", operation, err);
    let lower = msg.to_lowercase();
    let is_transient = lower.contains("connection")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("pool")
        || lower.contains("network")
        || lower.contains("broken pipe");
    if is_transient {
        SyncError::UpstreamUnavailable(msg)
    } else {
        SyncError::UpstreamQuery(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_preserves_kind() {
        let err = SyncError::UpstreamQuery("bad bind".into()).context("batch 0..100 of BR1");
        match err {
            SyncError::UpstreamQuery(m) => assert!(m.starts_with("batch 0..100 of BR1")),
            other => panic!("kind changed: {other:?}"),
        }
    }

    #[test]
    fn test_classify_transient_vs_query() {
        let transient = classify_upstream("fetch", sqlx::Error::PoolTimedOut);
        assert!(matches!(transient, SyncError::UpstreamUnavailable(_)));

        let query = classify_upstream("fetch", sqlx::Error::RowNotFound);
        assert!(matches!(query, SyncError::UpstreamQuery(_)));
    }
}
