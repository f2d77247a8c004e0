//! Driver and pool error types.

use thiserror::Error;

/// MySQL client error: the server has gone away.
pub const SERVER_GONE_AWAY: i32 = 2006;

/// MySQL client error: lost connection to the server during a query.
pub const SERVER_LOST: i32 = 2013;

/// An error reported by the database driver.
///
/// Drivers map their native failures onto this type. The numeric `code` is
/// what the worker uses to tell a dropped connection apart from a statement
/// that will never succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("database error {code}: {message}")]
pub struct DbError {
    /// Vendor error code.
    pub code: i32,
    /// SQLSTATE, if the driver reports one.
    pub sql_state: Option<String>,
    /// Human-readable message.
    pub message: String,
}

impl DbError {
    /// Create a new driver error.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            sql_state: None,
            message: message.into(),
        }
    }

    /// Attach a SQLSTATE to the error.
    #[must_use]
    pub fn with_sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }

    /// Shorthand for a "server has gone away" error.
    pub fn gone_away(message: impl Into<String>) -> Self {
        Self::new(SERVER_GONE_AWAY, message)
    }

    /// Shorthand for a "lost connection" error.
    pub fn lost_connection(message: impl Into<String>) -> Self {
        Self::new(SERVER_LOST, message)
    }

    /// Check if this error means the connection itself is gone.
    ///
    /// Only the dedicated "gone away" and "lost connection" codes count;
    /// the worker additionally consults `Connection::is_valid()` before
    /// deciding an error is terminal.
    #[must_use]
    pub fn is_connection_loss(&self) -> bool {
        matches!(self.code, SERVER_GONE_AWAY | SERVER_LOST)
    }
}

/// Errors surfaced by the pool, either at construction or through a
/// [`QueryFuture`](crate::future::QueryFuture).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The database rejected the statement. Never retried.
    #[error(transparent)]
    Database(#[from] DbError),

    /// Every retry round ended in a lost connection.
    #[error("query failed after {attempts} retries")]
    RetriesExhausted {
        /// Number of rounds attempted.
        attempts: u32,
        /// The error seen in the final round, if any.
        last_error: Option<DbError>,
    },

    /// Driver or cursor code panicked while the task was being executed.
    #[error("task panicked: {0}")]
    TaskPanicked(String),

    /// The worker holding the task crashed and restarted before answering.
    #[error("worker restarted before the task completed")]
    WorkerRestarted,

    /// The pool was shut down before the task could run.
    #[error("pool is closed")]
    PoolClosed,

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl PoolError {
    /// Check if resubmitting the same statement could plausibly succeed.
    ///
    /// Statement-level database errors are permanent; everything that stems
    /// from connectivity or worker churn is not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(err) => err.is_connection_loss(),
            Self::RetriesExhausted { .. } | Self::WorkerRestarted => true,
            Self::TaskPanicked(_)
            | Self::PoolClosed
            | Self::Configuration(_)
            | Self::Spawn(_) => false,
        }
    }

    /// Get the underlying database error, if there is one.
    #[must_use]
    pub fn db_error(&self) -> Option<&DbError> {
        match self {
            Self::Database(err) => Some(err),
            Self::RetriesExhausted { last_error, .. } => last_error.as_ref(),
            _ => None,
        }
    }

    /// Get the vendor error code, if this wraps a database error.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        self.db_error().map(|err| err.code)
    }
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_loss_codes() {
        assert!(DbError::gone_away("MySQL server has gone away").is_connection_loss());
        assert!(DbError::lost_connection("Lost connection").is_connection_loss());
        assert!(!DbError::new(1064, "You have an error in your SQL syntax").is_connection_loss());
        assert!(!DbError::new(1062, "Duplicate entry").is_connection_loss());
    }

    #[test]
    fn test_db_error_display() {
        let err = DbError::new(1146, "Table 'main.nope' doesn't exist").with_sql_state("42S02");
        assert_eq!(
            err.to_string(),
            "database error 1146: Table 'main.nope' doesn't exist"
        );
        assert_eq!(err.sql_state.as_deref(), Some("42S02"));
    }

    #[test]
    fn test_database_error_is_transparent() {
        let err = PoolError::from(DbError::new(1064, "syntax"));
        assert_eq!(err.to_string(), "database error 1064: syntax");
        assert_eq!(err.code(), Some(1064));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_retries_exhausted_display() {
        let err = PoolError::RetriesExhausted {
            attempts: 3,
            last_error: Some(DbError::gone_away("gone")),
        };
        assert_eq!(err.to_string(), "query failed after 3 retries");
        assert_eq!(err.code(), Some(SERVER_GONE_AWAY));
        assert!(err.is_transient());
    }

    #[test]
    fn test_non_database_errors() {
        assert!(PoolError::PoolClosed.db_error().is_none());
        assert!(!PoolError::PoolClosed.is_transient());
        assert!(PoolError::WorkerRestarted.is_transient());
        assert!(!PoolError::TaskPanicked("boom".into()).is_transient());
        assert_eq!(
            PoolError::Configuration("worker_count must be greater than 0".into()).to_string(),
            "pool configuration error: worker_count must be greater than 0"
        );
    }
}
