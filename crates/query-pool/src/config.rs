//! Pool and connection configuration.

use std::fmt;
use std::time::Duration;

use crate::classify::DispatchPolicy;
use crate::error::PoolError;
use crate::statement_cache::StatementCacheConfig;

/// Default number of worker threads.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default number of execution rounds per task.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default wait between failed connection attempts.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Default wait before a crashed worker re-enters its loop.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Where and as whom each worker connects.
///
/// The endpoint is passed to the driver untouched (for example
/// `tcp://127.0.0.1:3306`).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Driver-specific endpoint.
    pub endpoint: String,
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Schema (database) selected right after connecting.
    pub schema: String,
}

impl ConnectOptions {
    /// Create options for `endpoint` with empty credentials and schema.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Set the login name.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Set the login password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the schema selected after connecting.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Parse a `key=value;` connection string.
    ///
    /// ```text
    /// Server=tcp://127.0.0.1:3306;User Id=app;Password=secret;Database=main
    /// ```
    ///
    /// Keys are case-insensitive. Unknown keys are rejected so typos do not
    /// silently produce a pool that can never connect.
    pub fn from_connection_string(conn_str: &str) -> Result<Self, PoolError> {
        let mut options = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| PoolError::Configuration(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim().to_string();

            match key.as_str() {
                "server" | "host" | "endpoint" | "data source" => options.endpoint = value,
                "user id" | "uid" | "user" | "username" => options.username = value,
                "password" | "pwd" => options.password = value,
                "database" | "schema" | "initial catalog" => options.schema = value,
                _ => {
                    return Err(PoolError::Configuration(format!(
                        "unknown connection string key: {key}"
                    )));
                }
            }
        }

        if options.endpoint.is_empty() {
            return Err(PoolError::Configuration(
                "connection string has no server".into(),
            ));
        }

        Ok(options)
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("schema", &self.schema)
            .finish()
    }
}

/// What happens to tasks still queued when the pool shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Workers keep taking tasks until the queue is empty.
    #[default]
    Drain,
    /// Queued tasks are failed with [`PoolError::PoolClosed`] immediately.
    Abort,
}

/// Configuration for the query pool.
///
/// This struct is marked `#[non_exhaustive]`; build it with
/// [`PoolConfig::new()`] and the setter methods.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Number of worker threads, each owning one connection.
    pub worker_count: usize,

    /// Execution rounds per task before giving up on a flapping connection.
    pub max_retries: u32,

    /// Wait between failed connection attempts.
    pub reconnect_backoff: Duration,

    /// Wait before a crashed worker restarts.
    pub restart_delay: Duration,

    /// Per-worker prepared statement cache settings.
    pub statement_cache: StatementCacheConfig,

    /// How statements are classified as row-returning or not.
    pub dispatch: DispatchPolicy,

    /// Fate of queued tasks at shutdown.
    pub shutdown_mode: ShutdownMode,

    /// Prefix for worker thread names.
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            max_retries: DEFAULT_MAX_RETRIES,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            restart_delay: DEFAULT_RESTART_DELAY,
            statement_cache: StatementCacheConfig::default(),
            dispatch: DispatchPolicy::default(),
            shutdown_mode: ShutdownMode::default(),
            thread_name: "query-pool-worker".to_string(),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of workers.
    #[must_use]
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the number of execution rounds per task.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the wait between failed connection attempts.
    #[must_use]
    pub fn reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Set the wait before a crashed worker restarts.
    #[must_use]
    pub fn restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Set the statement cache configuration.
    #[must_use]
    pub fn statement_cache(mut self, config: StatementCacheConfig) -> Self {
        self.statement_cache = config;
        self
    }

    /// Set the dispatch policy.
    #[must_use]
    pub fn dispatch(mut self, policy: DispatchPolicy) -> Self {
        self.dispatch = policy;
        self
    }

    /// Set the shutdown mode.
    #[must_use]
    pub fn shutdown_mode(mut self, mode: ShutdownMode) -> Self {
        self.shutdown_mode = mode;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.worker_count == 0 {
            return Err(PoolError::Configuration(
                "worker_count must be greater than 0".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(PoolError::Configuration(
                "max_retries must be greater than 0".into(),
            ));
        }
        if self.statement_cache.max_size == Some(0) {
            return Err(PoolError::Configuration(
                "statement cache max_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
