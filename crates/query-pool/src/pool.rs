//! Query pool implementation.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::classify::StatementKind;
use crate::config::{ConnectOptions, PoolConfig, ShutdownMode};
use crate::driver::{CursorOf, Driver};
use crate::error::PoolError;
use crate::future::{self, QueryFuture};
use crate::logging::{Logger, Severity, TracingLogger};
use crate::queue::TaskQueue;
use crate::worker::{QueryTask, Worker, WorkerStats, WorkerStatus};

/// Empty parameter list for [`Pool::enqueue`].
pub const NO_PARAMS: [&str; 0] = [];

/// A fixed set of worker threads executing queued statements.
///
/// Each worker owns one connection and its own prepared statement cache.
/// Tasks are handed out in submission order; results come back through the
/// [`QueryFuture`] returned by [`enqueue`](Self::enqueue).
///
/// Dropping the pool shuts it down and joins every worker.
pub struct Pool<D: Driver> {
    driver: Arc<D>,
    options: Arc<ConnectOptions>,
    config: Arc<PoolConfig>,
    queue: Arc<TaskQueue<QueryTask<CursorOf<D>>>>,
    logger: Arc<dyn Logger>,
    workers: Vec<Arc<WorkerStats>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<D: Driver> Pool<D> {
    /// Start a pool with the default [`TracingLogger`].
    ///
    /// Returns as soon as the worker threads are spawned; workers connect in
    /// the background.
    pub fn new(driver: D, options: ConnectOptions, config: PoolConfig) -> Result<Self, PoolError> {
        Self::start(driver, options, config, Arc::new(TracingLogger))
    }

    /// Create a builder for a pool over `driver`.
    pub fn builder(driver: D) -> PoolBuilder<D> {
        PoolBuilder::new(driver)
    }

    fn start(
        driver: D,
        options: ConnectOptions,
        config: PoolConfig,
        logger: Arc<dyn Logger>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let driver = Arc::new(driver);
        let options = Arc::new(options);
        let config = Arc::new(config);
        let queue = Arc::new(TaskQueue::new());
        let mut workers = Vec::with_capacity(config.worker_count);
        let mut handles = Vec::with_capacity(config.worker_count);

        for id in 0..config.worker_count {
            let stats = Arc::new(WorkerStats::new());
            let worker = Worker {
                id,
                driver: Arc::clone(&driver),
                options: Arc::clone(&options),
                config: Arc::clone(&config),
                queue: Arc::clone(&queue),
                logger: Arc::clone(&logger),
                stats: Arc::clone(&stats),
            };

            let spawned = thread::Builder::new()
                .name(format!("{}-{id}", config.thread_name))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => {
                    workers.push(stats);
                    handles.push(handle);
                }
                Err(err) => {
                    queue.close();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(PoolError::Spawn(err));
                }
            }
        }

        tracing::info!(
            workers = config.worker_count,
            endpoint = %options.endpoint,
            "query pool started"
        );

        Ok(Self {
            driver,
            options,
            config,
            queue,
            logger,
            workers,
            handles: Mutex::new(handles),
        })
    }

    /// Submit `sql` with positional `params` and return immediately.
    ///
    /// Whether the statement returns rows is decided by the configured
    /// [`DispatchPolicy`](crate::DispatchPolicy). The SQL is not validated
    /// here; errors surface through the returned future.
    ///
    /// After [`shutdown`](Self::shutdown) the future is already failed with
    /// [`PoolError::PoolClosed`].
    pub fn enqueue<I, S>(&self, sql: impl Into<String>, params: I) -> QueryFuture<CursorOf<D>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sql = sql.into();
        let kind = self.config.dispatch.kind_of(&sql);
        self.submit(sql, params, kind)
    }

    /// Submit `sql` with an explicit statement kind.
    pub fn enqueue_with_kind<I, S>(
        &self,
        sql: impl Into<String>,
        params: I,
        kind: StatementKind,
    ) -> QueryFuture<CursorOf<D>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.submit(sql.into(), params, kind)
    }

    fn submit<I, S>(&self, sql: String, params: I, kind: StatementKind) -> QueryFuture<CursorOf<D>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (sender, result) = future::channel();
        let task = QueryTask {
            sql,
            params: params.into_iter().map(Into::into).collect(),
            kind,
            sender,
        };

        if let Err(task) = self.queue.push(task) {
            tracing::debug!(sql = %task.sql, "rejecting task on closed pool");
            task.sender.fulfill(Err(PoolError::PoolClosed));
        }
        result
    }

    /// Stop accepting tasks, wait for every worker to exit and fail whatever
    /// is left in the queue.
    ///
    /// Tasks a worker already holds run to completion. What happens to
    /// queued tasks depends on [`ShutdownMode`]. Calling this more than once
    /// is harmless; a call racing another one blocks until the workers are
    /// joined.
    pub fn shutdown(&self) {
        let first = match self.config.shutdown_mode {
            ShutdownMode::Drain => self.queue.close(),
            ShutdownMode::Abort => match self.queue.close_and_drain() {
                Some(tasks) => {
                    tracing::debug!(aborted = tasks.len(), "aborting queued tasks");
                    for task in tasks {
                        task.sender.fulfill(Err(PoolError::PoolClosed));
                    }
                    true
                }
                None => false,
            },
        };
        if first {
            self.logger
                .log(Severity::Info, "[QueryPool] Shutting down worker pool");
        }

        // Held until every worker is joined, so concurrent callers return
        // only once the pool is fully stopped.
        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            if handle.join().is_err() {
                self.logger.log(
                    Severity::Error,
                    "[QueryPool] Worker thread terminated abnormally",
                );
            }
        }

        let leftover = self.fail_queued();
        if leftover > 0 {
            tracing::debug!(leftover, "failed tasks left after workers exited");
        }
    }

    fn fail_queued(&self) -> usize {
        let tasks = self.queue.drain();
        let count = tasks.len();
        for task in tasks {
            task.sender.fulfill(Err(PoolError::PoolClosed));
        }
        count
    }

    /// Get a snapshot of the queue and every worker.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            queued: self.queue.len(),
            closed: self.queue.is_closed(),
            workers: self
                .workers
                .iter()
                .enumerate()
                .map(|(id, stats)| stats.snapshot(id))
                .collect(),
        }
    }

    /// Check if the pool has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Get the number of workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get the connect options workers use.
    #[must_use]
    pub fn connect_options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Get the driver.
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }
}

impl<D: Driver> Drop for Pool<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<D: Driver> std::fmt::Debug for Pool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("options", &self.options)
            .field("config", &self.config)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    /// Tasks waiting for a worker.
    pub queued: usize,
    /// Whether shutdown has been signaled.
    pub closed: bool,
    /// Per-worker state.
    pub workers: Vec<WorkerStatus>,
}

impl PoolStatus {
    /// Number of workers waiting for a task.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.workers.iter().filter(|w| w.state.is_idle()).count()
    }

    /// Number of workers running a task.
    #[must_use]
    pub fn busy(&self) -> usize {
        self.workers.iter().filter(|w| w.state.is_busy()).count()
    }

    /// Total restarts across all workers.
    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.workers.iter().map(|w| w.restarts).sum()
    }

    /// Total reconnects across all workers.
    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.workers.iter().map(|w| w.reconnects).sum()
    }
}

/// Builder for [`Pool`].
///
/// ```rust,ignore
/// let pool = Pool::builder(driver)
///     .endpoint("tcp://127.0.0.1:3306")
///     .username("app")
///     .password("secret")
///     .schema("main")
///     .worker_count(8)
///     .logger(DailyFileLogger::new("logs")?)
///     .build()?;
/// ```
pub struct PoolBuilder<D: Driver> {
    driver: D,
    options: ConnectOptions,
    config: PoolConfig,
    logger: Arc<dyn Logger>,
}

impl<D: Driver> PoolBuilder<D> {
    /// Create a builder with default options and configuration.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            options: ConnectOptions::default(),
            config: PoolConfig::default(),
            logger: Arc::new(TracingLogger),
        }
    }

    /// Replace all connect options at once.
    #[must_use]
    pub fn connect_options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the endpoint.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.options.endpoint = endpoint.into();
        self
    }

    /// Set the login name.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.options.username = username.into();
        self
    }

    /// Set the login password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.options.password = password.into();
        self
    }

    /// Set the schema selected after connecting.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.options.schema = schema.into();
        self
    }

    /// Set the number of workers.
    #[must_use]
    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    /// Replace the pool configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the operational log sink.
    #[must_use]
    pub fn logger(mut self, logger: impl Logger + 'static) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    /// Set an already shared log sink.
    #[must_use]
    pub fn shared_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Validate the configuration and start the pool.
    pub fn build(self) -> Result<Pool<D>, PoolError> {
        Pool::start(self.driver, self.options, self.config, self.logger)
    }
}
