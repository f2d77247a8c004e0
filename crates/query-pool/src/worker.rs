//! Worker threads: connection upkeep, task execution and crash recovery.
//!
//! ## State machine
//!
//! ```text
//! Disconnected -> Connecting -> Ready -> Executing -> Ready -> ...
//!                     ^                      |
//!                     +---- connection lost -+
//! ```
//!
//! Each worker owns exactly one [`Session`] and one [`StatementCache`]; no
//! other thread ever touches them. If the loop panics outside of task
//! handling, the supervisor logs it, sleeps `restart_delay` and starts over
//! with a fresh session and an empty cache on the same thread.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use crate::classify::StatementKind;
use crate::config::{ConnectOptions, PoolConfig};
use crate::driver::{Connection, CursorOf, Driver, Statement, StatementOf};
use crate::error::{DbError, PoolError};
use crate::future::{QueryOutcome, ResultSender};
use crate::logging::{Logger, Severity};
use crate::queue::TaskQueue;
use crate::session::Session;
use crate::statement_cache::StatementCache;

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// No connection; about to connect or waiting to restart.
    Disconnected = 0,
    /// Attempting to open a connection.
    Connecting = 1,
    /// Connected and waiting for a task.
    Ready = 2,
    /// Running a task.
    Executing = 3,
    /// The worker thread has exited.
    Stopped = 4,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Ready,
            3 => Self::Executing,
            4 => Self::Stopped,
            _ => Self::Disconnected,
        }
    }

    /// Check if the worker can pick up a task right now.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if the worker is running a task.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Executing)
    }
}

/// Counters a worker publishes for [`Pool::status`](crate::Pool::status).
#[derive(Debug)]
pub(crate) struct WorkerStats {
    state: AtomicU8,
    tasks: AtomicU64,
    reconnects: AtomicU64,
    restarts: AtomicU64,
}

impl WorkerStats {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Disconnected as u8),
            tasks: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn snapshot(&self, id: usize) -> WorkerStatus {
        WorkerStatus {
            id,
            state: WorkerState::from_u8(self.state.load(Ordering::Acquire)),
            tasks: self.tasks.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStatus {
    /// Worker index within the pool.
    pub id: usize,
    /// Current state.
    pub state: WorkerState,
    /// Tasks answered (successfully or not).
    pub tasks: u64,
    /// Successful reconnects after a lost or invalid connection.
    pub reconnects: u64,
    /// Crash restarts.
    pub restarts: u64,
}

/// A queued unit of work.
pub(crate) struct QueryTask<C> {
    pub(crate) sql: String,
    pub(crate) params: Vec<String>,
    pub(crate) kind: StatementKind,
    pub(crate) sender: ResultSender<C>,
}

/// Everything a worker thread needs; moved into the thread at spawn.
pub(crate) struct Worker<D: Driver> {
    pub(crate) id: usize,
    pub(crate) driver: Arc<D>,
    pub(crate) options: Arc<ConnectOptions>,
    pub(crate) config: Arc<PoolConfig>,
    pub(crate) queue: Arc<TaskQueue<QueryTask<CursorOf<D>>>>,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) stats: Arc<WorkerStats>,
}

impl<D: Driver> Worker<D> {
    /// Thread body: run the serve loop, restarting it after a crash.
    pub(crate) fn run(self) {
        let span = tracing::debug_span!("query_pool.worker", worker = self.id);
        let _enter = span.enter();
        tracing::debug!("worker started");

        loop {
            match panic::catch_unwind(AssertUnwindSafe(|| self.serve())) {
                Ok(()) => break,
                Err(payload) => {
                    self.stats.restarts.fetch_add(1, Ordering::Relaxed);
                    self.stats.set_state(WorkerState::Disconnected);
                    self.logger.log(
                        Severity::Error,
                        &format!(
                            "[QueryPool] Worker {} crashed: {}. Restarting...",
                            self.id,
                            panic_message(payload.as_ref())
                        ),
                    );
                    if self.queue.wait_closed(self.config.restart_delay) {
                        break;
                    }
                }
            }
        }

        self.stats.set_state(WorkerState::Stopped);
        tracing::debug!("worker stopped");
    }

    /// Connect, then answer tasks until the queue is closed and empty.
    fn serve(&self) {
        let mut session = Session::new(Arc::clone(&self.driver), Arc::clone(&self.options));
        let mut cache = StatementCache::from_config(&self.config.statement_cache);

        if !self.connect(&mut session, &mut cache) {
            return;
        }

        loop {
            self.stats.set_state(WorkerState::Ready);
            let Some(task) = self.queue.pop_blocking() else {
                break;
            };
            self.stats.set_state(WorkerState::Executing);
            self.execute(task, &mut session, &mut cache);
            self.stats.tasks.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Connect, retrying every `reconnect_backoff` until it works.
    ///
    /// Returns `false` if the pool shut down before a connection was made.
    fn connect(&self, session: &mut Session<D>, cache: &mut StatementCache<StatementOf<D>>) -> bool {
        self.stats.set_state(WorkerState::Connecting);
        cache.clear();

        loop {
            match session.connect() {
                Ok(()) => return true,
                Err(err) => {
                    self.logger.log(
                        Severity::Warning,
                        &format!(
                            "[QueryPool] Worker {} failed to connect to {}: {err}",
                            self.id,
                            self.options.endpoint
                        ),
                    );
                    if self.queue.wait_closed(self.config.reconnect_backoff) {
                        return false;
                    }
                }
            }
        }
    }

    /// Run one task to completion and fulfill its future exactly once.
    fn execute(
        &self,
        task: QueryTask<CursorOf<D>>,
        session: &mut Session<D>,
        cache: &mut StatementCache<StatementOf<D>>,
    ) {
        let QueryTask {
            sql,
            params,
            kind,
            sender,
        } = task;
        let max_retries = self.config.max_retries;
        let mut attempts = 0;
        let mut last_error = None;

        tracing::trace!(sql = %sql, params = params.len(), ?kind, "executing task");

        while attempts < max_retries {
            if !session.is_live() {
                self.logger.log(
                    Severity::Warning,
                    &format!(
                        "[QueryPool] Worker {} connection invalid before prepare. Reconnecting...",
                        self.id
                    ),
                );
                if !self.connect(session, cache) {
                    sender.fulfill(Err(PoolError::PoolClosed));
                    return;
                }
                self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                self.stats.set_state(WorkerState::Executing);
            }

            let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
                run_statement(session, cache, &sql, &params, kind)
            }));

            match attempt {
                Ok(Ok(outcome)) => {
                    sender.fulfill(Ok(outcome));
                    return;
                }
                Ok(Err(err)) => {
                    attempts += 1;
                    self.logger.log(
                        Severity::Error,
                        &format!("SQL Exception: {err} (retry {attempts}/{max_retries})"),
                    );

                    if !err.is_connection_loss() && session.is_live() {
                        sender.fulfill(Err(PoolError::Database(err)));
                        return;
                    }

                    self.logger.log(
                        Severity::Error,
                        "[QueryPool] Lost connection. Attempting reconnect...",
                    );
                    last_error = Some(err);
                    self.reconnect_once(session, cache, attempts < max_retries);
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    self.logger.log(
                        Severity::Error,
                        &format!("[QueryPool] Worker {} task panicked: {message}", self.id),
                    );
                    // The driver's state is unknown after a panic.
                    session.invalidate();
                    cache.clear();
                    sender.fulfill(Err(PoolError::TaskPanicked(message)));
                    return;
                }
            }
        }

        sender.fulfill(Err(PoolError::RetriesExhausted {
            attempts,
            last_error,
        }));
    }

    /// Replace a lost connection with one attempt, backing off if it fails
    /// and another round will follow.
    fn reconnect_once(
        &self,
        session: &mut Session<D>,
        cache: &mut StatementCache<StatementOf<D>>,
        backoff: bool,
    ) {
        cache.clear();

        match session.connect() {
            Ok(()) => {
                self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.logger.log(
                    Severity::Warning,
                    &format!("[QueryPool] Worker {} reconnect failed: {err}", self.id),
                );
                if backoff {
                    self.queue.wait_closed(self.config.reconnect_backoff);
                }
            }
        }
    }
}

/// Get-or-prepare, bind, execute.
fn run_statement<D: Driver>(
    session: &mut Session<D>,
    cache: &mut StatementCache<StatementOf<D>>,
    sql: &str,
    params: &[String],
    kind: StatementKind,
) -> Result<QueryOutcome<CursorOf<D>>, DbError> {
    let connection = session
        .connection_mut()
        .ok_or_else(|| DbError::gone_away("no connection"))?;
    let statement = cache.get_or_prepare(sql, |sql| connection.prepare(sql))?;

    for (index, value) in params.iter().enumerate() {
        statement.bind_string(index + 1, value)?;
    }

    match kind {
        StatementKind::Query => statement.execute_query().map(QueryOutcome::Rows),
        StatementKind::Execute => statement.execute().map(|()| QueryOutcome::Executed),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_state_round_trip() {
        for state in [
            WorkerState::Disconnected,
            WorkerState::Connecting,
            WorkerState::Ready,
            WorkerState::Executing,
            WorkerState::Stopped,
        ] {
            assert_eq!(WorkerState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_worker_state_predicates() {
        assert!(WorkerState::Ready.is_idle());
        assert!(!WorkerState::Connecting.is_idle());
        assert!(WorkerState::Executing.is_busy());
        assert!(!WorkerState::Ready.is_busy());
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = WorkerStats::new();
        stats.set_state(WorkerState::Executing);
        stats.tasks.fetch_add(2, Ordering::Relaxed);
        stats.restarts.fetch_add(1, Ordering::Relaxed);

        let status = stats.snapshot(3);
        assert_eq!(status.id, 3);
        assert_eq!(status.state, WorkerState::Executing);
        assert_eq!(status.tasks, 2);
        assert_eq!(status.reconnects, 0);
        assert_eq!(status.restarts, 1);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");

        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
