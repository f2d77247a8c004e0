//! One-shot result handles.
//!
//! Every submitted task gets a [`ResultSender`] (kept with the task) and a
//! [`QueryFuture`] (returned to the caller). The sender is consumed by
//! [`ResultSender::fulfill`], so a task can be answered at most once; if it is
//! dropped without being fulfilled the caller sees
//! [`PoolError::WorkerRestarted`] instead of waiting forever.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::PoolError;

/// Successful outcome of a task.
#[derive(Debug)]
pub enum QueryOutcome<C> {
    /// A row-returning statement ran; here is its cursor.
    Rows(C),
    /// A statement without a result set ran.
    Executed,
}

impl<C> QueryOutcome<C> {
    /// Check if this outcome carries a cursor.
    #[must_use]
    pub fn has_rows(&self) -> bool {
        matches!(self, Self::Rows(_))
    }

    /// Borrow the cursor, if any.
    #[must_use]
    pub fn cursor(&self) -> Option<&C> {
        match self {
            Self::Rows(cursor) => Some(cursor),
            Self::Executed => None,
        }
    }

    /// Take the cursor, if any.
    #[must_use]
    pub fn into_cursor(self) -> Option<C> {
        match self {
            Self::Rows(cursor) => Some(cursor),
            Self::Executed => None,
        }
    }
}

/// What a [`QueryFuture`] resolves to.
pub type QueryResult<C> = Result<QueryOutcome<C>, PoolError>;

/// Create a connected sender/future pair.
#[must_use]
pub fn channel<C>() -> (ResultSender<C>, QueryFuture<C>) {
    let (tx, rx) = oneshot::channel();
    (ResultSender { tx }, QueryFuture { rx })
}

/// Write side of a task's result.
#[derive(Debug)]
pub struct ResultSender<C> {
    tx: oneshot::Sender<QueryResult<C>>,
}

impl<C> ResultSender<C> {
    /// Deliver the result.
    ///
    /// Returns `false` if the caller already dropped its [`QueryFuture`]; the
    /// result (and any cursor in it) is dropped in that case.
    pub fn fulfill(self, result: QueryResult<C>) -> bool {
        self.tx.send(result).is_ok()
    }

    /// Check if the caller dropped its [`QueryFuture`].
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Read side of a task's result.
///
/// Await it from async code, or call [`wait`](Self::wait) from a plain
/// thread. Either way the result can be read exactly once.
#[derive(Debug)]
#[must_use = "dropping a QueryFuture discards the query result"]
pub struct QueryFuture<C> {
    rx: oneshot::Receiver<QueryResult<C>>,
}

impl<C> QueryFuture<C> {
    /// Create a future that is already resolved with `result`.
    pub fn ready(result: QueryResult<C>) -> Self {
        let (sender, future) = channel();
        sender.fulfill(result);
        future
    }

    /// Block the current thread until the result is available.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context;
    /// `.await` the future there instead.
    pub fn wait(self) -> QueryResult<C> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(PoolError::WorkerRestarted))
    }

    /// Take the result if it is already available, or get the future back.
    pub fn try_take(mut self) -> Result<QueryResult<C>, Self> {
        match self.rx.try_recv() {
            Ok(result) => Ok(result),
            Err(oneshot::error::TryRecvError::Empty) => Err(self),
            Err(oneshot::error::TryRecvError::Closed) => Ok(Err(PoolError::WorkerRestarted)),
        }
    }
}

impl<C> Future for QueryFuture<C> {
    type Output = QueryResult<C>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(PoolError::WorkerRestarted)))
    }
}
