//! # query-pool
//!
//! Fixed-size worker pool that executes queued SQL statements on behalf of
//! application code.
//!
//! Callers submit a statement and its positional parameters and get a
//! [`QueryFuture`] back right away. A fixed set of worker threads, each with
//! its own connection, takes tasks in submission order, runs them and
//! fulfills the futures.
//!
//! ## Features
//!
//! - One connection per worker, established in the background
//! - Per-worker prepared statement cache keyed by SQL text
//! - Reconnect-and-retry on "server has gone away" / "lost connection"
//! - Immediate failure for every other database error
//! - Worker crash recovery with a restart delay
//! - Results readable by blocking, polling or `.await`
//! - Pluggable operational log sink, including daily rotated files
//!
//! The pool is driver-agnostic: implement [`Driver`], [`Connection`] and
//! [`Statement`] for your database client.
//!
//! ## Example
//!
//! ```rust,ignore
//! use query_pool::{ConnectOptions, NO_PARAMS, Pool, PoolConfig};
//!
//! let options = ConnectOptions::new("tcp://127.0.0.1:3306")
//!     .username("app")
//!     .password("secret")
//!     .schema("main");
//! let pool = Pool::new(driver, options, PoolConfig::new().worker_count(4))?;
//!
//! let users = pool.enqueue("SELECT name FROM users WHERE id = ?", ["42"]);
//! let purge = pool.enqueue("DELETE FROM sessions WHERE expired = 1", NO_PARAMS);
//!
//! let cursor = users.wait()?.into_cursor();
//! purge.wait()?;
//!
//! pool.shutdown();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod classify;
pub mod config;
pub mod driver;
pub mod error;
pub mod future;
pub mod logging;
pub mod pool;
pub mod queue;
pub mod session;
pub mod statement_cache;
pub mod worker;

pub use classify::{DispatchPolicy, StatementKind};
pub use config::{ConnectOptions, PoolConfig, ShutdownMode};
pub use driver::{Connection, CursorOf, Driver, Statement};
pub use error::{DbError, PoolError, Result};
pub use future::{QueryFuture, QueryOutcome, QueryResult};
pub use logging::{DailyFileLogger, Logger, NullLogger, Severity, TracingLogger};
pub use pool::{NO_PARAMS, Pool, PoolBuilder, PoolStatus};
pub use statement_cache::{StatementCache, StatementCacheConfig};
pub use worker::{WorkerState, WorkerStatus};
