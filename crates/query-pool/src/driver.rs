//! Database driver capabilities consumed by the pool.
//!
//! The pool never speaks a wire protocol itself. A driver crate implements
//! these three traits for its own connection and statement types; the pool
//! only needs to open a connection, check that it is alive, prepare a
//! statement, bind positional string parameters and run it.
//!
//! Connections and statements are created and used on a single worker
//! thread, so they do not need to be `Send`. Cursors do: they travel back to
//! the caller through the [`QueryFuture`](crate::future::QueryFuture).

use crate::error::DbError;

/// Entry point of a database driver: knows how to open connections.
///
/// One driver value is shared by every worker in the pool.
pub trait Driver: Send + Sync + 'static {
    /// Connection type produced by this driver.
    type Connection: Connection;

    /// Open a new connection to `endpoint` with the given credentials.
    fn connect(
        &self,
        endpoint: &str,
        username: &str,
        password: &str,
    ) -> Result<Self::Connection, DbError>;
}

/// A single live database connection.
pub trait Connection {
    /// Prepared statement type bound to this connection.
    type Statement: Statement;

    /// Make `schema` the default schema/database for subsequent statements.
    fn select_schema(&mut self, schema: &str) -> Result<(), DbError>;

    /// Check if the connection is still usable.
    ///
    /// This should be cheap; drivers typically check socket state or issue a
    /// ping.
    fn is_valid(&self) -> bool;

    /// Prepare `sql` on this connection.
    fn prepare(&mut self, sql: &str) -> Result<Self::Statement, DbError>;
}

/// A statement prepared on a specific connection.
///
/// Statements are reused across tasks, so binding a position overwrites any
/// value bound to it by a previous execution.
pub trait Statement {
    /// Result cursor returned by row-returning statements.
    type Cursor: Send + 'static;

    /// Bind `value` to the 1-indexed placeholder `position`.
    fn bind_string(&mut self, position: usize, value: &str) -> Result<(), DbError>;

    /// Execute a row-returning statement.
    fn execute_query(&mut self) -> Result<Self::Cursor, DbError>;

    /// Execute a statement that returns no rows.
    fn execute(&mut self) -> Result<(), DbError>;
}

/// The cursor type a driver's statements produce.
pub type CursorOf<D> =
    <<<D as Driver>::Connection as Connection>::Statement as Statement>::Cursor;

/// The statement type a driver's connections prepare.
pub type StatementOf<D> = <<D as Driver>::Connection as Connection>::Statement;
