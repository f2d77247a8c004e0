//! A worker's connection and the parameters needed to re-create it.

use std::sync::Arc;
use std::time::Instant;

use crate::config::ConnectOptions;
use crate::driver::{Connection, Driver};
use crate::error::DbError;

/// One worker's database connection.
///
/// A session is either live or absent. Connecting replaces the connection
/// wholesale; a half-open connection is never stored.
pub struct Session<D: Driver> {
    driver: Arc<D>,
    options: Arc<ConnectOptions>,
    connection: Option<D::Connection>,
    connected_at: Option<Instant>,
    connects: u64,
}

impl<D: Driver> Session<D> {
    /// Create an absent session for `options`.
    pub fn new(driver: Arc<D>, options: Arc<ConnectOptions>) -> Self {
        Self {
            driver,
            options,
            connection: None,
            connected_at: None,
            connects: 0,
        }
    }

    /// Open a fresh connection and select the configured schema.
    ///
    /// Any existing connection is dropped first. On failure the session is
    /// left absent.
    pub fn connect(&mut self) -> Result<(), DbError> {
        self.invalidate();

        let options = &self.options;
        let mut connection =
            self.driver
                .connect(&options.endpoint, &options.username, &options.password)?;
        if !options.schema.is_empty() {
            connection.select_schema(&options.schema)?;
        }

        tracing::debug!(
            endpoint = %options.endpoint,
            schema = %options.schema,
            "connection established"
        );
        self.connection = Some(connection);
        self.connected_at = Some(Instant::now());
        self.connects += 1;
        Ok(())
    }

    /// Drop the current connection, if any.
    pub fn invalidate(&mut self) {
        if self.connection.take().is_some() {
            tracing::trace!(endpoint = %self.options.endpoint, "connection dropped");
        }
        self.connected_at = None;
    }

    /// Check if there is a connection and the driver reports it usable.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_valid)
    }

    /// Borrow the connection, if present.
    pub fn connection_mut(&mut self) -> Option<&mut D::Connection> {
        self.connection.as_mut()
    }

    /// Time since the current connection was established.
    #[must_use]
    pub fn uptime(&self) -> Option<std::time::Duration> {
        self.connected_at.map(|at| at.elapsed())
    }

    /// Number of successful connects over the session's life.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.connects
    }

    /// The options this session connects with.
    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }
}

impl<D: Driver> std::fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.options.endpoint)
            .field("connected", &self.connection.is_some())
            .field("connects", &self.connects)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::driver::Statement;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct FlakyDriver {
        refuse: AtomicBool,
        opened: AtomicU32,
        endpoints: parking_lot::Mutex<Vec<String>>,
    }

    struct FakeConnection {
        valid: Rc<Cell<bool>>,
    }

    struct FakeStatement;

    impl Statement for FakeStatement {
        type Cursor = ();

        fn bind_string(&mut self, _position: usize, _value: &str) -> Result<(), DbError> {
            Ok(())
        }

        fn execute_query(&mut self) -> Result<(), DbError> {
            Ok(())
        }

        fn execute(&mut self) -> Result<(), DbError> {
            Ok(())
        }
    }

    impl Connection for FakeConnection {
        type Statement = FakeStatement;

        fn select_schema(&mut self, _schema: &str) -> Result<(), DbError> {
            Ok(())
        }

        fn is_valid(&self) -> bool {
            self.valid.get()
        }

        fn prepare(&mut self, _sql: &str) -> Result<FakeStatement, DbError> {
            Ok(FakeStatement)
        }
    }

    impl Driver for FlakyDriver {
        type Connection = FakeConnection;

        fn connect(
            &self,
            endpoint: &str,
            _username: &str,
            _password: &str,
        ) -> Result<FakeConnection, DbError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(DbError::new(2003, format!("can't connect to {endpoint}")));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.endpoints.lock().push(endpoint.to_string());
            Ok(FakeConnection {
                valid: Rc::new(Cell::new(true)),
            })
        }
    }

    fn session(driver: &Arc<FlakyDriver>) -> Session<FlakyDriver> {
        let options = ConnectOptions::new("tcp://db:3306").schema("main");
        Session::new(Arc::clone(driver), Arc::new(options))
    }

    #[test]
    fn test_new_session_is_absent() {
        let driver = Arc::new(FlakyDriver::default());
        let mut session = session(&driver);
        assert!(!session.is_live());
        assert!(session.connection_mut().is_none());
        assert!(session.uptime().is_none());
        assert_eq!(driver.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_connect_and_invalidate() {
        let driver = Arc::new(FlakyDriver::default());
        let mut session = session(&driver);

        session.connect().unwrap();
        assert!(session.is_live());
        assert_eq!(session.connects(), 1);
        assert!(session.uptime().is_some());
        assert_eq!(driver.endpoints.lock().as_slice(), ["tcp://db:3306"]);

        session.invalidate();
        assert!(!session.is_live());
    }

    #[test]
    fn test_invalid_connection_is_not_live() {
        let driver = Arc::new(FlakyDriver::default());
        let mut session = session(&driver);
        session.connect().unwrap();

        session.connection_mut().unwrap().valid.set(false);
        assert!(!session.is_live());
    }

    #[test]
    fn test_failed_connect_leaves_session_absent() {
        let driver = Arc::new(FlakyDriver::default());
        let mut session = session(&driver);
        session.connect().unwrap();

        driver.refuse.store(true, Ordering::SeqCst);
        let err = session.connect().unwrap_err();
        assert_eq!(err.code, 2003);
        assert!(!session.is_live());
        assert_eq!(session.connects(), 1);
    }
}
