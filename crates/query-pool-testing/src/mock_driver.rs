//! Scripted in-memory database driver.
//!
//! [`MockDriver`] implements the pool's driver traits without any I/O.
//! Every SQL text maps to a standing [`MockResponse`]; one-shot responses can
//! be scripted in front of it to simulate a failure on a specific attempt.
//! The driver records connects, prepares and executions so tests can assert
//! on what the workers actually did.
//!
//! ## Example
//!
//! ```rust,ignore
//! use query_pool_testing::{MockDriver, MockResponse};
//!
//! let driver = MockDriver::builder()
//!     .with_response("SELECT name FROM users WHERE id = ?", MockResponse::rows([["alice"]]))
//!     .build();
//! driver.script("SELECT name FROM users WHERE id = ?", [MockResponse::gone_away()]);
//!
//! let pool = Pool::new(driver.clone(), ConnectOptions::new("mock://db"), PoolConfig::new())?;
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use query_pool::error::{SERVER_GONE_AWAY, SERVER_LOST};
use query_pool::{Connection, DbError, Driver, Statement};

/// Error code returned for refused connection attempts.
pub const CONNECT_REFUSED: i32 = 2003;

/// Error code returned by [`MockResponse::syntax_error`].
pub const SYNTAX_ERROR: i32 = 1064;

/// How the mock answers one execution of a statement.
#[derive(Clone)]
pub enum MockResponse {
    /// Produce a cursor over these rows.
    Rows(Vec<Vec<String>>),

    /// Succeed without rows.
    Affected(u64),

    /// Fail with a database error.
    ///
    /// Connection-loss codes also kill the connection, as a real server
    /// would.
    Error {
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
    },

    /// Panic inside the driver with this message.
    Panic(String),

    /// Decide at execution time from the SQL and bound parameters.
    Custom(Arc<dyn Fn(&str, &[String]) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows(rows) => f.debug_tuple("Rows").field(rows).finish(),
            Self::Affected(n) => f.debug_tuple("Affected").field(n).finish(),
            Self::Error { code, message } => f
                .debug_struct("Error")
                .field("code", code)
                .field("message", message)
                .finish(),
            Self::Panic(message) => f.debug_tuple("Panic").field(message).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// Create a row response.
    pub fn rows<R, V>(rows: impl IntoIterator<Item = R>) -> Self
    where
        R: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self::Rows(
            rows.into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        )
    }

    /// Create a rows affected response.
    pub fn affected(count: u64) -> Self {
        Self::Affected(count)
    }

    /// Create an error response.
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// "MySQL server has gone away".
    pub fn gone_away() -> Self {
        Self::error(SERVER_GONE_AWAY, "MySQL server has gone away")
    }

    /// "Lost connection to MySQL server during query".
    pub fn lost_connection() -> Self {
        Self::error(SERVER_LOST, "Lost connection to MySQL server during query")
    }

    /// A permanent syntax error.
    pub fn syntax_error() -> Self {
        Self::error(SYNTAX_ERROR, "You have an error in your SQL syntax")
    }

    /// Panic with `message`.
    pub fn panic(message: impl Into<String>) -> Self {
        Self::Panic(message.into())
    }

    /// Compute the response per execution.
    pub fn custom(f: impl Fn(&str, &[String]) -> MockResponse + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }
}

/// One statement execution seen by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// SQL text of the prepared statement.
    pub sql: String,
    /// Bound parameters, in position order.
    pub params: Vec<String>,
    /// Id of the connection it ran on.
    pub connection: u64,
    /// Whether it ran through `execute_query`.
    pub query: bool,
}

/// One prepare seen by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepare {
    /// SQL text.
    pub sql: String,
    /// Id of the connection it was prepared on.
    pub connection: u64,
}

/// Cursor produced by [`MockDriver`] row responses.
///
/// Starts positioned before the first row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCursor {
    rows: Vec<Vec<String>>,
    params: Vec<String>,
    position: usize,
}

impl MockCursor {
    fn new(rows: Vec<Vec<String>>, params: Vec<String>) -> Self {
        Self {
            rows,
            params,
            position: 0,
        }
    }

    /// Advance to the next row and return it.
    pub fn next_row(&mut self) -> Option<&[String]> {
        let row = self.rows.get(self.position)?;
        self.position += 1;
        Some(row)
    }

    /// Check if no row has been read yet.
    #[must_use]
    pub fn is_before_first(&self) -> bool {
        self.position == 0
    }

    /// Total number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Parameters that were bound when the query ran.
    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Take the rows not yet read.
    #[must_use]
    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.rows.into_iter().skip(self.position).collect()
    }
}

#[derive(Default)]
struct Gate {
    paused: bool,
    permits: usize,
    started: Vec<String>,
}

struct Shared {
    responses: Mutex<HashMap<String, MockResponse>>,
    scripted: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    default_response: MockResponse,
    latency: Duration,
    epoch: AtomicU64,
    next_connection: AtomicU64,
    connect_attempts: AtomicU32,
    refusals: AtomicU32,
    connect_panics: AtomicU32,
    schemas: Mutex<Vec<String>>,
    prepares: Mutex<Vec<Prepare>>,
    executions: Mutex<Vec<Execution>>,
    gate: Mutex<Gate>,
    gate_changed: Condvar,
}

impl Shared {
    fn respond(&self, sql: &str, params: &[String]) -> MockResponse {
        let scripted = self
            .scripted
            .lock()
            .get_mut(sql)
            .and_then(VecDeque::pop_front);
        let response = scripted.unwrap_or_else(|| {
            self.responses
                .lock()
                .get(sql)
                .cloned()
                .unwrap_or_else(|| self.default_response.clone())
        });

        match response {
            MockResponse::Custom(f) => f(sql, params),
            other => other,
        }
    }

    fn enter_gate(&self, sql: &str) {
        let mut gate = self.gate.lock();
        gate.started.push(sql.to_string());
        self.gate_changed.notify_all();
        while gate.paused {
            if gate.permits > 0 {
                gate.permits -= 1;
                break;
            }
            self.gate_changed.wait(&mut gate);
        }
    }
}

/// Builder for [`MockDriver`].
pub struct MockDriverBuilder {
    responses: HashMap<String, MockResponse>,
    default_response: MockResponse,
    latency: Duration,
}

impl MockDriverBuilder {
    /// Create a builder whose default response is an empty success.
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            default_response: MockResponse::Rows(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    /// Set the standing response for `sql`.
    #[must_use]
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.responses.insert(sql.into(), response);
        self
    }

    /// Set the response for SQL without a standing response.
    #[must_use]
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.default_response = response;
        self
    }

    /// Make every execution take at least `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Build the driver.
    pub fn build(self) -> MockDriver {
        MockDriver {
            shared: Arc::new(Shared {
                responses: Mutex::new(self.responses),
                scripted: Mutex::new(HashMap::new()),
                default_response: self.default_response,
                latency: self.latency,
                epoch: AtomicU64::new(0),
                next_connection: AtomicU64::new(1),
                connect_attempts: AtomicU32::new(0),
                refusals: AtomicU32::new(0),
                connect_panics: AtomicU32::new(0),
                schemas: Mutex::new(Vec::new()),
                prepares: Mutex::new(Vec::new()),
                executions: Mutex::new(Vec::new()),
                gate: Mutex::new(Gate::default()),
                gate_changed: Condvar::new(),
            }),
        }
    }
}

impl Default for MockDriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory driver with scripted responses and fault injection.
///
/// Clones share state, so a test can keep one handle while the pool owns
/// another.
#[derive(Clone)]
pub struct MockDriver {
    shared: Arc<Shared>,
}

impl MockDriver {
    /// Create a builder.
    pub fn builder() -> MockDriverBuilder {
        MockDriverBuilder::new()
    }

    /// Create a driver where every statement succeeds with no rows.
    pub fn new() -> Self {
        MockDriverBuilder::new().build()
    }

    /// Replace the standing response for `sql`.
    pub fn set_response(&self, sql: impl Into<String>, response: MockResponse) {
        self.shared.responses.lock().insert(sql.into(), response);
    }

    /// Queue one-shot responses for `sql`, used before the standing one.
    pub fn script(&self, sql: impl Into<String>, responses: impl IntoIterator<Item = MockResponse>) {
        self.shared
            .scripted
            .lock()
            .entry(sql.into())
            .or_default()
            .extend(responses);
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_connects(&self, count: u32) {
        self.shared.refusals.store(count, Ordering::SeqCst);
    }

    /// Panic inside the next `count` connection attempts.
    pub fn panic_on_connect(&self, count: u32) {
        self.shared.connect_panics.store(count, Ordering::SeqCst);
    }

    /// Invalidate every connection opened so far.
    pub fn kill_connections(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Hold every execution at its start until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.shared.gate.lock().paused = true;
    }

    /// Release held executions.
    pub fn resume(&self) {
        self.shared.gate.lock().paused = false;
        self.shared.gate_changed.notify_all();
    }

    /// Let `count` more executions through while paused.
    pub fn release(&self, count: usize) {
        self.shared.gate.lock().permits += count;
        self.shared.gate_changed.notify_all();
    }

    /// SQL of every execution that reached the gate, in arrival order.
    #[must_use]
    pub fn started(&self) -> Vec<String> {
        self.shared.gate.lock().started.clone()
    }

    /// Wait until at least `count` executions have started.
    pub fn wait_for_started(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut gate = self.shared.gate.lock();
        while gate.started.len() < count {
            if self
                .shared
                .gate_changed
                .wait_until(&mut gate, deadline)
                .timed_out()
            {
                return gate.started.len() >= count;
            }
        }
        true
    }

    /// Connection attempts, including refused ones.
    #[must_use]
    pub fn connect_attempts(&self) -> u32 {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// Connections successfully opened.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.shared.next_connection.load(Ordering::SeqCst) - 1
    }

    /// Schemas selected, one entry per connection.
    #[must_use]
    pub fn schemas(&self) -> Vec<String> {
        self.shared.schemas.lock().clone()
    }

    /// Every prepare so far.
    #[must_use]
    pub fn prepares(&self) -> Vec<Prepare> {
        self.shared.prepares.lock().clone()
    }

    /// Number of times `sql` was prepared.
    #[must_use]
    pub fn prepare_count(&self, sql: &str) -> usize {
        self.shared
            .prepares
            .lock()
            .iter()
            .filter(|p| p.sql == sql)
            .count()
    }

    /// Every execution so far, in order.
    #[must_use]
    pub fn executions(&self) -> Vec<Execution> {
        self.shared.executions.lock().clone()
    }

    /// Number of times `sql` was executed.
    #[must_use]
    pub fn execution_count(&self, sql: &str) -> usize {
        self.shared
            .executions
            .lock()
            .iter()
            .filter(|e| e.sql == sql)
            .count()
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockDriver")
            .field("connects", &self.connects())
            .field("epoch", &self.shared.epoch.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl Driver for MockDriver {
    type Connection = MockConnection;

    fn connect(
        &self,
        endpoint: &str,
        _username: &str,
        _password: &str,
    ) -> Result<MockConnection, DbError> {
        self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.shared.connect_panics) {
            std::panic::panic_any(format!("driver crashed connecting to {endpoint}"));
        }
        if take_one(&self.shared.refusals) {
            return Err(DbError::new(
                CONNECT_REFUSED,
                format!("Can't connect to MySQL server on '{endpoint}'"),
            ));
        }

        let id = self.shared.next_connection.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(connection = id, endpoint, "mock connection opened");
        Ok(MockConnection {
            id,
            epoch: self.shared.epoch.load(Ordering::SeqCst),
            alive: Arc::new(AtomicBool::new(true)),
            shared: Arc::clone(&self.shared),
        })
    }
}

/// Connection handed out by [`MockDriver`].
pub struct MockConnection {
    id: u64,
    epoch: u64,
    alive: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl MockConnection {
    /// Connection id, unique per driver.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Connection for MockConnection {
    type Statement = MockStatement;

    fn select_schema(&mut self, schema: &str) -> Result<(), DbError> {
        self.shared.schemas.lock().push(schema.to_string());
        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.epoch == self.shared.epoch.load(Ordering::SeqCst)
    }

    fn prepare(&mut self, sql: &str) -> Result<MockStatement, DbError> {
        if !self.is_valid() {
            return Err(DbError::gone_away("MySQL server has gone away"));
        }
        self.shared.prepares.lock().push(Prepare {
            sql: sql.to_string(),
            connection: self.id,
        });
        Ok(MockStatement {
            sql: sql.to_string(),
            connection: self.id,
            epoch: self.epoch,
            params: Vec::new(),
            alive: Arc::clone(&self.alive),
            shared: Arc::clone(&self.shared),
        })
    }
}

/// Prepared statement handed out by [`MockConnection`].
pub struct MockStatement {
    sql: String,
    connection: u64,
    epoch: u64,
    params: Vec<Option<String>>,
    alive: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl MockStatement {
    fn run(&mut self, query: bool) -> Result<Option<MockCursor>, DbError> {
        if !self.alive.load(Ordering::SeqCst)
            || self.epoch != self.shared.epoch.load(Ordering::SeqCst)
        {
            return Err(DbError::gone_away("MySQL server has gone away"));
        }

        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| p.clone().unwrap_or_default())
            .collect();

        self.shared.enter_gate(&self.sql);
        self.shared.executions.lock().push(Execution {
            sql: self.sql.clone(),
            params: params.clone(),
            connection: self.connection,
            query,
        });
        if !self.shared.latency.is_zero() {
            std::thread::sleep(self.shared.latency);
        }

        match self.shared.respond(&self.sql, &params) {
            MockResponse::Rows(rows) => Ok(query.then(|| MockCursor::new(rows, params))),
            MockResponse::Affected(_) => Ok(query.then(|| MockCursor::new(Vec::new(), params))),
            MockResponse::Error { code, message } => {
                let err = DbError::new(code, message);
                if err.is_connection_loss() {
                    self.alive.store(false, Ordering::SeqCst);
                }
                Err(err)
            }
            MockResponse::Panic(message) => std::panic::panic_any(message),
            MockResponse::Custom(_) => Err(DbError::new(0, "nested custom response")),
        }
    }
}

impl Statement for MockStatement {
    type Cursor = MockCursor;

    fn bind_string(&mut self, position: usize, value: &str) -> Result<(), DbError> {
        if position == 0 {
            return Err(DbError::new(2034, "parameter positions start at 1"));
        }
        if self.params.len() < position {
            self.params.resize(position, None);
        }
        self.params[position - 1] = Some(value.to_string());
        Ok(())
    }

    fn execute_query(&mut self) -> Result<MockCursor, DbError> {
        self.run(true)?
            .ok_or_else(|| DbError::new(0, "query produced no cursor"))
    }

    fn execute(&mut self) -> Result<(), DbError> {
        self.run(false).map(|_| ())
    }
}
