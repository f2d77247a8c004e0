//! # query-pool-testing
//!
//! Test infrastructure for `query-pool`.
//!
//! ## Features
//!
//! - [`MockDriver`]: scripted in-memory driver with call recording
//! - Fault injection: connection loss, refused and panicking connects,
//!   driver panics, invalidated connections
//! - An execution gate to hold workers mid-task
//! - [`RecordingLogger`] to assert on operational log output
//!
//! ## Example
//!
//! ```rust,ignore
//! use query_pool::{ConnectOptions, Pool};
//! use query_pool_testing::{MockDriver, MockResponse, fast_config};
//!
//! let driver = MockDriver::new();
//! driver.script("SELECT 1", [MockResponse::gone_away()]);
//!
//! let pool = Pool::new(driver.clone(), ConnectOptions::new("mock://db"), fast_config())?;
//! assert!(pool.enqueue("SELECT 1", query_pool::NO_PARAMS).wait().is_ok());
//! assert_eq!(driver.connects(), 2);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock_driver;
pub mod recording_logger;

use std::time::{Duration, Instant};

use query_pool::PoolConfig;

pub use mock_driver::{
    CONNECT_REFUSED, Execution, MockConnection, MockCursor, MockDriver, MockDriverBuilder,
    MockResponse, MockStatement, Prepare, SYNTAX_ERROR,
};
pub use recording_logger::RecordingLogger;

/// Single-worker configuration with millisecond backoff and restart delay.
#[must_use]
pub fn fast_config() -> PoolConfig {
    PoolConfig::new()
        .worker_count(1)
        .reconnect_backoff(Duration::from_millis(10))
        .restart_delay(Duration::from_millis(10))
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Install a test-friendly `tracing` subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
