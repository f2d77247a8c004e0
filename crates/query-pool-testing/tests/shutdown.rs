//! Shutdown tests: draining, aborting, rejecting late submissions and
//! joining workers.
//!
//! Run with:
//! ```bash
//! cargo test -p query-pool-testing --test shutdown
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use query_pool::{
    NO_PARAMS, Pool, PoolConfig, PoolError, QueryOutcome, Severity, ShutdownMode, WorkerState,
};
use query_pool_testing::{
    MockDriver, RecordingLogger, fast_config, init_tracing, wait_until,
};

const WAIT: Duration = Duration::from_secs(5);

fn start(driver: &MockDriver, config: PoolConfig) -> (Pool<MockDriver>, Arc<RecordingLogger>) {
    init_tracing();
    let logger = Arc::new(RecordingLogger::new());
    let pool = Pool::builder(driver.clone())
        .endpoint("mock://db")
        .config(config)
        .shared_logger(logger.clone())
        .build()
        .expect("pool should start");
    (pool, logger)
}

/// Hold the single worker on the first task, queue `extra` more, shut the
/// pool down from another thread and release the worker once the pool is
/// closed.
fn shutdown_with_backlog(mode: ShutdownMode, extra: usize) -> (MockDriver, Vec<String>) {
    let driver = MockDriver::new();
    driver.pause();
    let (pool, _logger) = start(&driver, fast_config().shutdown_mode(mode));

    let first = pool.enqueue("UPDATE t SET n = 0", NO_PARAMS);
    assert!(driver.wait_for_started(1, WAIT));
    let rest: Vec<_> = (1..=extra)
        .map(|i| pool.enqueue(format!("UPDATE t SET n = {i}"), NO_PARAMS))
        .collect();

    thread::scope(|scope| {
        let closer = scope.spawn(|| pool.shutdown());
        assert!(wait_until(WAIT, || pool.is_closed()));
        driver.resume();
        closer.join().unwrap();
    });

    assert!(matches!(first.wait(), Ok(QueryOutcome::Executed)));
    let outcomes = rest
        .into_iter()
        .map(|future| match future.wait() {
            Ok(QueryOutcome::Executed) => "executed".to_string(),
            Err(PoolError::PoolClosed) => "closed".to_string(),
            other => format!("{other:?}"),
        })
        .collect();
    (driver, outcomes)
}

// =============================================================================
// Queued tasks
// =============================================================================

#[test]
fn test_drain_runs_queued_tasks() {
    let (driver, outcomes) = shutdown_with_backlog(ShutdownMode::Drain, 3);
    assert_eq!(outcomes, ["executed", "executed", "executed"]);
    assert_eq!(driver.executions().len(), 4);
}

#[test]
fn test_abort_fails_queued_tasks() {
    let (driver, outcomes) = shutdown_with_backlog(ShutdownMode::Abort, 3);
    assert_eq!(outcomes, ["closed", "closed", "closed"]);
    assert_eq!(driver.executions().len(), 1);
}

#[test]
fn test_enqueue_after_shutdown_is_rejected() {
    let driver = MockDriver::new();
    let (pool, logger) = start(&driver, fast_config());
    pool.shutdown();

    let future = pool.enqueue("SELECT 1", NO_PARAMS);
    assert!(matches!(future.wait(), Err(PoolError::PoolClosed)));
    assert!(driver.executions().is_empty());
    assert!(logger.contains(Severity::Info, "Shutting down"));
}

#[test]
fn test_shutdown_while_connecting() {
    let driver = MockDriver::new();
    driver.refuse_connects(u32::MAX);
    let (pool, _logger) = start(
        &driver,
        fast_config()
            .worker_count(2)
            .reconnect_backoff(Duration::from_secs(60)),
    );

    let queued = pool.enqueue("SELECT 1", NO_PARAMS);
    assert!(wait_until(WAIT, || driver.connect_attempts() >= 2));

    let started = Instant::now();
    pool.shutdown();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(matches!(queued.wait(), Err(PoolError::PoolClosed)));
}

#[test]
fn test_unbounded_backoff_and_restart_delay() {
    let driver = MockDriver::new();
    driver.refuse_connects(u32::MAX);
    let (pool, logger) = start(
        &driver,
        fast_config()
            .worker_count(2)
            .reconnect_backoff(Duration::MAX)
            .restart_delay(Duration::MAX),
    );

    let queued = pool.enqueue("SELECT 1", NO_PARAMS);
    assert!(wait_until(WAIT, || driver.connect_attempts() >= 2));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(pool.status().restarts(), 0);
    assert!(!logger.contains(Severity::Error, "crashed"));

    pool.shutdown();
    assert!(matches!(queued.wait(), Err(PoolError::PoolClosed)));
    assert!(
        pool.status()
            .workers
            .iter()
            .all(|w| w.state == WorkerState::Stopped)
    );
}

#[test]
fn test_shutdown_during_unbounded_restart_delay() {
    let driver = MockDriver::new();
    driver.panic_on_connect(1);
    let (pool, _logger) = start(&driver, fast_config().restart_delay(Duration::MAX));

    assert!(wait_until(WAIT, || pool.status().restarts() == 1));
    pool.shutdown();
    assert_eq!(pool.status().workers[0].state, WorkerState::Stopped);
}

#[test]
fn test_shutdown_during_reconnect_fails_held_task() {
    let driver = MockDriver::new();
    let (pool, _logger) = start(
        &driver,
        fast_config().reconnect_backoff(Duration::from_secs(60)),
    );
    assert!(wait_until(WAIT, || pool.status().idle() == 1));

    driver.kill_connections();
    driver.refuse_connects(u32::MAX);
    let held = pool.enqueue("SELECT 1", NO_PARAMS);
    assert!(wait_until(WAIT, || driver.connect_attempts() >= 2));

    pool.shutdown();
    assert!(matches!(held.wait(), Err(PoolError::PoolClosed)));
}

// =============================================================================
// Workers
// =============================================================================

#[test]
fn test_shutdown_stops_every_worker() {
    let driver = MockDriver::new();
    let (pool, _logger) = start(&driver, fast_config().worker_count(4));
    assert!(wait_until(WAIT, || pool.status().idle() == 4));

    let futures: Vec<_> = (0..20)
        .map(|i| pool.enqueue("INSERT INTO t VALUES (?)", [i.to_string()]))
        .collect();
    pool.shutdown();

    for future in futures {
        assert!(future.wait().is_ok());
    }
    let status = pool.status();
    assert!(status.closed);
    assert_eq!(status.queued, 0);
    assert!(
        status
            .workers
            .iter()
            .all(|w| w.state == WorkerState::Stopped)
    );
}

#[test]
fn test_shutdown_is_idempotent() {
    let driver = MockDriver::new();
    let (pool, logger) = start(&driver, fast_config().worker_count(2));

    pool.shutdown();
    pool.shutdown();
    assert!(pool.is_closed());
    assert_eq!(logger.messages(Severity::Info).len(), 1);
}

#[test]
fn test_concurrent_shutdown_waits_for_workers() {
    let driver = MockDriver::new();
    driver.pause();
    let (pool, logger) = start(&driver, fast_config());

    let first = pool.enqueue("UPDATE t SET n = 0", NO_PARAMS);
    assert!(driver.wait_for_started(1, WAIT));
    let rest: Vec<_> = (1..=3)
        .map(|i| pool.enqueue(format!("UPDATE t SET n = {i}"), NO_PARAMS))
        .collect();

    thread::scope(|scope| {
        let closer = scope.spawn(|| pool.shutdown());
        assert!(wait_until(WAIT, || pool.is_closed()));

        let second = scope.spawn(|| {
            pool.shutdown();
            pool.status()
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!second.is_finished());

        driver.resume();
        let status = second.join().unwrap();
        assert!(
            status
                .workers
                .iter()
                .all(|w| w.state == WorkerState::Stopped)
        );
        closer.join().unwrap();
    });

    assert!(first.wait().is_ok());
    for future in rest {
        assert!(matches!(future.wait(), Ok(QueryOutcome::Executed)));
    }
    assert_eq!(driver.executions().len(), 4);
    assert_eq!(logger.messages(Severity::Info).len(), 1);
}

#[test]
fn test_drop_joins_workers() {
    let driver = MockDriver::new();
    let (pool, _logger) = start(&driver, fast_config().worker_count(2));
    let future = pool.enqueue("SELECT 1", NO_PARAMS);

    drop(pool);
    assert!(future.wait().is_ok());
}
