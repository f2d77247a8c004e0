//! Operational log sinks.
//!
//! The pool reports connection failures, retries and worker crashes through
//! a [`Logger`] handed to it at construction. Its own fine-grained
//! diagnostics always go through `tracing`.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Local, NaiveDate, NaiveDateTime};
use parking_lot::Mutex;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// Routine information.
    Info,
    /// Something went wrong but was recovered from.
    Warning,
    /// An operation failed.
    Error,
    /// Security-relevant event.
    Security,
}

impl Severity {
    /// All severities, in increasing order.
    pub const ALL: [Severity; 4] = [
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Security,
    ];

    /// Label used inside log lines.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Security => "SECURITY",
        }
    }

    /// Stem used in log file names.
    #[must_use]
    pub fn file_stem(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Security => "security",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sink for operational log entries.
///
/// Implementations must be callable from every worker thread at once.
pub trait Logger: Send + Sync {
    /// Record one entry.
    fn log(&self, severity: Severity, message: &str);
}

impl<L: Logger + ?Sized> Logger for Arc<L> {
    fn log(&self, severity: Severity, message: &str) {
        (**self).log(severity, message);
    }
}

impl<L: Logger + ?Sized> Logger for &L {
    fn log(&self, severity: Severity, message: &str) {
        (**self).log(severity, message);
    }
}

/// Forwards entries to `tracing` events. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => tracing::info!(target: "query_pool", "{message}"),
            Severity::Warning => tracing::warn!(target: "query_pool", "{message}"),
            Severity::Error => tracing::error!(target: "query_pool", "{message}"),
            Severity::Security => {
                tracing::warn!(target: "query_pool::security", security = true, "{message}");
            }
        }
    }
}

/// Discards every entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _severity: Severity, _message: &str) {}
}

struct OpenFiles {
    date: Option<NaiveDate>,
    files: HashMap<Severity, File>,
}

/// Writes one file per severity per local calendar day.
///
/// Entries land in `<dir>/<severity>_<YYYY-MM-DD>.log` as
/// `[YYYY-MM-DD HH:MM:SS] [LEVEL] message`. Files are opened in append mode
/// and flushed after every entry; when the local date changes, the previous
/// day's files are closed and new ones opened on the next write.
pub struct DailyFileLogger {
    dir: PathBuf,
    console: AtomicBool,
    state: Mutex<OpenFiles>,
}

impl DailyFileLogger {
    /// Create a logger writing under `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            console: AtomicBool::new(false),
            state: Mutex::new(OpenFiles {
                date: None,
                files: HashMap::new(),
            }),
        })
    }

    /// Also echo every entry to standard output.
    #[must_use]
    pub fn with_console(self, enabled: bool) -> Self {
        self.set_console_output(enabled);
        self
    }

    /// Switch console echo on or off.
    pub fn set_console_output(&self, enabled: bool) {
        self.console.store(enabled, Ordering::Relaxed);
    }

    /// Check if console echo is on.
    #[must_use]
    pub fn console_output(&self) -> bool {
        self.console.load(Ordering::Relaxed)
    }

    /// Directory the log files are written to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `severity` entries for `date`.
    #[must_use]
    pub fn file_path(&self, severity: Severity, date: NaiveDate) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.log",
            severity.file_stem(),
            date.format("%Y-%m-%d")
        ))
    }

    fn write_entry(&self, severity: Severity, message: &str, now: NaiveDateTime) -> io::Result<()> {
        self.write_entry_with(severity, message, now, || io::stdout().lock())
    }

    /// Write to the day's file, then echo to `console` if enabled.
    ///
    /// A failed echo is only traced; the file write decides the result.
    fn write_entry_with<W: Write>(
        &self,
        severity: Severity,
        message: &str,
        now: NaiveDateTime,
        console: impl FnOnce() -> W,
    ) -> io::Result<()> {
        let line = format_line(severity, message, now);
        let today = now.date();

        let mut state = self.state.lock();
        if state.date != Some(today) {
            if state.date.is_some() {
                tracing::debug!(date = %today, "rotating log files");
            }
            state.files.clear();
            state.date = Some(today);
        }

        let file = match state.files.entry(severity) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                fs::create_dir_all(&self.dir)?;
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.file_path(severity, today))?;
                entry.insert(file)
            }
        };
        file.write_all(line.as_bytes())?;
        file.flush()?;
        drop(state);

        if self.console_output() {
            let mut out = console();
            if let Err(err) = out.write_all(line.as_bytes()).and_then(|()| out.flush()) {
                tracing::trace!(error = %err, "console echo failed");
            }
        }
        Ok(())
    }
}

impl Logger for DailyFileLogger {
    fn log(&self, severity: Severity, message: &str) {
        if let Err(err) = self.write_entry(severity, message, Local::now().naive_local()) {
            tracing::warn!(error = %err, dir = %self.dir.display(), "failed to write log entry");
        }
    }
}

impl fmt::Debug for DailyFileLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DailyFileLogger")
            .field("dir", &self.dir)
            .field("console", &self.console_output())
            .finish()
    }
}

fn format_line(severity: Severity, message: &str, now: NaiveDateTime) -> String {
    format!(
        "[{}] [{}] {}\n",
        now.format("%Y-%m-%d %H:%M:%S"),
        severity.as_str(),
        message
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn temp_dir(name: &str) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "query-pool-{name}-{}-{n}",
            std::process::id()
        ))
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn test_severity_labels() {
        assert_eq!(Severity::Info.as_str(), "INFO");
        assert_eq!(Severity::Warning.as_str(), "WARNING");
        assert_eq!(Severity::Error.to_string(), "ERROR");
        assert_eq!(Severity::Security.file_stem(), "security");
        assert_eq!(Severity::ALL.len(), 4);
    }

    #[test]
    fn test_format_line() {
        let line = format_line(Severity::Error, "boom", at(2024, 3, 9, 7, 5, 1));
        assert_eq!(line, "[2024-03-09 07:05:01] [ERROR] boom\n");
    }

    #[test]
    fn test_entries_go_to_per_severity_files() {
        let dir = temp_dir("severity");
        let logger = DailyFileLogger::new(&dir).unwrap();
        let now = at(2024, 3, 9, 12, 0, 0);

        logger.write_entry(Severity::Error, "first", now).unwrap();
        logger.write_entry(Severity::Error, "second", now).unwrap();
        logger.write_entry(Severity::Warning, "careful", now).unwrap();

        let date = now.date();
        let errors = fs::read_to_string(logger.file_path(Severity::Error, date)).unwrap();
        assert_eq!(
            errors,
            "[2024-03-09 12:00:00] [ERROR] first\n[2024-03-09 12:00:00] [ERROR] second\n"
        );
        let warnings = fs::read_to_string(dir.join("warning_2024-03-09.log")).unwrap();
        assert_eq!(warnings, "[2024-03-09 12:00:00] [WARNING] careful\n");
        assert!(!logger.file_path(Severity::Info, date).exists());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_rotates_at_date_boundary() {
        let dir = temp_dir("rotate");
        let logger = DailyFileLogger::new(&dir).unwrap();

        logger
            .write_entry(Severity::Info, "late", at(2024, 3, 9, 23, 59, 59))
            .unwrap();
        logger
            .write_entry(Severity::Info, "early", at(2024, 3, 10, 0, 0, 0))
            .unwrap();

        let day_one = fs::read_to_string(dir.join("info_2024-03-09.log")).unwrap();
        let day_two = fs::read_to_string(dir.join("info_2024-03-10.log")).unwrap();
        assert!(day_one.contains("late"));
        assert!(!day_one.contains("early"));
        assert!(day_two.contains("early"));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_appends_across_instances() {
        let dir = temp_dir("append");
        let now = at(2024, 1, 1, 0, 0, 0);

        DailyFileLogger::new(&dir)
            .unwrap()
            .write_entry(Severity::Security, "one", now)
            .unwrap();
        DailyFileLogger::new(&dir)
            .unwrap()
            .write_entry(Severity::Security, "two", now)
            .unwrap();

        let contents = fs::read_to_string(dir.join("security_2024-01-01.log")).unwrap();
        assert_eq!(contents.lines().count(), 2);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_console_toggle() {
        let dir = temp_dir("console");
        let logger = DailyFileLogger::new(&dir).unwrap().with_console(true);
        assert!(logger.console_output());
        logger.set_console_output(false);
        assert!(!logger.console_output());
        fs::remove_dir_all(dir).unwrap();
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn test_console_failure_still_writes_file() {
        let dir = temp_dir("broken-console");
        let logger = DailyFileLogger::new(&dir).unwrap().with_console(true);
        let now = at(2024, 3, 9, 8, 0, 0);

        logger
            .write_entry_with(Severity::Error, "kept", now, || BrokenPipe)
            .unwrap();

        let contents = fs::read_to_string(dir.join("error_2024-03-09.log")).unwrap();
        assert_eq!(contents, "[2024-03-09 08:00:00] [ERROR] kept\n");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_console_echo_matches_file_line() {
        let dir = temp_dir("echo");
        let logger = DailyFileLogger::new(&dir).unwrap().with_console(true);
        let now = at(2024, 3, 9, 8, 0, 0);

        let mut echoed = Vec::new();
        let out = &mut echoed;
        logger
            .write_entry_with(Severity::Info, "hello", now, move || out)
            .unwrap();

        assert_eq!(echoed, b"[2024-03-09 08:00:00] [INFO] hello\n");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_log_uses_current_date() {
        let dir = temp_dir("now");
        let logger = DailyFileLogger::new(&dir).unwrap();
        logger.log(Severity::Info, "hello");

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_shared_logger_forwarding() {
        let logger: Arc<dyn Logger> = Arc::new(NullLogger);
        logger.log(Severity::Info, "ignored");
        TracingLogger.log(Severity::Security, "audited");
    }
}
