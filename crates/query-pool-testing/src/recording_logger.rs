//! Log sink that keeps entries in memory for assertions.

use parking_lot::Mutex;
use query_pool::{Logger, Severity};

/// Collects every entry logged through it.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    entries: Mutex<Vec<(Severity, String)>>,
}

impl RecordingLogger {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry so far.
    #[must_use]
    pub fn entries(&self) -> Vec<(Severity, String)> {
        self.entries.lock().clone()
    }

    /// Messages logged at `severity`.
    #[must_use]
    pub fn messages(&self, severity: Severity) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(s, _)| *s == severity)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Check if any entry at `severity` contains `needle`.
    #[must_use]
    pub fn contains(&self, severity: Severity, needle: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|(s, m)| *s == severity && m.contains(needle))
    }

    /// Forget everything recorded.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Logger for RecordingLogger {
    fn log(&self, severity: Severity, message: &str) {
        tracing::trace!(%severity, message, "recorded log entry");
        self.entries.lock().push((severity, message.to_string()));
    }
}
