//! Per-worker prepared statement cache.
//!
//! Each worker keeps its own cache next to its connection. Entries are keyed
//! by the exact SQL text (no normalization: `SELECT 1` and `select 1` are two
//! entries) and hold the driver's prepared statement handle.
//!
//! ## Lifecycle
//!
//! 1. First execution of a statement prepares it and inserts the handle
//! 2. Later executions of the same text on the same connection reuse it
//! 3. When a capacity is configured, the least recently used handle is dropped
//! 4. A reconnect clears the cache: handles never outlive their connection

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::error::DbError;

/// Cache of prepared statements keyed by SQL text.
///
/// Unbounded by default, so the cache only grows between reconnects.
pub struct StatementCache<S> {
    cache: LruCache<String, S>,
    enabled: bool,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<S> StatementCache<S> {
    /// Create an unbounded cache.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::with_cache(LruCache::unbounded(), true)
    }

    /// Create a cache holding at most `max_size` statements.
    #[must_use]
    pub fn bounded(max_size: NonZeroUsize) -> Self {
        Self::with_cache(LruCache::new(max_size), true)
    }

    /// Create a cache from configuration.
    ///
    /// A disabled cache still holds the statement currently being executed,
    /// but every lookup misses and every insert replaces it.
    #[must_use]
    pub fn from_config(config: &StatementCacheConfig) -> Self {
        if !config.enabled {
            return Self::with_cache(LruCache::new(NonZeroUsize::MIN), false);
        }
        match config.max_size.and_then(NonZeroUsize::new) {
            Some(max_size) => Self::bounded(max_size),
            None => Self::unbounded(),
        }
    }

    fn with_cache(cache: LruCache<String, S>, enabled: bool) -> Self {
        Self {
            cache,
            enabled,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Return the cached statement for `sql`, preparing and caching it on a
    /// miss.
    ///
    /// A failed prepare leaves the cache untouched.
    pub fn get_or_prepare<F>(&mut self, sql: &str, prepare: F) -> Result<&mut S, DbError>
    where
        F: FnOnce(&str) -> Result<S, DbError>,
    {
        let max_size = self.cache.cap().get();
        let mut evicts = false;
        if self.enabled && self.cache.contains(sql) {
            self.hits += 1;
            tracing::trace!(sql = sql, "statement cache hit");
        } else {
            self.misses += 1;
            tracing::trace!(sql = sql, "statement cache miss");
            if self.enabled {
                evicts = self.cache.len() >= max_size;
            } else {
                self.cache.clear();
            }
        }

        let statement = self
            .cache
            .try_get_or_insert_mut(sql.to_owned(), || prepare(sql))?;
        if evicts {
            self.evictions += 1;
            tracing::debug!(max_size = max_size, "evicted least recently used statement");
        }
        Ok(statement)
    }

    /// Check if `sql` has a cached statement, without touching LRU order.
    #[must_use]
    pub fn contains(&self, sql: &str) -> bool {
        self.enabled && self.cache.contains(sql)
    }

    /// Remove the cached statement for `sql`.
    pub fn remove(&mut self, sql: &str) -> Option<S> {
        self.cache.pop(sql)
    }

    /// Drop every cached statement, returning how many were held.
    ///
    /// Called whenever the owning connection is replaced.
    pub fn clear(&mut self) -> usize {
        let count = self.cache.len();
        self.cache.clear();
        if count > 0 {
            tracing::debug!(count = count, "cleared statement cache");
        }
        count
    }

    /// Get the number of cached statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Get the capacity, or `None` if unbounded.
    #[must_use]
    pub fn max_size(&self) -> Option<usize> {
        let cap = self.cache.cap().get();
        (cap != usize::MAX).then_some(cap)
    }

    /// Check if caching is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Get the number of cache hits.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Get the number of cache misses.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Get the number of capacity evictions.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Get the cache hit ratio (0.0 to 1.0).
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Reset cache statistics.
    pub fn reset_stats(&mut self) {
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
    }
}

impl<S> std::fmt::Debug for StatementCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementCache")
            .field("len", &self.cache.len())
            .field("max_size", &self.max_size())
            .field("enabled", &self.enabled)
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}

/// Configuration for statement caching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementCacheConfig {
    /// Whether statement caching is enabled.
    pub enabled: bool,
    /// Maximum number of statements per worker, `None` for unbounded.
    pub max_size: Option<usize>,
}

impl Default for StatementCacheConfig {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl StatementCacheConfig {
    /// Unbounded caching (the default).
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            enabled: true,
            max_size: None,
        }
    }

    /// Create a new configuration with caching disabled.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_size: None,
        }
    }

    /// Create a new configuration with a custom max size.
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            enabled: true,
            max_size: Some(max_size),
        }
    }
}
