//! Engine configuration.

use std::time::Duration;

/// Default maximum nesting depth of relational fields.
pub const DEFAULT_MAX_RELATIONAL_DEPTH: usize = 10;

/// Default number of parent keys per nested sub-query.
pub const DEFAULT_RELATIONAL_BATCH_SIZE: usize = 25_000;

/// Default number of sibling sub-queries in flight at once.
pub const DEFAULT_MAX_CONCURRENT_SUBQUERIES: usize = 4;

/// Default request timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Default lifetime of cached dynamic-variable lookups in seconds.
pub const DEFAULT_DYNAMIC_CACHE_TTL_SECS: u64 = 10;

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(DEFAULT_MAX_CONCURRENT_SUBQUERIES)
        .clamp(1, DEFAULT_MAX_CONCURRENT_SUBQUERIES * 4)
}

/// Query engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Limit applied to root queries that do not set one. `None` returns every row.
    pub default_limit: Option<u64>,

    /// Maximum depth of nested relational fields.
    pub max_relational_depth: usize,

    /// Maximum number of parent keys bound into one nested sub-query.
    pub relational_batch_size: usize,

    /// Maximum number of sibling sub-queries executing concurrently.
    pub max_concurrent_subqueries: usize,

    /// Time budget of a whole request. `None` disables the timeout.
    pub query_timeout: Option<Duration>,

    /// Lifetime of cached `$CURRENT_USER.*` / `$CURRENT_ROLE.*` lookups.
    pub dynamic_cache_ttl: Duration,
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            default_limit: None,
            max_relational_depth: DEFAULT_MAX_RELATIONAL_DEPTH,
            relational_batch_size: DEFAULT_RELATIONAL_BATCH_SIZE,
            max_concurrent_subqueries: default_concurrency(),
            query_timeout: Some(Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS)),
            dynamic_cache_ttl: Duration::from_secs(DEFAULT_DYNAMIC_CACHE_TTL_SECS),
        }
    }

    /// Set the default root limit.
    pub fn with_default_limit(mut self, limit: u64) -> Self {
        self.default_limit = Some(limit);
        self
    }

    /// Set the maximum relational depth.
    pub fn with_max_relational_depth(mut self, depth: usize) -> Self {
        self.max_relational_depth = depth.max(1);
        self
    }

    /// Set the nested sub-query batch size.
    pub fn with_relational_batch_size(mut self, size: usize) -> Self {
        self.relational_batch_size = size.max(1);
        self
    }

    /// Set the sub-query concurrency.
    pub fn with_max_concurrent_subqueries(mut self, count: usize) -> Self {
        self.max_concurrent_subqueries = count.max(1);
        self
    }

    /// Set the request timeout.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Disable the request timeout.
    pub fn without_query_timeout(mut self) -> Self {
        self.query_timeout = None;
        self
    }

    /// Set the dynamic-variable cache TTL.
    pub fn with_dynamic_cache_ttl(mut self, ttl: Duration) -> Self {
        self.dynamic_cache_ttl = ttl;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
