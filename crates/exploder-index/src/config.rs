//! Indexer configuration.
//!
//! Provides [`IndexerConfig`] with defaults for the data directory, page
//! bounds, sync cadence and the upstream retry policy.

use std::path::PathBuf;
use std::time::Duration;

use exploder_core::constants::{DEFAULT_ADDRESS_PAGE_SIZE, DEFAULT_MAX_PAGE_LIMIT, DEFAULT_PAGE_LIMIT};
use exploder_core::pagination::PageLimits;

/// Bounded exponential backoff for upstream fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per fetch, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Configuration for the indexer and query engine.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Bounds for `limit` parameters.
    pub page_limits: PageLimits,
    /// Transactions per page in the address view.
    pub address_page_size: u64,
    /// Pause between sync cycles once caught up.
    pub poll_interval: Duration,
    /// Most blocks applied per sync cycle before yielding.
    pub sync_batch_size: u64,
    /// Retry policy for upstream fetch failures.
    pub retry: RetryPolicy,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("exploder");

        Self {
            data_dir,
            page_limits: PageLimits {
                default_limit: DEFAULT_PAGE_LIMIT,
                max_limit: DEFAULT_MAX_PAGE_LIMIT,
            },
            address_page_size: DEFAULT_ADDRESS_PAGE_SIZE,
            poll_interval: Duration::from_secs(10),
            sync_batch_size: 500,
            retry: RetryPolicy::default(),
        }
    }
}

impl IndexerConfig {
    /// Path to the RocksDB index directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("index")
    }
}
