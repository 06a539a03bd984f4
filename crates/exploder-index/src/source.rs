//! Upstream chain-data source.
//!
//! The indexer never talks to a node directly; it pulls through
//! [`ChainSource`], implemented over JSON-RPC by the API binary and by
//! in-memory fakes in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use exploder_core::error::ExplorerError;
use exploder_core::types::RawBlock;

/// Metadata describing the upstream node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub version: u64,
    pub subversion: String,
    pub protocolversion: u64,
    pub connections: u64,
    /// Upstream chain height.
    pub blocks: u64,
    pub difficulty: f64,
}

/// Source of raw, consensus-valid blocks.
///
/// Failures should be reported as [`ExplorerError::Upstream`]; the sync
/// coordinator retries those with backoff.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Height of the upstream chain tip.
    async fn best_height(&self) -> Result<u64, ExplorerError>;

    /// Full block at `height`, transactions included.
    async fn block_at(&self, height: u64) -> Result<RawBlock, ExplorerError>;

    /// Upstream node metadata.
    async fn node_info(&self) -> Result<NodeInfo, ExplorerError>;
}
