//! # exploder-index: chain indexing and query engine.
//!
//! Turns an append-only chain of blocks into random-access structures:
//! - [`chain::ChainStore`]: blocks and transactions by hash, height and sequence
//! - [`utxo::UtxoIndex`]: output spent-state, balances, volumes, unspent sets
//! - [`address_index::AddressIndex`]: per-address transaction lists
//! - [`sync::SyncCoordinator`]: the single writer applying blocks atomically
//! - [`query::QueryEngine`]: validated, read-only access for the API layer
//!
//! All three stores share one RocksDB instance ([`store::IndexDb`]); a block is
//! staged in a [`batch::BlockBatch`] and committed as one `WriteBatch`.

pub mod address_index;
pub mod batch;
pub mod chain;
pub mod config;
pub mod history;
pub mod query;
pub mod source;
pub mod store;
pub mod sync;
pub mod utxo;

pub use config::{IndexerConfig, RetryPolicy};
pub use query::QueryEngine;
pub use source::ChainSource;
pub use store::IndexDb;
pub use sync::SyncCoordinator;
