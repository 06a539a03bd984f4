//! Chain builders and an in-memory chain source shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use exploder_core::address::Address;
use exploder_core::error::ExplorerError;
use exploder_core::types::{Hash256, RawBlock, RawTransaction, TxInput, TxOutput};
use exploder_index::source::{ChainSource, NodeInfo};
use exploder_index::{IndexDb, IndexerConfig, QueryEngine, RetryPolicy, SyncCoordinator};

/// A well-formed address: base58 of 25 identical bytes.
pub fn addr(seed: u8) -> Address {
    assert!(seed > 0, "leading zero bytes shorten the encoding");
    Address::parse(&bs58::encode([seed; 25]).into_string()).unwrap()
}

pub fn hash(tag: u8, n: u64) -> Hash256 {
    let mut bytes = [tag; 32];
    bytes[24..].copy_from_slice(&n.to_be_bytes());
    Hash256(bytes)
}

fn outputs(pays: &[(u64, &Address)]) -> Vec<TxOutput> {
    pays.iter()
        .enumerate()
        .map(|(n, (value, address))| TxOutput {
            value: *value,
            n: n as u32,
            addresses: vec![(*address).clone()],
        })
        .collect()
}

pub fn coinbase(txid: Hash256, pays: &[(u64, &Address)]) -> RawTransaction {
    RawTransaction {
        txid,
        vin: vec![TxInput::Coinbase {
            coinbase: hex_tag(&txid),
        }],
        vout: outputs(pays),
    }
}

pub fn spend(txid: Hash256, inputs: &[(Hash256, u32)], pays: &[(u64, &Address)]) -> RawTransaction {
    RawTransaction {
        txid,
        vin: inputs
            .iter()
            .map(|(txid, vout)| TxInput::Spend {
                txid: *txid,
                vout: *vout,
            })
            .collect(),
        vout: outputs(pays),
    }
}

fn hex_tag(txid: &Hash256) -> String {
    txid.to_string()[..8].to_string()
}

/// Builds a linked chain; block hashes are `hash(0xB0, height)`.
#[derive(Default)]
pub struct ChainBuilder {
    pub blocks: Vec<RawBlock>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_height(&self) -> u64 {
        self.blocks.len() as u64
    }

    /// Append a block holding `txs` and return a copy of it.
    pub fn push(&mut self, txs: Vec<RawTransaction>) -> RawBlock {
        let height = self.next_height();
        let block = RawBlock {
            hash: hash(0xB0, height),
            height,
            previousblockhash: self.blocks.last().map(|b| b.hash),
            time: 1_600_000_000 + height * 60,
            size: 250,
            difficulty: 1.5,
            tx: txs,
        };
        self.blocks.push(block.clone());
        block
    }

    /// Append a block with just a coinbase paying `value` to `to`.
    pub fn push_coinbase(&mut self, value: u64, to: &Address) -> RawBlock {
        let height = self.next_height();
        self.push(vec![coinbase(hash(0xC0, height), &[(value, to)])])
    }
}

pub fn fast_config(dir: &tempfile::TempDir) -> IndexerConfig {
    IndexerConfig {
        data_dir: dir.path().to_path_buf(),
        poll_interval: Duration::from_millis(10),
        retry: RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        ..IndexerConfig::default()
    }
}

/// A database, a coordinator over `source`, and a query engine sharing its progress.
pub struct Harness {
    pub db: Arc<IndexDb>,
    pub source: Arc<MemorySource>,
    pub sync: Arc<SyncCoordinator>,
    pub query: QueryEngine,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_source(MemorySource::default(), |c| c)
    }

    pub fn with_source(source: MemorySource, tweak: impl FnOnce(IndexerConfig) -> IndexerConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = tweak(fast_config(&dir));
        let db = Arc::new(IndexDb::open(config.db_path()).unwrap());
        let source = Arc::new(source);
        let sync = Arc::new(SyncCoordinator::new(
            Arc::clone(&db),
            Arc::clone(&source) as Arc<dyn ChainSource>,
            config.clone(),
        ));
        let query = QueryEngine::new(Arc::clone(&db), &config).with_progress(sync.progress());
        Self {
            db,
            source,
            sync,
            query,
            dir,
        }
    }

    pub fn tip_height(&self) -> Option<u64> {
        self.db.view().unwrap().tip().map(|t| t.height)
    }
}

/// Chain source serving a fixed list of blocks, with injectable failures.
#[derive(Default)]
pub struct MemorySource {
    blocks: Mutex<Vec<RawBlock>>,
    failures: AtomicU32,
}

impl MemorySource {
    pub fn new(blocks: Vec<RawBlock>) -> Self {
        Self {
            blocks: Mutex::new(blocks),
            failures: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` block fetches with an upstream error.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn set_blocks(&self, blocks: Vec<RawBlock>) {
        *self.blocks.lock() = blocks;
    }
}

#[async_trait]
impl ChainSource for MemorySource {
    async fn best_height(&self) -> Result<u64, ExplorerError> {
        let len = self.blocks.lock().len() as u64;
        len.checked_sub(1)
            .ok_or_else(|| ExplorerError::Upstream("no blocks".into()))
    }

    async fn block_at(&self, height: u64) -> Result<RawBlock, ExplorerError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ExplorerError::Upstream("connection refused".into()));
        }
        self.blocks
            .lock()
            .get(height as usize)
            .cloned()
            .ok_or_else(|| ExplorerError::Upstream(format!("no block at {height}")))
    }

    async fn node_info(&self) -> Result<NodeInfo, ExplorerError> {
        Ok(NodeInfo {
            version: 1,
            subversion: "/memory:0.1/".into(),
            blocks: self.blocks.lock().len() as u64,
            ..NodeInfo::default()
        })
    }
}
