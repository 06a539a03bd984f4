//! Staging area for one block's effects across all stores.
//!
//! RocksDB write batches are not readable, so state a later transaction in the
//! same block depends on (outputs created or spent earlier in the block,
//! running address aggregates) is kept in overlays here. [`BlockBatch::finish`]
//! flushes the overlays into the `WriteBatch`; dropping the batch instead
//! discards every staged effect.

use std::collections::{HashMap, HashSet};

use rocksdb::WriteBatch;

use exploder_core::error::ExplorerError;
use exploder_core::types::{AddressStats, Hash256, OutPoint, OutputEntry};

use crate::store::{
    encode, IndexDb, ReadView, CF_ADDRESS_STATS, CF_METADATA, CF_OUTPUTS,
    META_TX_COUNT, META_VERSION,
};

/// Effects of one block, staged but not yet visible to readers.
pub struct BlockBatch<'a> {
    pub(crate) db: &'a IndexDb,
    /// View of the committed state the block is applied on top of.
    pub(crate) base: ReadView<'a>,
    pub(crate) writes: WriteBatch,
    outputs: HashMap<OutPoint, OutputEntry>,
    stats: HashMap<[u8; 32], AddressStats>,
    touched: HashSet<([u8; 32], Hash256)>,
    txids: HashSet<Hash256>,
    next_tx_sequence: u64,
}

impl<'a> BlockBatch<'a> {
    /// Start staging on top of the current committed state.
    pub fn begin(db: &'a IndexDb) -> Result<Self, ExplorerError> {
        let base = db.view()?;
        let next_tx_sequence = base.chain().tx_count;
        Ok(Self {
            db,
            base,
            writes: WriteBatch::default(),
            outputs: HashMap::new(),
            stats: HashMap::new(),
            touched: HashSet::new(),
            txids: HashSet::new(),
            next_tx_sequence,
        })
    }

    /// Claim the next global transaction sequence number.
    pub(crate) fn take_tx_sequence(&mut self) -> u64 {
        let seq = self.next_tx_sequence;
        self.next_tx_sequence += 1;
        seq
    }

    /// Record a txid staged in this block; `false` if already staged.
    pub(crate) fn stage_txid(&mut self, txid: Hash256) -> bool {
        self.txids.insert(txid)
    }

    /// Look up an output, preferring state staged in this block.
    pub(crate) fn output(&self, outpoint: &OutPoint) -> Result<Option<OutputEntry>, ExplorerError> {
        if let Some(entry) = self.outputs.get(outpoint) {
            return Ok(Some(entry.clone()));
        }
        self.base.get(CF_OUTPUTS, &outpoint_key(outpoint))
    }

    pub(crate) fn put_output(&mut self, outpoint: OutPoint, entry: OutputEntry) {
        self.outputs.insert(outpoint, entry);
    }

    /// Mutable aggregates for an address, loaded on first use.
    pub(crate) fn stats_mut(&mut self, key: [u8; 32]) -> Result<&mut AddressStats, ExplorerError> {
        if !self.stats.contains_key(&key) {
            let committed: AddressStats = self.base.get(CF_ADDRESS_STATS, &key)?.unwrap_or_default();
            self.stats.insert(key, committed);
        }
        self.stats
            .get_mut(&key)
            .ok_or_else(|| ExplorerError::Storage("address stats overlay missing".into()))
    }

    /// Record an (address, tx) pair; `false` if it was already recorded.
    pub(crate) fn touch(&mut self, key: [u8; 32], txid: Hash256) -> bool {
        self.touched.insert((key, txid))
    }

    /// Flush overlays and chain counters into the underlying write batch.
    pub fn finish(mut self) -> Result<WriteBatch, ExplorerError> {
        let cf_outputs = self.db.cf_handle(CF_OUTPUTS)?;
        for (outpoint, entry) in &self.outputs {
            self.writes.put_cf(cf_outputs, outpoint_key(outpoint), encode(entry)?);
        }

        let cf_stats = self.db.cf_handle(CF_ADDRESS_STATS)?;
        for (key, stats) in &self.stats {
            self.writes.put_cf(cf_stats, key, encode(stats)?);
        }

        let cf_meta = self.db.cf_handle(CF_METADATA)?;
        self.writes
            .put_cf(cf_meta, META_TX_COUNT, self.next_tx_sequence.to_le_bytes());
        let version = self.base.chain().version + 1;
        self.writes.put_cf(cf_meta, META_VERSION, version.to_le_bytes());

        Ok(self.writes)
    }
}

/// Key for an outpoint: txid || index (big-endian).
fn outpoint_key(outpoint: &OutPoint) -> [u8; 36] {
    let mut key = [0u8; 36];
    key[..32].copy_from_slice(outpoint.txid.as_bytes());
    key[32..].copy_from_slice(&outpoint.index.to_be_bytes());
    key
}
