//! Append-only store of blocks and transactions.
//!
//! Blocks are keyed by hash with a height index; transactions by txid with a
//! global sequence index that gives ingestion order. The store holds a single
//! accepted chain: no gaps, no forks.

use tracing::debug;

use exploder_core::error::{ConflictError, ExplorerError, ValidationError};
use exploder_core::pagination::PageRequest;
use exploder_core::types::{BlockRecord, Hash256, RawBlock, TransactionRecord};

use crate::batch::BlockBatch;
use crate::store::{
    encode, u64_key, ReadView, CF_BLOCKS, CF_HEIGHT_INDEX, CF_METADATA, CF_TRANSACTIONS,
    CF_TX_SEQUENCE, META_TIP_HASH, META_TIP_HEIGHT,
};

/// Blocks and transactions by hash, height and sequence.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChainStore;

impl ChainStore {
    /// Stage `block` and its transactions as the new chain tip.
    ///
    /// # Errors
    ///
    /// - [`ConflictError::DuplicateBlock`] if this block is already committed
    /// - [`ConflictError::HeightOccupied`] if another block holds the height (fork)
    /// - [`ConflictError::HeightMismatch`] if the height leaves a gap
    /// - [`ConflictError::ParentMismatch`] / [`ConflictError::GenesisWithParent`] on broken linkage
    /// - [`ConflictError::DuplicateTxid`] if a txid is already stored
    /// - [`ValidationError`] if a transaction's declared inputs are malformed
    pub fn put_block(&self, batch: &mut BlockBatch<'_>, block: &RawBlock) -> Result<(), ExplorerError> {
        self.check_block(&batch.base, block)?;

        let db = batch.db;
        let cf_blocks = db.cf_handle(CF_BLOCKS)?;
        let cf_height = db.cf_handle(CF_HEIGHT_INDEX)?;
        let cf_txs = db.cf_handle(CF_TRANSACTIONS)?;
        let cf_seq = db.cf_handle(CF_TX_SEQUENCE)?;
        let cf_meta = db.cf_handle(CF_METADATA)?;

        for (position, tx) in block.tx.iter().enumerate() {
            if !batch.stage_txid(tx.txid) || batch.base.contains(CF_TRANSACTIONS, tx.txid.as_bytes())? {
                return Err(ConflictError::DuplicateTxid(tx.txid.to_string()).into());
            }
            let sequence = batch.take_tx_sequence();
            let record = TransactionRecord {
                txid: tx.txid,
                blockhash: block.hash,
                height: block.height,
                time: block.time,
                position: position as u32,
                sequence,
                vin: tx.vin.clone(),
                vout: tx.vout.clone(),
            };
            batch.writes.put_cf(cf_txs, tx.txid.as_bytes(), encode(&record)?);
            batch.writes.put_cf(cf_seq, u64_key(sequence), tx.txid.as_bytes());
        }

        let record = BlockRecord::from_raw(block);
        batch.writes.put_cf(cf_blocks, block.hash.as_bytes(), encode(&record)?);
        batch.writes.put_cf(cf_height, u64_key(block.height), block.hash.as_bytes());
        batch.writes.put_cf(cf_meta, META_TIP_HEIGHT, block.height.to_le_bytes());
        batch.writes.put_cf(cf_meta, META_TIP_HASH, block.hash.as_bytes());

        debug!(height = block.height, hash = %block.hash, txs = block.tx.len(), "staged block");
        Ok(())
    }

    /// Check that `block` extends the tip of `base` and is well formed,
    /// without staging anything.
    pub fn check_block(&self, base: &ReadView<'_>, block: &RawBlock) -> Result<(), ExplorerError> {
        self.check_linkage(base, block)?;
        check_block_shape(block)?;
        Ok(())
    }

    fn check_linkage(&self, base: &ReadView<'_>, block: &RawBlock) -> Result<(), ExplorerError> {
        let tip = base.tip();

        if let Some(tip) = tip {
            if block.height <= tip.height {
                let existing = self
                    .block_hash_at(base, block.height)?
                    .ok_or_else(|| ExplorerError::Storage(format!("height index missing {}", block.height)))?;
                if existing == block.hash {
                    return Err(ConflictError::DuplicateBlock(block.hash.to_string()).into());
                }
                return Err(ConflictError::HeightOccupied {
                    height: block.height,
                    existing: existing.to_string(),
                }
                .into());
            }
        }

        let expected = base.chain().next_height();
        if block.height != expected {
            return Err(ConflictError::HeightMismatch {
                expected,
                got: block.height,
            }
            .into());
        }

        match (tip, block.previousblockhash) {
            (None, None) => {}
            (None, Some(_)) => return Err(ConflictError::GenesisWithParent.into()),
            (Some(tip), parent) if parent != Some(tip.hash) => {
                return Err(ConflictError::ParentMismatch {
                    height: block.height,
                    expected: tip.hash.to_string(),
                    got: parent.map(|p| p.to_string()).unwrap_or_default(),
                }
                .into());
            }
            (Some(_), _) => {}
        }

        if base.contains(CF_BLOCKS, block.hash.as_bytes())? {
            return Err(ConflictError::DuplicateBlock(block.hash.to_string()).into());
        }
        Ok(())
    }

    // --- Reads ---

    pub fn block_by_hash(&self, view: &ReadView<'_>, hash: &Hash256) -> Result<Option<BlockRecord>, ExplorerError> {
        let block: Option<BlockRecord> = view.get(CF_BLOCKS, hash.as_bytes())?;
        Ok(block.filter(|b| Self::visible_height(view, b.height)))
    }

    pub fn block_hash_at(&self, view: &ReadView<'_>, height: u64) -> Result<Option<Hash256>, ExplorerError> {
        Ok(view
            .get_raw(CF_HEIGHT_INDEX, &u64_key(height))?
            .and_then(|bytes| Hash256::from_slice(&bytes)))
    }

    pub fn block_by_height(&self, view: &ReadView<'_>, height: u64) -> Result<Option<BlockRecord>, ExplorerError> {
        if !Self::visible_height(view, height) {
            return Ok(None);
        }
        match self.block_hash_at(view, height)? {
            Some(hash) => self.block_by_hash(view, &hash),
            None => Ok(None),
        }
    }

    /// Height of the chain tip, `None` while the store is empty.
    pub fn latest_height(&self, view: &ReadView<'_>) -> Option<u64> {
        view.tip().map(|t| t.height)
    }

    /// Blocks in descending height order, skipping the newest `page.offset`.
    pub fn latest_blocks(&self, view: &ReadView<'_>, page: PageRequest) -> Result<Vec<BlockRecord>, ExplorerError> {
        let Some(tip) = view.tip() else {
            return Ok(Vec::new());
        };
        let mut blocks = Vec::new();
        for back in page.window(tip.height + 1) {
            if let Some(block) = self.block_by_height(view, tip.height - back)? {
                blocks.push(block);
            }
        }
        Ok(blocks)
    }

    pub fn transaction(&self, view: &ReadView<'_>, txid: &Hash256) -> Result<Option<TransactionRecord>, ExplorerError> {
        let tx: Option<TransactionRecord> = view.get(CF_TRANSACTIONS, txid.as_bytes())?;
        Ok(tx.filter(|t| t.sequence < view.chain().tx_count))
    }

    /// Transactions in descending ingestion order, skipping the newest `page.offset`.
    pub fn latest_transactions(
        &self,
        view: &ReadView<'_>,
        page: PageRequest,
    ) -> Result<Vec<TransactionRecord>, ExplorerError> {
        let count = view.chain().tx_count;
        let mut txs = Vec::new();
        for back in page.window(count) {
            let seq = count - 1 - back;
            let Some(bytes) = view.get_raw(CF_TX_SEQUENCE, &u64_key(seq))? else {
                continue;
            };
            let txid = Hash256::from_slice(&bytes)
                .ok_or_else(|| ExplorerError::Storage("invalid txid in sequence index".into()))?;
            if let Some(tx) = self.transaction(view, &txid)? {
                txs.push(tx);
            }
        }
        Ok(txs)
    }

    /// Transactions of a block in block order, `None` for an unknown block.
    pub fn transactions_by_block_hash(
        &self,
        view: &ReadView<'_>,
        hash: &Hash256,
    ) -> Result<Option<Vec<TransactionRecord>>, ExplorerError> {
        let Some(block) = self.block_by_hash(view, hash)? else {
            return Ok(None);
        };
        let mut txs = Vec::with_capacity(block.tx.len());
        for txid in &block.tx {
            let tx = self
                .transaction(view, txid)?
                .ok_or_else(|| ExplorerError::Storage(format!("block {hash} lists missing tx {txid}")))?;
            txs.push(tx);
        }
        Ok(Some(txs))
    }

    fn visible_height(view: &ReadView<'_>, height: u64) -> bool {
        view.tip().is_some_and(|tip| height <= tip.height)
    }
}

/// Shape checks that do not depend on stored state.
fn check_block_shape(block: &RawBlock) -> Result<(), ValidationError> {
    if block.tx.is_empty() {
        return Err(ValidationError::MalformedBlock {
            hash: block.hash.to_string(),
            reason: "no transactions".into(),
        });
    }
    for tx in &block.tx {
        tx.check_shape()?;
    }
    Ok(())
}
