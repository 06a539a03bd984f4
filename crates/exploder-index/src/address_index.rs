//! Address → ordered list of transactions touching it.
//!
//! Entries are keyed `address_key || n` where `n` counts the address's
//! transactions from 0 in chain order (height, then position in block). The
//! running count lives in the address aggregates, so the newest page is a set
//! of direct lookups rather than a scan.

use exploder_core::address::Address;
use exploder_core::error::ExplorerError;
use exploder_core::pagination::PageRequest;
use exploder_core::types::{AddressStats, Hash256};

use crate::batch::BlockBatch;
use crate::store::{u64_key, ReadView, CF_ADDRESS_STATS, CF_ADDRESS_TXS};

/// Per-address transaction lists.
#[derive(Debug, Default, Clone, Copy)]
pub struct AddressIndex;

impl AddressIndex {
    /// Record that `txid` touches `address`.
    ///
    /// Repeated calls for the same pair within one block are ignored.
    pub fn record_touch(
        &self,
        batch: &mut BlockBatch<'_>,
        address: &Address,
        txid: Hash256,
    ) -> Result<(), ExplorerError> {
        let key = address.index_key();
        if !batch.touch(key, txid) {
            return Ok(());
        }
        let db = batch.db;
        let cf = db.cf_handle(CF_ADDRESS_TXS)?;
        let stats = batch.stats_mut(key)?;
        let n = stats.tx_count;
        stats.tx_count += 1;
        batch.writes.put_cf(cf, entry_key(&key, n), txid.as_bytes());
        Ok(())
    }

    /// Transactions touching `address`, most recent first.
    pub fn transactions_for(
        &self,
        view: &ReadView<'_>,
        address: &Address,
        page: PageRequest,
    ) -> Result<Vec<Hash256>, ExplorerError> {
        let key = address.index_key();
        let count = self.transaction_count(view, address)?;
        let mut txids = Vec::new();
        for back in page.window(count) {
            let n = count - 1 - back;
            let bytes = view
                .get_raw(CF_ADDRESS_TXS, &entry_key(&key, n))?
                .ok_or_else(|| ExplorerError::Storage(format!("address index gap at {n} for {address}")))?;
            let txid = Hash256::from_slice(&bytes)
                .ok_or_else(|| ExplorerError::Storage("invalid txid in address index".into()))?;
            txids.push(txid);
        }
        Ok(txids)
    }

    /// Number of distinct transactions touching `address`.
    pub fn transaction_count(&self, view: &ReadView<'_>, address: &Address) -> Result<u64, ExplorerError> {
        let stats: Option<AddressStats> = view.get(CF_ADDRESS_STATS, &address.index_key())?;
        Ok(stats.map(|s| s.tx_count).unwrap_or(0))
    }
}

fn entry_key(address_key: &[u8; 32], n: u64) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..32].copy_from_slice(address_key);
    key[32..].copy_from_slice(&u64_key(n));
    key
}
