//! Output spent-state and per-address value aggregates.
//!
//! Every output ever created stays in `outputs` with its spent-state. The
//! `unspent` column family holds only currently unspent outputs, keyed
//! `address_key || height || txid || index` so an address's unspent set is a
//! prefix scan in (height, txid, index) order.
//!
//! An output owned by several addresses counts toward each of them.

use tracing::trace;

use exploder_core::address::Address;
use exploder_core::error::{ConflictError, ExplorerError};
use exploder_core::types::{AddressStats, Hash256, OutPoint, OutputEntry, RawTransaction, UnspentOutput};

use crate::batch::BlockBatch;
use crate::store::{ReadView, CF_ADDRESS_STATS, CF_UNSPENT};

const UNSPENT_KEY_LEN: usize = 32 + 8 + 32 + 4;

/// Spent-state of outputs and the balances derived from it.
#[derive(Debug, Default, Clone, Copy)]
pub struct UtxoIndex;

impl UtxoIndex {
    /// Spend the transaction's inputs and record its outputs as unspent.
    ///
    /// Returns the addresses the transaction touched, inputs first, each at
    /// most once.
    ///
    /// # Errors
    ///
    /// [`ConflictError::DoubleSpend`] if an input is already spent and
    /// [`ConflictError::UnknownOutput`] if it references no known output.
    /// Either means the delivered chain data is inconsistent.
    pub fn apply_transaction(
        &self,
        batch: &mut BlockBatch<'_>,
        tx: &RawTransaction,
        height: u64,
    ) -> Result<Vec<Address>, ExplorerError> {
        let db = batch.db;
        let cf_unspent = db.cf_handle(CF_UNSPENT)?;
        let mut touched: Vec<Address> = Vec::new();

        for outpoint in tx.vin.iter().filter_map(|input| input.outpoint()) {
            let mut entry = batch
                .output(&outpoint)?
                .ok_or_else(|| ConflictError::UnknownOutput(outpoint.to_string()))?;
            if entry.is_spent() {
                return Err(ConflictError::DoubleSpend(outpoint.to_string()).into());
            }
            entry.spent_by = Some(tx.txid);

            for address in distinct(&entry.addresses) {
                let key = address.index_key();
                let stats = batch.stats_mut(key)?;
                stats.sent = stats
                    .sent
                    .checked_add(entry.value)
                    .ok_or_else(|| ConflictError::ValueOverflow(address.to_string()))?;
                stats.unspent_count = stats.unspent_count.saturating_sub(1);
                batch
                    .writes
                    .delete_cf(cf_unspent, unspent_key(&key, entry.height, &outpoint));
                push_distinct(&mut touched, address);
            }
            trace!(%outpoint, spent_by = %tx.txid, "spent output");
            batch.put_output(outpoint, entry);
        }

        for output in &tx.vout {
            let outpoint = OutPoint::new(tx.txid, output.n);
            for address in distinct(&output.addresses) {
                let key = address.index_key();
                let stats = batch.stats_mut(key)?;
                stats.received = stats
                    .received
                    .checked_add(output.value)
                    .ok_or_else(|| ConflictError::ValueOverflow(address.to_string()))?;
                stats.unspent_count += 1;
                batch.writes.put_cf(
                    cf_unspent,
                    unspent_key(&key, height, &outpoint),
                    output.value.to_le_bytes(),
                );
                push_distinct(&mut touched, address);
            }
            batch.put_output(
                outpoint,
                OutputEntry {
                    value: output.value,
                    addresses: output.addresses.clone(),
                    height,
                    spent_by: None,
                },
            );
        }

        Ok(touched)
    }

    // --- Reads ---

    /// Aggregates for an address; all zero for an address never seen.
    pub fn stats(&self, view: &ReadView<'_>, address: &Address) -> Result<AddressStats, ExplorerError> {
        Ok(view
            .get(CF_ADDRESS_STATS, &address.index_key())?
            .unwrap_or_default())
    }

    /// Sum of unspent output values owned by `address`.
    pub fn balance(&self, view: &ReadView<'_>, address: &Address) -> Result<u64, ExplorerError> {
        Ok(self.stats(view, address)?.balance())
    }

    /// Sum of all output values ever owned by `address`, spent or not.
    pub fn volume(&self, view: &ReadView<'_>, address: &Address) -> Result<u64, ExplorerError> {
        Ok(self.stats(view, address)?.received)
    }

    /// Unspent outputs owned by `address` in (height, txid, index) order,
    /// skipping the first `start`.
    pub fn unspent_for(
        &self,
        view: &ReadView<'_>,
        address: &Address,
        start: u64,
        limit: u64,
    ) -> Result<Vec<UnspentOutput>, ExplorerError> {
        let mut result = Vec::new();
        if limit == 0 {
            return Ok(result);
        }
        let mut skipped = 0u64;
        view.scan_prefix(CF_UNSPENT, &address.index_key(), |key, value| {
            if skipped < start {
                skipped += 1;
                return Ok(true);
            }
            result.push(decode_unspent(key, value)?);
            Ok((result.len() as u64) < limit)
        })?;
        Ok(result)
    }
}

fn distinct(addresses: &[Address]) -> impl Iterator<Item = &Address> {
    addresses
        .iter()
        .enumerate()
        .filter(move |(i, a)| !addresses[..*i].contains(*a))
        .map(|(_, a)| a)
}

fn push_distinct(list: &mut Vec<Address>, address: &Address) {
    if !list.contains(address) {
        list.push(address.clone());
    }
}

fn unspent_key(address_key: &[u8; 32], height: u64, outpoint: &OutPoint) -> [u8; UNSPENT_KEY_LEN] {
    let mut key = [0u8; UNSPENT_KEY_LEN];
    key[0..32].copy_from_slice(address_key);
    key[32..40].copy_from_slice(&height.to_be_bytes());
    key[40..72].copy_from_slice(outpoint.txid.as_bytes());
    key[72..76].copy_from_slice(&outpoint.index.to_be_bytes());
    key
}

fn decode_unspent(key: &[u8], value: &[u8]) -> Result<UnspentOutput, ExplorerError> {
    let corrupt = || ExplorerError::Storage("invalid unspent index entry".into());
    if key.len() != UNSPENT_KEY_LEN {
        return Err(corrupt());
    }
    let height = u64::from_be_bytes(key[32..40].try_into().map_err(|_| corrupt())?);
    let txid = Hash256::from_slice(&key[40..72]).ok_or_else(corrupt)?;
    let vout = u32::from_be_bytes(key[72..76].try_into().map_err(|_| corrupt())?);
    let value = u64::from_le_bytes(value.try_into().map_err(|_| corrupt())?);
    Ok(UnspentOutput {
        txid,
        vout,
        value,
        height,
    })
}
