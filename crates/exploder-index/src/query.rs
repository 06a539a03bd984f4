//! Read-only query façade over the chain store and indexes.
//!
//! Every operation validates its raw inputs before touching storage, opens
//! one [`ReadView`] and answers entirely from it, so a response never mixes
//! two chain states.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use exploder_core::address::Address;
use exploder_core::error::ExplorerError;
use exploder_core::pagination::{parse_limit, parse_non_negative, parse_optional, PageLimits, PageRequest};
use exploder_core::types::{
    BlockRecord, Hash256, SearchKind, SearchResult, SyncHistoryRecord, TransactionRecord, UnspentOutput,
};

use crate::address_index::AddressIndex;
use crate::chain::ChainStore;
use crate::config::IndexerConfig;
use crate::history::SyncHistory;
use crate::source::NodeInfo;
use crate::store::{ChainSnapshot, IndexDb, ReadView};
use crate::sync::{client_info, ClientInfo, SharedProgress, SyncProgress};
use crate::utxo::UtxoIndex;

/// A block with its position relative to the tip.
#[derive(Debug, Clone, Serialize)]
pub struct BlockDetail {
    #[serde(flatten)]
    pub block: BlockRecord,
    pub confirmations: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nextblockhash: Option<Hash256>,
}

/// A transaction with its confirmation count.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionDetail {
    #[serde(flatten)]
    pub tx: TransactionRecord,
    pub confirmations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Confirmations {
    pub confirmations: u64,
}

/// Aggregates for an address plus one page of its transactions.
#[derive(Debug, Clone, Serialize)]
pub struct AddressView {
    pub address: Address,
    pub balance: u64,
    pub volume: u64,
    pub received: u64,
    pub sent: u64,
    pub tx_count: u64,
    pub unspent_count: u64,
    /// Transactions skipped, counted from the most recent.
    pub start: u64,
    pub limit: u64,
    pub transactions: Vec<TransactionDetail>,
}

/// Local chain state combined with upstream node metadata.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<Hash256>,
    pub difficulty: f64,
    pub transactions: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<NodeInfo>,
}

/// The only entry point the API layer uses.
pub struct QueryEngine {
    db: Arc<IndexDb>,
    chain: ChainStore,
    utxo: UtxoIndex,
    addresses: AddressIndex,
    history: SyncHistory,
    limits: PageLimits,
    address_page_size: u64,
    progress: SharedProgress,
}

impl QueryEngine {
    pub fn new(db: Arc<IndexDb>, config: &IndexerConfig) -> Self {
        Self {
            db,
            chain: ChainStore,
            utxo: UtxoIndex,
            addresses: AddressIndex,
            history: SyncHistory,
            limits: config.page_limits,
            address_page_size: config.address_page_size,
            progress: Arc::new(RwLock::new(SyncProgress::default())),
        }
    }

    /// Report sync progress published by a running coordinator.
    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn page_limits(&self) -> &PageLimits {
        &self.limits
    }

    /// Chain counters of the latest committed state.
    pub fn chain_snapshot(&self) -> Result<ChainSnapshot, ExplorerError> {
        Ok(*self.db.view()?.chain())
    }

    // --- Blocks ---

    /// Blocks in descending height order.
    pub fn latest_blocks(&self, limit: Option<&str>, offset: Option<&str>) -> Result<Vec<BlockRecord>, ExplorerError> {
        let page = PageRequest::parse(limit, offset, &self.limits)?;
        self.chain.latest_blocks(&self.db.view()?, page)
    }

    pub fn block_by_hash(&self, hash: &str) -> Result<BlockDetail, ExplorerError> {
        let hash = Hash256::parse(hash)?;
        let view = self.db.view()?;
        let block = self
            .chain
            .block_by_hash(&view, &hash)?
            .ok_or_else(|| ExplorerError::NotFound(format!("block {hash}")))?;
        self.block_detail(&view, block)
    }

    pub fn block_by_height(&self, height: &str) -> Result<BlockDetail, ExplorerError> {
        let height = parse_non_negative("height", height)?;
        let view = self.db.view()?;
        let block = self
            .chain
            .block_by_height(&view, height)?
            .ok_or_else(|| ExplorerError::NotFound(format!("block at height {height}")))?;
        self.block_detail(&view, block)
    }

    pub fn block_confirmations(&self, hash: &str) -> Result<Confirmations, ExplorerError> {
        let hash = Hash256::parse(hash)?;
        let view = self.db.view()?;
        let block = self
            .chain
            .block_by_hash(&view, &hash)?
            .ok_or_else(|| ExplorerError::NotFound(format!("block {hash}")))?;
        Ok(Confirmations {
            confirmations: confirmations(&view, block.height),
        })
    }

    fn block_detail(&self, view: &ReadView<'_>, block: BlockRecord) -> Result<BlockDetail, ExplorerError> {
        let nextblockhash = match block.height.checked_add(1) {
            Some(next) => self.chain.block_by_height(view, next)?.map(|b| b.hash),
            None => None,
        };
        Ok(BlockDetail {
            confirmations: confirmations(view, block.height),
            nextblockhash,
            block,
        })
    }

    // --- Transactions ---

    /// Transactions in descending ingestion order.
    pub fn latest_transactions(
        &self,
        limit: Option<&str>,
        offset: Option<&str>,
    ) -> Result<Vec<TransactionDetail>, ExplorerError> {
        let page = PageRequest::parse(limit, offset, &self.limits)?;
        let view = self.db.view()?;
        let txs = self.chain.latest_transactions(&view, page)?;
        Ok(txs.into_iter().map(|tx| tx_detail(&view, tx)).collect())
    }

    /// Transactions of a block in block order.
    pub fn transactions_by_block(&self, blockhash: &str) -> Result<Vec<TransactionDetail>, ExplorerError> {
        let hash = Hash256::parse(blockhash)?;
        let view = self.db.view()?;
        let txs = self
            .chain
            .transactions_by_block_hash(&view, &hash)?
            .ok_or_else(|| ExplorerError::NotFound(format!("block {hash}")))?;
        Ok(txs.into_iter().map(|tx| tx_detail(&view, tx)).collect())
    }

    pub fn transaction(&self, txid: &str) -> Result<TransactionDetail, ExplorerError> {
        let txid = Hash256::parse(txid)?;
        let view = self.db.view()?;
        let tx = self
            .chain
            .transaction(&view, &txid)?
            .ok_or_else(|| ExplorerError::NotFound(format!("transaction {txid}")))?;
        Ok(tx_detail(&view, tx))
    }

    pub fn transaction_confirmations(&self, txid: &str) -> Result<Confirmations, ExplorerError> {
        Ok(Confirmations {
            confirmations: self.transaction(txid)?.confirmations,
        })
    }

    // --- Addresses ---

    /// Aggregates and the page of transactions starting `start` positions
    /// back from the most recent.
    pub fn address(&self, address: &str, start: Option<&str>) -> Result<AddressView, ExplorerError> {
        let address = Address::parse(address)?;
        let start = parse_optional("start", start, 0)?;
        let page = PageRequest::new(self.address_page_size, start);

        let view = self.db.view()?;
        let stats = self.utxo.stats(&view, &address)?;
        let mut transactions = Vec::new();
        for txid in self.addresses.transactions_for(&view, &address, page)? {
            let tx = self
                .chain
                .transaction(&view, &txid)?
                .ok_or_else(|| ExplorerError::Storage(format!("address {address} lists missing tx {txid}")))?;
            transactions.push(tx_detail(&view, tx));
        }

        Ok(AddressView {
            balance: stats.balance(),
            volume: stats.received,
            received: stats.received,
            sent: stats.sent,
            tx_count: stats.tx_count,
            unspent_count: stats.unspent_count,
            start,
            limit: page.limit,
            transactions,
            address,
        })
    }

    /// Unspent outputs in (height, txid, index) order; `start` counts outputs.
    pub fn unspent(
        &self,
        address: &str,
        start: Option<&str>,
        limit: Option<&str>,
    ) -> Result<Vec<UnspentOutput>, ExplorerError> {
        let address = Address::parse(address)?;
        let start = parse_optional("start", start, 0)?;
        let limit = parse_limit(limit, &self.limits)?;
        self.utxo.unspent_for(&self.db.view()?, &address, start, limit)
    }

    pub fn volume(&self, address: &str) -> Result<u64, ExplorerError> {
        let address = Address::parse(address)?;
        self.utxo.volume(&self.db.view()?, &address)
    }

    pub fn balance(&self, address: &str) -> Result<u64, ExplorerError> {
        let address = Address::parse(address)?;
        self.utxo.balance(&self.db.view()?, &address)
    }

    pub fn transaction_count(&self, address: &str) -> Result<u64, ExplorerError> {
        let address = Address::parse(address)?;
        self.addresses.transaction_count(&self.db.view()?, &address)
    }

    // --- Client and network ---

    /// Sync history, newest first.
    pub fn sync_history(
        &self,
        limit: Option<&str>,
        offset: Option<&str>,
    ) -> Result<Vec<SyncHistoryRecord>, ExplorerError> {
        let page = PageRequest::parse(limit, offset, &self.limits)?;
        self.history.page(&self.db.view()?, page)
    }

    pub fn client_info(&self) -> Result<ClientInfo, ExplorerError> {
        client_info(&self.db, &self.progress)
    }

    pub fn network_info(&self) -> Result<NetworkInfo, ExplorerError> {
        let view = self.db.view()?;
        let tip = view.tip();
        let difficulty = match tip {
            Some(tip) => self
                .chain
                .block_by_hash(&view, &tip.hash)?
                .map(|b| b.difficulty)
                .unwrap_or_default(),
            None => 0.0,
        };
        Ok(NetworkInfo {
            height: tip.map(|t| t.height),
            hash: tip.map(|t| t.hash),
            difficulty,
            transactions: view.chain().tx_count,
            upstream: self.progress.read().upstream.clone(),
        })
    }

    // --- Search ---

    /// Resolve `query` as a block hash, then a txid, then an address.
    ///
    /// Never fails on the shape of `query`; an unmatched query yields a
    /// result with no kind.
    pub fn search(&self, query: &str) -> Result<SearchResult, ExplorerError> {
        let view = self.db.view()?;
        let kind = self.resolve(&view, query.trim())?;
        Ok(SearchResult {
            search_by: query.to_string(),
            kind,
        })
    }

    fn resolve(&self, view: &ReadView<'_>, query: &str) -> Result<Option<SearchKind>, ExplorerError> {
        if let Ok(hash) = Hash256::parse(query) {
            if self.chain.block_by_hash(view, &hash)?.is_some() {
                return Ok(Some(SearchKind::Block));
            }
            if self.chain.transaction(view, &hash)?.is_some() {
                return Ok(Some(SearchKind::Transaction));
            }
        }
        if let Ok(address) = Address::parse(query) {
            if self.addresses.transaction_count(view, &address)? > 0 {
                return Ok(Some(SearchKind::Address));
            }
        }
        Ok(None)
    }
}

/// Blocks from `height` to the tip inclusive; 0 above the tip.
fn confirmations(view: &ReadView<'_>, height: u64) -> u64 {
    match ChainStore.latest_height(view) {
        Some(tip) if height <= tip => tip - height + 1,
        _ => 0,
    }
}

fn tx_detail(view: &ReadView<'_>, tx: TransactionRecord) -> TransactionDetail {
    TransactionDetail {
        confirmations: confirmations(view, tx.height),
        tx,
    }
}
