//! Ingestion of upstream blocks into the chain store and indexes.
//!
//! Each block goes through `Idle → Fetching → Validating → Applying →
//! Committed`, or ends in `Failed`. All effects of a block (chain store,
//! UTXO index, address index and the sync-history record) are staged in one
//! [`BlockBatch`] and written atomically, so readers never see a partially
//! applied block and a failed block leaves nothing behind.
//!
//! The coordinator is the only writer. Writes are serialized by an internal
//! lock even if several tasks share it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use exploder_core::error::ExplorerError;
use exploder_core::pagination::PageRequest;
use exploder_core::types::{Hash256, RawBlock, SyncHistoryRecord};

use crate::address_index::AddressIndex;
use crate::batch::BlockBatch;
use crate::chain::ChainStore;
use crate::config::IndexerConfig;
use crate::history::SyncHistory;
use crate::source::{ChainSource, NodeInfo};
use crate::store::IndexDb;
use crate::utxo::UtxoIndex;

/// Phase of the current ingestion cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum SyncState {
    /// Caught up, or waiting for the next cycle.
    Idle,
    /// Requesting a block from upstream.
    Fetching { height: u64, attempt: u32 },
    /// Checking linkage and shape of a delivered block.
    Validating { height: u64 },
    /// Staging the block's effects.
    Applying { height: u64 },
    /// The block is durable and visible to readers.
    Committed { height: u64 },
    /// The cycle stopped on an error; nothing from the block was written.
    Failed { height: u64, error: String },
}

/// Progress shared between the coordinator and readers.
#[derive(Debug, Clone, Default)]
pub struct SyncProgress {
    pub state: Option<SyncState>,
    /// Unix seconds of the last committed block.
    pub last_sync: Option<i64>,
    pub upstream: Option<NodeInfo>,
}

pub type SharedProgress = Arc<RwLock<SyncProgress>>;

/// Client status as reported to API callers.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<Hash256>,
    pub transactions: u64,
    pub state: SyncState,
    #[serde(rename = "lastSync", skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<NodeInfo>,
}

/// Build client info from the committed state and shared progress.
///
/// Without an in-process commit, the last sync time comes from the newest
/// committed history record and is cached in `progress`.
pub fn client_info(db: &IndexDb, progress: &SharedProgress) -> Result<ClientInfo, ExplorerError> {
    let view = db.view()?;
    if progress.read().last_sync.is_none() {
        if let Some(record) = SyncHistory.last_committed(&view)? {
            progress.write().last_sync.get_or_insert(record.timestamp);
        }
    }
    let progress = progress.read().clone();
    Ok(ClientInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        height: view.tip().map(|t| t.height),
        hash: view.tip().map(|t| t.hash),
        transactions: view.chain().tx_count,
        state: progress.state.unwrap_or(SyncState::Idle),
        last_sync: progress.last_sync,
        upstream: progress.upstream,
    })
}

/// Drives ingestion from a [`ChainSource`].
pub struct SyncCoordinator {
    db: Arc<IndexDb>,
    source: Arc<dyn ChainSource>,
    config: IndexerConfig,
    chain: ChainStore,
    utxo: UtxoIndex,
    addresses: AddressIndex,
    history: SyncHistory,
    progress: SharedProgress,
    write_lock: Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(db: Arc<IndexDb>, source: Arc<dyn ChainSource>, config: IndexerConfig) -> Self {
        Self {
            db,
            source,
            config,
            chain: ChainStore,
            utxo: UtxoIndex,
            addresses: AddressIndex,
            history: SyncHistory,
            progress: Arc::new(RwLock::new(SyncProgress::default())),
            write_lock: Mutex::new(()),
        }
    }

    /// Handle for readers that report sync progress.
    pub fn progress(&self) -> SharedProgress {
        Arc::clone(&self.progress)
    }

    pub fn state(&self) -> SyncState {
        self.progress.read().state.clone().unwrap_or(SyncState::Idle)
    }

    fn set_state(&self, state: SyncState) {
        self.progress.write().state = Some(state);
    }

    /// Client height, last sync time and upstream metadata.
    pub fn current_info(&self) -> Result<ClientInfo, ExplorerError> {
        client_info(&self.db, &self.progress)
    }

    /// Sync history, newest first.
    pub fn sync_history(&self, page: PageRequest) -> Result<Vec<SyncHistoryRecord>, ExplorerError> {
        self.history.page(&self.db.view()?, page)
    }

    /// Validate and atomically apply one block on top of the current tip.
    ///
    /// On failure nothing from the block is written, a `failed` history
    /// record is appended and the error is returned.
    pub fn apply_block(&self, block: &RawBlock) -> Result<SyncHistoryRecord, ExplorerError> {
        let _guard = self.write_lock.lock();
        match self.stage_and_commit(block) {
            Ok(record) => {
                let mut progress = self.progress.write();
                progress.state = Some(SyncState::Committed { height: block.height });
                progress.last_sync = Some(record.timestamp);
                drop(progress);
                info!(
                    height = block.height,
                    hash = %block.hash,
                    txs = block.tx.len(),
                    "committed block"
                );
                Ok(record)
            }
            Err(e) => {
                error!(height = block.height, hash = %block.hash, error = %e, "block rejected");
                self.record_failure(block.height, &e);
                Err(e)
            }
        }
    }

    /// Enter `Failed` for `height` and append a `failed` history record at
    /// the current tip. The write lock must be held.
    fn record_failure(&self, height: u64, e: &ExplorerError) {
        self.set_state(SyncState::Failed {
            height,
            error: e.to_string(),
        });
        let tip_height = match self.db.view() {
            Ok(view) => view.tip().map(|t| t.height).unwrap_or(0),
            Err(view_err) => {
                warn!(error = %view_err, "tip unavailable for sync failure record");
                0
            }
        };
        if let Err(log_err) =
            self.history
                .append_failed(&self.db, tip_height, chrono::Utc::now().timestamp(), e.to_string())
        {
            warn!(error = %log_err, "failed to record sync failure");
        }
    }

    /// End a sync cycle that failed before reaching `apply_block`.
    fn fail_cycle(&self, height: u64, e: ExplorerError) -> ExplorerError {
        error!(height, error = %e, "sync cycle aborted");
        let _guard = self.write_lock.lock();
        self.record_failure(height, &e);
        e
    }

    fn stage_and_commit(&self, block: &RawBlock) -> Result<SyncHistoryRecord, ExplorerError> {
        self.set_state(SyncState::Validating { height: block.height });
        let mut batch = BlockBatch::begin(&self.db)?;
        self.chain.check_block(&batch.base, block)?;

        self.set_state(SyncState::Applying { height: block.height });
        self.chain.put_block(&mut batch, block)?;
        for tx in &block.tx {
            let touched = self.utxo.apply_transaction(&mut batch, tx, block.height)?;
            for address in &touched {
                self.addresses.record_touch(&mut batch, address, tx.txid)?;
            }
        }
        let record = self
            .history
            .stage_committed(&mut batch, block.height, chrono::Utc::now().timestamp())?;

        let writes = batch.finish()?;
        self.db.write(writes)?;
        Ok(record)
    }

    /// Fetch a block, retrying upstream failures with backoff.
    async fn fetch_block(&self, height: u64) -> Result<RawBlock, ExplorerError> {
        let policy = &self.config.retry;
        let mut attempt = 1;
        loop {
            self.set_state(SyncState::Fetching { height, attempt });
            match self.source.block_at(height).await {
                Ok(block) => return Ok(block),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(height, attempt, ?delay, error = %e, "block fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_best_height(&self) -> Result<u64, ExplorerError> {
        let policy = &self.config.retry;
        let mut attempt = 1;
        loop {
            match self.source.best_height().await {
                Ok(height) => return Ok(height),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(attempt, ?delay, error = %e, "tip query failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Apply blocks until caught up with upstream or `sync_batch_size`
    /// blocks were applied. Returns the number applied.
    pub async fn sync_once(&self) -> Result<u64, ExplorerError> {
        self.refresh_node_info().await;
        let best = match self.fetch_best_height().await {
            Ok(best) => best,
            Err(e) => return Err(self.fail_cycle(self.next_height()?, e)),
        };
        let mut applied = 0u64;

        loop {
            let next = self.next_height()?;
            if next > best || applied >= self.config.sync_batch_size {
                break;
            }
            let block = self.fetch_block(next).await.map_err(|e| self.fail_cycle(next, e))?;
            // Records its own failure.
            self.apply_block(&block)?;
            applied += 1;
        }

        self.set_state(SyncState::Idle);
        debug!(applied, best, "sync cycle finished");
        Ok(applied)
    }

    fn next_height(&self) -> Result<u64, ExplorerError> {
        Ok(self.db.view()?.chain().next_height())
    }

    async fn refresh_node_info(&self) {
        match self.source.node_info().await {
            Ok(info) => {
                self.progress.write().upstream = Some(info);
            }
            Err(e) => debug!(error = %e, "node info unavailable"),
        }
    }

    /// Run sync cycles until `shutdown` flips to `true`.
    ///
    /// A failed cycle is logged and retried from the next expected height
    /// after the poll interval.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(poll = ?self.config.poll_interval, "sync coordinator started");
        loop {
            let wait = match self.sync_once().await {
                Ok(applied) if applied >= self.config.sync_batch_size => Duration::ZERO,
                Ok(_) => self.config.poll_interval,
                Err(e) => {
                    warn!(error = %e, "sync cycle failed");
                    self.config.poll_interval
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }
        info!("sync coordinator stopped");
    }
}
