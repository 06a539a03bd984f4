//! Append-only log of sync progress.

use rocksdb::WriteBatch;

use exploder_core::error::ExplorerError;
use exploder_core::pagination::PageRequest;
use exploder_core::types::{SyncHistoryRecord, SyncStatus};

use crate::batch::BlockBatch;
use crate::store::{encode, u64_key, IndexDb, ReadView, CF_METADATA, CF_SYNC_HISTORY, META_SYNC_SEQ};

/// Sync history records keyed by sequence number.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncHistory;

impl SyncHistory {
    /// Stage a `committed` record inside the block's batch, so the record
    /// becomes visible together with the block.
    pub fn stage_committed(
        &self,
        batch: &mut BlockBatch<'_>,
        height: u64,
        timestamp: i64,
    ) -> Result<SyncHistoryRecord, ExplorerError> {
        let sequence = batch.base.meta_u64(META_SYNC_SEQ)?;
        let record = SyncHistoryRecord {
            sequence,
            height,
            timestamp,
            status: SyncStatus::Committed,
            error: None,
        };
        Self::put(batch.db, &mut batch.writes, &record)?;
        Ok(record)
    }

    /// Append a `failed` record on its own.
    pub fn append_failed(
        &self,
        db: &IndexDb,
        height: u64,
        timestamp: i64,
        error: String,
    ) -> Result<SyncHistoryRecord, ExplorerError> {
        let view = db.view()?;
        let record = SyncHistoryRecord {
            sequence: view.meta_u64(META_SYNC_SEQ)?,
            height,
            timestamp,
            status: SyncStatus::Failed,
            error: Some(error),
        };
        let mut writes = WriteBatch::default();
        Self::put(db, &mut writes, &record)?;
        db.write(writes)?;
        Ok(record)
    }

    fn put(db: &IndexDb, writes: &mut WriteBatch, record: &SyncHistoryRecord) -> Result<(), ExplorerError> {
        let cf = db.cf_handle(CF_SYNC_HISTORY)?;
        writes.put_cf(cf, u64_key(record.sequence), encode(record)?);
        let cf_meta = db.cf_handle(CF_METADATA)?;
        writes.put_cf(cf_meta, META_SYNC_SEQ, (record.sequence + 1).to_le_bytes());
        Ok(())
    }

    pub fn len(&self, view: &ReadView<'_>) -> Result<u64, ExplorerError> {
        view.meta_u64(META_SYNC_SEQ)
    }

    /// Most recent `committed` record, skipping failures logged after it.
    pub fn last_committed(&self, view: &ReadView<'_>) -> Result<Option<SyncHistoryRecord>, ExplorerError> {
        for sequence in (0..self.len(view)?).rev() {
            let record: Option<SyncHistoryRecord> = view.get(CF_SYNC_HISTORY, &u64_key(sequence))?;
            if let Some(record) = record.filter(|r| r.status == SyncStatus::Committed) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Records newest first.
    pub fn page(&self, view: &ReadView<'_>, page: PageRequest) -> Result<Vec<SyncHistoryRecord>, ExplorerError> {
        let count = self.len(view)?;
        let mut records = Vec::new();
        for back in page.window(count) {
            if let Some(record) = view.get(CF_SYNC_HISTORY, &u64_key(count - 1 - back))? {
                records.push(record);
            }
        }
        Ok(records)
    }
}
