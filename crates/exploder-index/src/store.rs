//! RocksDB database shared by the chain store and both indexes.
//!
//! One column family per table. Keys are fixed-width big-endian so iteration
//! order equals height/sequence order; values are bincode-encoded.
//!
//! Readers go through a [`ReadView`]: a RocksDB snapshot plus the chain tip
//! recorded in that snapshot. Because every block lands in one atomic
//! `WriteBatch`, a view always observes either the pre-block or the
//! post-block state of all tables together.

use std::path::Path;

use bincode::{Decode, Encode};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, SliceTransform, WriteBatch, DB};

use exploder_core::error::ExplorerError;
use exploder_core::types::Hash256;

// --- Column family names ---

pub(crate) const CF_BLOCKS: &str = "blocks";
pub(crate) const CF_HEIGHT_INDEX: &str = "height_index";
pub(crate) const CF_TRANSACTIONS: &str = "transactions";
pub(crate) const CF_TX_SEQUENCE: &str = "tx_sequence";
pub(crate) const CF_OUTPUTS: &str = "outputs";
pub(crate) const CF_UNSPENT: &str = "unspent";
pub(crate) const CF_ADDRESS_TXS: &str = "address_txs";
pub(crate) const CF_ADDRESS_STATS: &str = "address_stats";
pub(crate) const CF_SYNC_HISTORY: &str = "sync_history";
pub(crate) const CF_METADATA: &str = "metadata";

const ALL_CFS: &[&str] = &[
    CF_BLOCKS,
    CF_HEIGHT_INDEX,
    CF_TRANSACTIONS,
    CF_TX_SEQUENCE,
    CF_OUTPUTS,
    CF_UNSPENT,
    CF_ADDRESS_TXS,
    CF_ADDRESS_STATS,
    CF_SYNC_HISTORY,
    CF_METADATA,
];

/// Column families keyed by a 32-byte address digest prefix.
const ADDRESS_PREFIXED_CFS: &[&str] = &[CF_UNSPENT, CF_ADDRESS_TXS];

// --- Metadata keys ---

pub(crate) const META_TIP_HEIGHT: &[u8] = b"tip_height";
pub(crate) const META_TIP_HASH: &[u8] = b"tip_hash";
pub(crate) const META_TX_COUNT: &[u8] = b"tx_count";
pub(crate) const META_VERSION: &[u8] = b"version";
pub(crate) const META_SYNC_SEQ: &[u8] = b"sync_seq";

pub(crate) fn storage_err(e: impl std::fmt::Display) -> ExplorerError {
    ExplorerError::Storage(e.to_string())
}

pub(crate) fn encode<T: Encode>(value: &T) -> Result<Vec<u8>, ExplorerError> {
    Ok(bincode::encode_to_vec(value, bincode::config::standard())?)
}

pub(crate) fn decode<T: Decode<()>>(bytes: &[u8]) -> Result<T, ExplorerError> {
    let (value, _) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}

pub(crate) fn u64_key(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

fn read_u64(bytes: &[u8]) -> Result<u64, ExplorerError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| ExplorerError::Storage("invalid u64 value length".into()))?;
    Ok(u64::from_le_bytes(arr))
}

/// The highest committed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTip {
    pub height: u64,
    pub hash: Hash256,
}

/// Chain-level counters as of one committed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChainSnapshot {
    /// Number of blocks committed since the database was created.
    pub version: u64,
    pub tip: Option<ChainTip>,
    /// Transactions stored; also the next global transaction sequence.
    pub tx_count: u64,
}

impl ChainSnapshot {
    /// Height the next block must have.
    pub fn next_height(&self) -> u64 {
        self.tip.map(|t| t.height + 1).unwrap_or(0)
    }
}

/// RocksDB handle with the explorer's column families.
pub struct IndexDb {
    db: DB,
}

impl IndexDb {
    /// Open or create the database at `path`, creating missing column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ExplorerError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| {
                let mut opts = Options::default();
                if ADDRESS_PREFIXED_CFS.contains(name) {
                    opts.set_prefix_extractor(SliceTransform::create_fixed_prefix(32));
                }
                ColumnFamilyDescriptor::new(*name, opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(storage_err)?;
        Ok(Self { db })
    }

    pub(crate) fn cf_handle(&self, name: &str) -> Result<&ColumnFamily, ExplorerError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| ExplorerError::Storage(format!("missing column family: {name}")))
    }

    /// Take a point-in-time view of the committed state.
    pub fn view(&self) -> Result<ReadView<'_>, ExplorerError> {
        let mut view = ReadView {
            db: self,
            snap: self.db.snapshot(),
            chain: ChainSnapshot::default(),
        };
        view.chain = view.load_chain_snapshot()?;
        Ok(view)
    }

    /// Apply a prepared batch atomically.
    pub(crate) fn write(&self, batch: WriteBatch) -> Result<(), ExplorerError> {
        self.db.write(batch).map_err(storage_err)
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), ExplorerError> {
        self.db.flush().map_err(storage_err)
    }
}

/// A consistent read-only view of the database.
pub struct ReadView<'a> {
    db: &'a IndexDb,
    snap: rocksdb::Snapshot<'a>,
    chain: ChainSnapshot,
}

impl<'a> ReadView<'a> {
    /// Chain counters recorded in this view.
    pub fn chain(&self) -> &ChainSnapshot {
        &self.chain
    }

    pub fn tip(&self) -> Option<ChainTip> {
        self.chain.tip
    }

    fn load_chain_snapshot(&self) -> Result<ChainSnapshot, ExplorerError> {
        let tip = match self.get_raw(CF_METADATA, META_TIP_HASH)? {
            Some(bytes) => {
                let hash = Hash256::from_slice(&bytes)
                    .ok_or_else(|| ExplorerError::Storage("invalid tip hash length".into()))?;
                Some(ChainTip {
                    height: self.meta_u64(META_TIP_HEIGHT)?,
                    hash,
                })
            }
            None => None,
        };
        Ok(ChainSnapshot {
            version: self.meta_u64(META_VERSION)?,
            tip,
            tx_count: self.meta_u64(META_TX_COUNT)?,
        })
    }

    /// Read a little-endian u64 counter from metadata, 0 when absent.
    pub(crate) fn meta_u64(&self, key: &[u8]) -> Result<u64, ExplorerError> {
        match self.get_raw(CF_METADATA, key)? {
            Some(bytes) => read_u64(&bytes),
            None => Ok(0),
        }
    }

    pub(crate) fn get_raw(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>, ExplorerError> {
        let cf = self.db.cf_handle(cf)?;
        self.snap.get_cf(cf, key).map_err(storage_err)
    }

    pub(crate) fn get<T: Decode<()>>(&self, cf: &str, key: &[u8]) -> Result<Option<T>, ExplorerError> {
        self.get_raw(cf, key)?.map(|bytes| decode(&bytes)).transpose()
    }

    pub(crate) fn contains(&self, cf: &str, key: &[u8]) -> Result<bool, ExplorerError> {
        Ok(self.get_raw(cf, key)?.is_some())
    }

    /// Visit entries whose key starts with `prefix`, in key order.
    ///
    /// `visit` returns `false` to stop early.
    pub(crate) fn scan_prefix(
        &self,
        cf: &str,
        prefix: &[u8],
        mut visit: impl FnMut(&[u8], &[u8]) -> Result<bool, ExplorerError>,
    ) -> Result<(), ExplorerError> {
        let handle = self.db.cf_handle(cf)?;
        let iter = self
            .snap
            .iterator_cf(handle, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(storage_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            if !visit(&key, &value)? {
                break;
            }
        }
        Ok(())
    }
}
