//! Error types for the Exploder explorer.
use thiserror::Error;

/// Malformed or out-of-range caller input. Always a client fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")] Missing { field: &'static str },
    #[error("{field} must be an integer")] NotAnInteger { field: &'static str },
    #[error("{field} must not be negative")] Negative { field: &'static str },
    #[error("{field} is out of range")] OutOfRange { field: &'static str },
    #[error("limit {got} exceeds maximum {max}")] LimitTooLarge { got: u64, max: u64 },
    #[error("malformed hash: {0}")] MalformedHash(String),
    #[error("malformed address: {0}")] MalformedAddress(String),
    #[error("malformed transaction {txid}: {reason}")] MalformedTransaction { txid: String, reason: String },
    #[error("malformed block {hash}: {reason}")] MalformedBlock { hash: String, reason: String },
}

/// Ingestion-time chain consistency violation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("height {height} already holds block {existing}")] HeightOccupied { height: u64, existing: String },
    #[error("height mismatch: expected {expected}, got {got}")] HeightMismatch { expected: u64, got: u64 },
    #[error("broken parent link at height {height}: expected {expected}, got {got}")] ParentMismatch { height: u64, expected: String, got: String },
    #[error("genesis block must not have a parent")] GenesisWithParent,
    #[error("duplicate block: {0}")] DuplicateBlock(String),
    #[error("duplicate txid: {0}")] DuplicateTxid(String),
    #[error("double-spend: {0} is already spent")] DoubleSpend(String),
    #[error("unknown output: {0}")] UnknownOutput(String),
    #[error("value overflow in {0}")] ValueOverflow(String),
}

#[derive(Error, Debug)]
pub enum ExplorerError {
    #[error(transparent)] Validation(#[from] ValidationError),
    #[error(transparent)] Conflict(#[from] ConflictError),
    #[error("not found: {0}")] NotFound(String),
    #[error("upstream: {0}")] Upstream(String),
    #[error("storage: {0}")] Storage(String),
}

impl ExplorerError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }
}

impl From<bincode::error::EncodeError> for ExplorerError {
    fn from(e: bincode::error::EncodeError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for ExplorerError {
    fn from(e: bincode::error::DecodeError) -> Self {
        Self::Storage(e.to_string())
    }
}
