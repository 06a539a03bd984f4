//! Chain data model: hashes, raw blocks and transactions as delivered by the
//! chain source, and the derived records the index stores.
//!
//! All monetary values are unsigned base units.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::address::Address;
use crate::constants::{HASH_HEX_LEN, HASH_LEN};
use crate::error::ValidationError;

/// A 32-byte block hash or transaction id.
///
/// Rendered as 64 lowercase hex characters; parsing accepts either case.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; HASH_LEN]);

impl Hash256 {
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Parse a caller-supplied identifier, enforcing the 64-hex shape.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        if !Self::is_well_formed(s) {
            return Err(ValidationError::MalformedHash(s.to_string()));
        }
        let mut bytes = [0u8; HASH_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| ValidationError::MalformedHash(s.to_string()))?;
        Ok(Self(bytes))
    }

    /// Whether `s` has the shape of a block hash or txid.
    pub fn is_well_formed(s: &str) -> bool {
        s.len() == HASH_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; HASH_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Hash256 {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<[u8; HASH_LEN]> for Hash256 {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    pub txid: Hash256,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, index: u32) -> Self {
        Self { txid, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// A transaction input.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
#[serde(untagged)]
pub enum TxInput {
    /// Newly minted value; carries the coinbase script as hex.
    Coinbase { coinbase: String },
    /// Spends output `vout` of transaction `txid`.
    Spend { txid: Hash256, vout: u32 },
}

impl TxInput {
    pub fn is_coinbase(&self) -> bool {
        matches!(self, Self::Coinbase { .. })
    }

    /// The spent outpoint, `None` for coinbase inputs.
    pub fn outpoint(&self) -> Option<OutPoint> {
        match self {
            Self::Coinbase { .. } => None,
            Self::Spend { txid, vout } => Some(OutPoint::new(*txid, *vout)),
        }
    }
}

/// A transaction output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Value in base units.
    pub value: u64,
    /// Position within the transaction.
    pub n: u32,
    /// Owning addresses; empty for outputs no address can spend.
    #[serde(default)]
    pub addresses: Vec<Address>,
}

/// A transaction as delivered by the chain source.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RawTransaction {
    pub txid: Hash256,
    pub vin: Vec<TxInput>,
    pub vout: Vec<TxOutput>,
}

impl RawTransaction {
    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].is_coinbase()
    }

    /// Sum of output values, `None` on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.vout
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Structural checks on the declared inputs and outputs.
    ///
    /// Inputs must be non-empty and either a single coinbase input or only
    /// spends; output positions must match their index; no outpoint may be
    /// spent twice within the transaction.
    pub fn check_shape(&self) -> Result<(), ValidationError> {
        let malformed = |reason: &str| ValidationError::MalformedTransaction {
            txid: self.txid.to_string(),
            reason: reason.to_string(),
        };

        if self.vin.is_empty() {
            return Err(malformed("no inputs"));
        }
        let coinbase_inputs = self.vin.iter().filter(|i| i.is_coinbase()).count();
        if coinbase_inputs > 0 && self.vin.len() != 1 {
            return Err(malformed("coinbase input mixed with other inputs"));
        }
        for (i, out) in self.vout.iter().enumerate() {
            if out.n as usize != i {
                return Err(malformed("output index does not match position"));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for outpoint in self.vin.iter().filter_map(TxInput::outpoint) {
            if !seen.insert(outpoint) {
                return Err(malformed("input spends the same output twice"));
            }
        }
        if self.total_output_value().is_none() {
            return Err(malformed("output value overflow"));
        }
        Ok(())
    }
}

/// A block as delivered by the chain source.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RawBlock {
    pub hash: Hash256,
    pub height: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previousblockhash: Option<Hash256>,
    /// Unix seconds.
    pub time: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub difficulty: f64,
    pub tx: Vec<RawTransaction>,
}

/// A stored block: header fields plus the ordered txids.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockRecord {
    pub hash: Hash256,
    pub height: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previousblockhash: Option<Hash256>,
    pub time: u64,
    pub size: u64,
    pub difficulty: f64,
    pub tx: Vec<Hash256>,
}

impl BlockRecord {
    pub fn from_raw(block: &RawBlock) -> Self {
        Self {
            hash: block.hash,
            height: block.height,
            previousblockhash: block.previousblockhash,
            time: block.time,
            size: block.size,
            difficulty: block.difficulty,
            tx: block.tx.iter().map(|tx| tx.txid).collect(),
        }
    }
}

/// A stored transaction with its position in the chain.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TransactionRecord {
    pub txid: Hash256,
    pub blockhash: Hash256,
    pub height: u64,
    pub time: u64,
    /// Index within the containing block.
    pub position: u32,
    /// Global ingestion order, 0 for the genesis coinbase.
    pub sequence: u64,
    pub vin: Vec<TxInput>,
    pub vout: Vec<TxOutput>,
}

/// Index entry for an output, kept for the lifetime of the chain.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct OutputEntry {
    pub value: u64,
    pub addresses: Vec<Address>,
    /// Height of the block that created the output.
    pub height: u64,
    /// Transaction that consumed the output, if any.
    pub spent_by: Option<Hash256>,
}

impl OutputEntry {
    pub fn is_spent(&self) -> bool {
        self.spent_by.is_some()
    }
}

/// An unspent output as reported for an address.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UnspentOutput {
    pub txid: Hash256,
    pub vout: u32,
    pub value: u64,
    pub height: u64,
}

/// Aggregates maintained per address.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct AddressStats {
    /// Distinct transactions touching the address.
    pub tx_count: u64,
    /// Sum of all output values ever owned (the address volume).
    pub received: u64,
    /// Sum of owned output values that have been spent.
    pub sent: u64,
    /// Number of owned outputs currently unspent.
    pub unspent_count: u64,
}

impl AddressStats {
    /// Sum of unspent owned output values.
    pub fn balance(&self) -> u64 {
        self.received.saturating_sub(self.sent)
    }
}

/// Outcome recorded for one ingestion cycle.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Committed,
    Failed,
}

/// One entry in the append-only sync log.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct SyncHistoryRecord {
    pub sequence: u64,
    /// Chain tip height after the cycle.
    pub height: u64,
    /// Unix seconds.
    pub timestamp: i64,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Which kind of record a search query resolved to.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Block,
    Transaction,
    Address,
}

/// Search outcome. `kind` is `None` when nothing matched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SearchResult {
    #[serde(rename = "searchBy")]
    pub search_by: String,
    #[serde(rename = "type")]
    pub kind: Option<SearchKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(b: u8) -> Hash256 {
        Hash256([b; 32])
    }

    #[test]
    fn hash_hex_roundtrip() {
        let hash = h(0xab);
        let s = hash.to_string();
        assert_eq!(s.len(), 64);
        assert_eq!(Hash256::parse(&s).unwrap(), hash);
        assert_eq!(Hash256::parse(&s.to_uppercase()).unwrap(), hash);
    }

    #[test]
    fn hash_rejects_bad_shape() {
        assert!(Hash256::parse("invalidhash").is_err());
        assert!(Hash256::parse(&"g".repeat(64)).is_err());
        assert!(Hash256::parse(&"a".repeat(63)).is_err());
        assert!(Hash256::parse(&"a".repeat(65)).is_err());
    }

    #[test]
    fn hash_serializes_as_hex_string() {
        let json = serde_json::to_string(&h(1)).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let back: Hash256 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h(1));
    }

    #[test]
    fn tx_input_untagged_json() {
        let cb: TxInput = serde_json::from_str(r#"{"coinbase":"04ffff"}"#).unwrap();
        assert!(cb.is_coinbase());
        let spend: TxInput =
            serde_json::from_str(&format!(r#"{{"txid":"{}","vout":3}}"#, h(2))).unwrap();
        assert_eq!(spend.outpoint(), Some(OutPoint::new(h(2), 3)));
    }

    fn tx(vin: Vec<TxInput>, values: &[u64]) -> RawTransaction {
        RawTransaction {
            txid: h(9),
            vin,
            vout: values
                .iter()
                .enumerate()
                .map(|(n, v)| TxOutput { value: *v, n: n as u32, addresses: vec![] })
                .collect(),
        }
    }

    #[test]
    fn shape_accepts_coinbase_and_spends() {
        let cb = tx(vec![TxInput::Coinbase { coinbase: "00".into() }], &[50]);
        assert!(cb.is_coinbase());
        assert!(cb.check_shape().is_ok());
        let spend = tx(
            vec![TxInput::Spend { txid: h(1), vout: 0 }, TxInput::Spend { txid: h(1), vout: 1 }],
            &[10, 20],
        );
        assert!(spend.check_shape().is_ok());
    }

    #[test]
    fn shape_rejects_malformed_inputs() {
        assert!(tx(vec![], &[1]).check_shape().is_err());
        let mixed = tx(
            vec![TxInput::Coinbase { coinbase: "00".into() }, TxInput::Spend { txid: h(1), vout: 0 }],
            &[1],
        );
        assert!(mixed.check_shape().is_err());
        let dup = tx(
            vec![TxInput::Spend { txid: h(1), vout: 0 }, TxInput::Spend { txid: h(1), vout: 0 }],
            &[1],
        );
        assert!(dup.check_shape().is_err());
        assert!(tx(vec![TxInput::Coinbase { coinbase: "00".into() }], &[u64::MAX, 1])
            .check_shape()
            .is_err());
    }

    #[test]
    fn shape_rejects_misnumbered_outputs() {
        let mut t = tx(vec![TxInput::Coinbase { coinbase: "00".into() }], &[1, 2]);
        t.vout[1].n = 5;
        assert!(t.check_shape().is_err());
    }

    #[test]
    fn balance_is_received_minus_sent() {
        let stats = AddressStats { tx_count: 3, received: 100, sent: 40, unspent_count: 1 };
        assert_eq!(stats.balance(), 60);
    }

    #[test]
    fn search_result_json_shape() {
        let hit = SearchResult { search_by: "x".into(), kind: Some(SearchKind::Transaction) };
        let v = serde_json::to_value(&hit).unwrap();
        assert_eq!(v["searchBy"], "x");
        assert_eq!(v["type"], "transaction");
        let miss = SearchResult { search_by: "blabla".into(), kind: None };
        let v = serde_json::to_value(&miss).unwrap();
        assert!(v["type"].is_null());
    }
}
