//! Protocol and service constants.

/// Length of a block hash or txid in bytes.
pub const HASH_LEN: usize = 32;

/// Length of a block hash or txid rendered as hex.
pub const HASH_HEX_LEN: usize = HASH_LEN * 2;

/// Decoded length of a base58 address: version byte, 20-byte payload, 4-byte checksum.
pub const ADDRESS_DECODED_LEN: usize = 25;

/// Bounds on the textual length of a base58 address.
pub const ADDRESS_MIN_CHARS: usize = 26;
pub const ADDRESS_MAX_CHARS: usize = 35;

/// Longest Bech32 string, and longest human-readable part within it.
pub const BECH32_MAX_CHARS: usize = 90;
pub const BECH32_MAX_HRP_CHARS: usize = 83;

/// Upper bound a caller may request for `limit` unless configured otherwise.
pub const DEFAULT_MAX_PAGE_LIMIT: u64 = 100;

/// `limit` used when the caller omits it.
pub const DEFAULT_PAGE_LIMIT: u64 = 10;

/// Transactions returned per page of the address view.
pub const DEFAULT_ADDRESS_PAGE_SIZE: u64 = 10;

/// Base units per coin (display only).
pub const COIN: u64 = 100_000_000;
