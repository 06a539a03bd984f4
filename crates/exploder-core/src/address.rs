//! Addresses as carried by chain outputs.
//!
//! Two encodings are accepted, both by the indexer and from callers:
//! - base58: bitcoin alphabet, 26 to 35 characters, decoding to exactly
//!   [`ADDRESS_DECODED_LEN`] bytes (the checksum is not verified)
//! - segwit: Bech32 ([BIP-173]) or Bech32m ([BIP-350]) with a valid checksum
//!
//! [BIP-173]: https://github.com/bitcoin/bips/blob/master/bip-0173.mediawiki
//! [BIP-350]: https://github.com/bitcoin/bips/blob/master/bip-0350.mediawiki

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{
    ADDRESS_DECODED_LEN, ADDRESS_MAX_CHARS, ADDRESS_MIN_CHARS, BECH32_MAX_CHARS, BECH32_MAX_HRP_CHARS,
};
use crate::error::ValidationError;

/// An address string owning one or more outputs.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Parse and shape-check an address.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        if !Self::is_well_formed(s) {
            return Err(ValidationError::MalformedAddress(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Whether `s` is a base58 or segwit address.
    pub fn is_well_formed(s: &str) -> bool {
        is_base58(s) || is_segwit(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fixed-width key used to group index entries by address.
    pub fn index_key(&self) -> [u8; 32] {
        blake3::hash(self.0.as_bytes()).into()
    }
}

fn is_base58(s: &str) -> bool {
    if !(ADDRESS_MIN_CHARS..=ADDRESS_MAX_CHARS).contains(&s.len()) {
        return false;
    }
    matches!(bs58::decode(s).into_vec(), Ok(bytes) if bytes.len() == ADDRESS_DECODED_LEN)
}

// --- Bech32 / Bech32m ---

/// Bech32 character set for 5-bit values.
const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// Polymod residue of a valid Bech32 string.
const BECH32_CONST: u32 = 1;

/// Polymod residue of a valid Bech32m string.
const BECH32M_CONST: u32 = 0x2bc830a3;

const CHECKSUM_LEN: usize = 6;

fn is_segwit(s: &str) -> bool {
    if s.len() > BECH32_MAX_CHARS || !s.is_ascii() {
        return false;
    }
    let has_lower = s.bytes().any(|c| c.is_ascii_lowercase());
    let has_upper = s.bytes().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return false;
    }

    let lower = s.to_ascii_lowercase();
    let Some(sep) = lower.rfind('1') else {
        return false;
    };
    let (hrp, data_part) = (&lower[..sep], &lower[sep + 1..]);
    if hrp.is_empty() || hrp.len() > BECH32_MAX_HRP_CHARS || !hrp.bytes().all(|c| (33..=126).contains(&c)) {
        return false;
    }
    // Witness version plus checksum at the least.
    if data_part.len() <= CHECKSUM_LEN {
        return false;
    }

    let mut values = hrp_expand(hrp);
    for c in data_part.bytes() {
        match CHARSET.iter().position(|&ch| ch == c) {
            Some(pos) => values.push(pos as u8),
            None => return false,
        }
    }
    matches!(polymod(&values), BECH32_CONST | BECH32M_CONST)
}

fn polymod(values: &[u8]) -> u32 {
    const GEN: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];
    let mut chk: u32 = 1;
    for &v in values {
        let b = chk >> 25;
        chk = ((chk & 0x1ffffff) << 5) ^ (v as u32);
        for (i, &g) in GEN.iter().enumerate() {
            if (b >> i) & 1 != 0 {
                chk ^= g;
            }
        }
    }
    chk
}

fn hrp_expand(hrp: &str) -> Vec<u8> {
    let mut ret = Vec::with_capacity(hrp.len() * 2 + 1);
    ret.extend(hrp.bytes().map(|c| c >> 5));
    ret.push(0);
    ret.extend(hrp.bytes().map(|c| c & 31));
    ret
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
