//! Parsing and range checks for caller-supplied numeric parameters.
//!
//! Every numeric parameter arrives as text. It must parse as a signed 64-bit
//! integer and be non-negative. Values that overflow `i64` are rejected rather
//! than clamped, so `10000000000000000000` is a validation failure even though
//! it would fit in a `u64`.

use std::num::IntErrorKind;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_PAGE_LIMIT, DEFAULT_PAGE_LIMIT};
use crate::error::ValidationError;

/// Bounds applied to `limit` parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLimits {
    /// Used when the caller omits `limit`.
    pub default_limit: u64,
    /// Largest `limit` a caller may request.
    pub max_limit: u64,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_PAGE_LIMIT,
            max_limit: DEFAULT_MAX_PAGE_LIMIT,
        }
    }
}

/// A validated `limit`/`offset` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u64,
    pub offset: u64,
}

impl PageRequest {
    pub fn new(limit: u64, offset: u64) -> Self {
        Self { limit, offset }
    }

    /// Parse raw `limit` and `offset` parameters.
    pub fn parse(
        limit: Option<&str>,
        offset: Option<&str>,
        limits: &PageLimits,
    ) -> Result<Self, ValidationError> {
        let limit = parse_limit(limit, limits)?;
        let offset = parse_optional("offset", offset, 0)?;
        Ok(Self { limit, offset })
    }

    /// Positions `offset..offset + limit` clipped to `len`, most recent first.
    ///
    /// Yields indices counted from the newest item (0 = newest). Empty when
    /// `offset >= len`.
    pub fn window(&self, len: u64) -> std::ops::Range<u64> {
        let start = self.offset.min(len);
        let end = self.offset.saturating_add(self.limit).min(len);
        start..end
    }
}

/// Parse a `limit` parameter and check it against `limits.max_limit`.
pub fn parse_limit(raw: Option<&str>, limits: &PageLimits) -> Result<u64, ValidationError> {
    let limit = parse_optional("limit", raw, limits.default_limit)?;
    if limit > limits.max_limit {
        return Err(ValidationError::LimitTooLarge {
            got: limit,
            max: limits.max_limit,
        });
    }
    Ok(limit)
}

/// Parse an optional non-negative integer, using `default` when absent.
pub fn parse_optional(
    field: &'static str,
    raw: Option<&str>,
    default: u64,
) -> Result<u64, ValidationError> {
    match raw {
        None => Ok(default),
        Some(raw) => parse_non_negative(field, raw),
    }
}

/// Parse a required non-negative integer that fits in `i64`.
pub fn parse_non_negative(field: &'static str, raw: &str) -> Result<u64, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::Missing { field });
    }
    match raw.parse::<i64>() {
        Ok(v) if v < 0 => Err(ValidationError::Negative { field }),
        Ok(v) => Ok(v as u64),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
                Err(ValidationError::OutOfRange { field })
            }
            _ => Err(ValidationError::NotAnInteger { field }),
        },
    }
}
