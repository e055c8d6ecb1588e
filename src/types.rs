//! Core types used throughout the NAV oracle pipeline
//!
//! Defines symbols, basket identifiers, price samples and source labels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated six-letter base+quote pair, e.g. `EURUSD`.
///
/// Only ASCII uppercase letters are accepted; anything else is an
/// unsupported symbol and must be rejected before any network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol([u8; 6]);

impl Symbol {
    /// Parse a symbol key, returning `None` when it does not match the
    /// six-uppercase-letter pattern.
    pub fn parse(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 6 || !bytes.iter().all(|b| b.is_ascii_uppercase()) {
            return None;
        }
        let mut buf = [0u8; 6];
        buf.copy_from_slice(bytes);
        Some(Self(buf))
    }

    pub fn as_str(&self) -> &str {
        // Validated at construction: always ASCII.
        std::str::from_utf8(&self.0).unwrap_or("??????")
    }

    /// Base currency (first three letters).
    pub fn base(&self) -> &str {
        &self.as_str()[..3]
    }

    /// Quote currency (last three letters).
    pub fn quote(&self) -> &str {
        &self.as_str()[3..]
    }

    /// Direct concatenation used by most quote endpoints, e.g. `EURUSD`.
    pub fn concat(&self) -> String {
        self.as_str().to_string()
    }

    /// Dashed encoding, e.g. `EUR-USD`.
    pub fn dashed(&self) -> String {
        format!("{}-{}", self.base(), self.quote())
    }

    /// The inverted pair, e.g. `USDJPY` -> `JPYUSD`.
    pub fn inverse(&self) -> Symbol {
        let mut buf = [0u8; 6];
        buf[..3].copy_from_slice(&self.0[3..]);
        buf[3..].copy_from_slice(&self.0[..3]);
        Symbol(buf)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque 32-byte basket identity. Baskets are permanent once registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BasketId([u8; 32]);

impl BasketId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse from a hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut buf = [0u8; 32];
        hex::decode_to_slice(s, &mut buf)?;
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BasketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Where a resolved price came from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceLabel {
    Primary,
    Secondary,
    Cache,
}

impl SourceLabel {
    pub fn name(&self) -> &'static str {
        match self {
            SourceLabel::Primary => "primary",
            SourceLabel::Secondary => "secondary",
            SourceLabel::Cache => "cache",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(SourceLabel::Primary),
            "secondary" => Some(SourceLabel::Secondary),
            "cache" => Some(SourceLabel::Cache),
            _ => None,
        }
    }
}

impl fmt::Display for SourceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A price resolved by any provider: fixed-point `amount` at `decimals`
/// scale, denoting the human value `amount / 10^decimals`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceSample {
    pub symbol: Symbol,
    pub amount: u128,
    pub decimals: u32,
    /// Unix seconds at resolution time.
    pub timestamp: i64,
    /// True when the value came from cache/fallback rather than a live fetch.
    pub degraded: bool,
}

impl PriceSample {
    /// Approximate float value, for cross-checking and logging only.
    /// Threshold math against the NAV gate stays in integer space.
    pub fn value_f64(&self) -> f64 {
        self.amount as f64 / 10f64.powi(self.decimals as i32)
    }
}

/// Outcome of a primary-provider fetch.
#[derive(Debug, Clone)]
pub struct FetchPriceResult {
    pub sample: PriceSample,
    pub source: SourceLabel,
    /// True only when the value originated from the cache.
    pub stale: bool,
}
