//! Error taxonomy for the pipeline
//!
//! Three families, matching how operators need to triage rejections:
//! - transient network trouble (retried, then surfaced),
//! - data-quality failures (never retried, fail fast),
//! - NAV invariant violations (always fatal to the submission).

use crate::retry::Retryable;
use crate::types::BasketId;
use thiserror::Error;

/// Failures from the decimal/amount codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid numeric format: {0:?}")]
    InvalidNumericFormat(String),

    #[error("amount {amount} at {decimals} decimals overflows the canonical scale")]
    AmountOverflow { amount: u128, decimals: u32 },
}

/// Failures from price fetching (primary provider, cross-validator, cache).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{origin} returned http status {status}")]
    Http { origin: &'static str, status: u16 },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid price payload: {0}")]
    InvalidPrice(String),

    #[error("no live price and no cached fallback available")]
    NoFallbackAvailable,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl Retryable for FetchError {
    /// Only rate limiting, upstream unavailability and timeouts are
    /// transient. Everything else is a data-quality failure and must not
    /// be retried.
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http { status, .. } => matches!(status, 429 | 503),
            FetchError::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Invariant violations raised by the NAV observation gate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NavError {
    #[error("nav value must be positive for basket {basket}")]
    InvalidNav { basket: BasketId },

    #[error(
        "nav deviation {deviation_bps} bps exceeds threshold {threshold_bps} bps \
         for basket {basket} (previous {previous}, candidate {candidate})"
    )]
    DeviationTooHigh {
        basket: BasketId,
        previous: u128,
        candidate: u128,
        deviation_bps: u64,
        threshold_bps: u64,
    },

    #[error("deviation threshold {bps} bps exceeds the 10000 bps ceiling")]
    InvalidThreshold { bps: u64 },
}
