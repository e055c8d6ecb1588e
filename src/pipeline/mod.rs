//! Pipeline orchestration
//!
//! One check cycle per symbol: resolve a price through the primary
//! provider, cross-check it against the independent secondary source, then
//! submit the canonical value to the NAV gate. Cross-check trouble is
//! recorded but never blocks submission; gate rejections are fatal to the
//! cycle and surfaced with their kind intact.
//!
//! Cycles may run concurrently across symbols but are sequential within
//! one. No wall-clock ceiling is imposed here; callers wanting a deadline
//! wrap `run_cycle` in `tokio::time::timeout`.

use crate::codec;
use crate::error::{CodecError, FetchError, NavError};
use crate::nav::NavGate;
use crate::provider::PriceProvider;
use crate::types::{BasketId, SourceLabel, Symbol};
use crate::validator::CrossValidator;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Nav(#[from] NavError),
}

/// What a completed cycle did.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// The observation was accepted by the gate.
    Accepted {
        symbol: Symbol,
        basket: BasketId,
        nav: u128,
        source: SourceLabel,
        /// `None` when the cross-check was indeterminate or unavailable.
        cross_ok: Option<bool>,
        degraded: bool,
    },
    /// The symbol was unsupported; nothing was submitted.
    Skipped { symbol: String },
}

pub struct Pipeline {
    provider: Arc<PriceProvider>,
    validator: Arc<CrossValidator>,
    gate: Arc<NavGate>,
}

impl Pipeline {
    pub fn new(
        provider: Arc<PriceProvider>,
        validator: Arc<CrossValidator>,
        gate: Arc<NavGate>,
    ) -> Self {
        Self {
            provider,
            validator,
            gate,
        }
    }

    pub fn provider(&self) -> &Arc<PriceProvider> {
        &self.provider
    }

    pub fn validator(&self) -> &Arc<CrossValidator> {
        &self.validator
    }

    pub fn gate(&self) -> &Arc<NavGate> {
        &self.gate
    }

    /// Run one resolve, cross-check, submit cycle.
    pub async fn run_cycle(
        &self,
        symbol_key: &str,
        basket: BasketId,
    ) -> Result<CycleOutcome, PipelineError> {
        let Some(result) = self.provider.fetch(symbol_key).await? else {
            return Ok(CycleOutcome::Skipped {
                symbol: symbol_key.to_string(),
            });
        };

        let provider_price = result.sample.value_f64();
        let check = self.validator.check(symbol_key, provider_price).await;
        let cross_ok = match (&check.error, check.diff_pct) {
            (Some(e), _) => {
                // Degraded cross-validation is recoverable: record and go on.
                warn!(symbol = %symbol_key, error = %e, "cross-check unavailable");
                None
            }
            (None, Some(_)) => Some(check.ok),
            (None, None) => None,
        };

        let nav = codec::normalize_to_18(result.sample.amount, result.sample.decimals)?;
        self.gate.submit_observation(basket, nav)?;

        info!(
            symbol = %result.sample.symbol,
            basket = %basket,
            nav,
            source = %result.source,
            degraded = result.sample.degraded,
            cross_ok = ?cross_ok,
            "observation accepted"
        );

        Ok(CycleOutcome::Accepted {
            symbol: result.sample.symbol,
            basket,
            nav,
            source: result.source,
            cross_ok,
            degraded: result.sample.degraded,
        })
    }
}
