//! NAV observation gate
//!
//! The on-chain-facing invariant enforcement. Each basket moves from
//! `Uninitialized` to `Observed` on its first accepted value; from then on
//! every candidate is checked against the previous observation with a
//! symmetric basis-point deviation bound. Staleness is derived at read
//! time and never blocks writes. All deviation math is integer-only at the
//! canonical 18-decimal scale.

use crate::error::NavError;
use crate::types::BasketId;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{info, warn};

/// Hard ceiling for the deviation threshold: 100%.
pub const MAX_DEVIATION_BPS: u64 = 10_000;

/// Capability required to change basket thresholds. Issued once at gate
/// construction and handed to the operator holding the manager role.
pub struct ManagerCap {
    _priv: (),
}

/// The latest accepted observation for a basket, plus its thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavObservation {
    /// Canonical 18-decimal NAV.
    pub nav: u128,
    /// Unix seconds of the last accepted observation.
    pub timestamp: i64,
    pub staleness_threshold_secs: u64,
    pub deviation_threshold_bps: u64,
}

impl NavObservation {
    /// Staleness is a read-time property: the observation is stale when
    /// more than the threshold has elapsed since it was accepted.
    pub fn is_stale(&self, now_secs: i64) -> bool {
        now_secs.saturating_sub(self.timestamp) > self.staleness_threshold_secs as i64
    }
}

#[derive(Debug, Clone)]
struct BasketState {
    /// `None` until the first observation is accepted.
    observed: Option<(u128, i64)>,
    staleness_threshold_secs: u64,
    deviation_threshold_bps: u64,
}

/// Per-basket defaults applied when a basket is first seen.
#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    pub default_staleness_secs: u64,
    pub default_deviation_bps: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            default_staleness_secs: 24 * 3600,
            default_deviation_bps: 500,
        }
    }
}

pub struct NavGate {
    defaults: GateConfig,
    // The write lock serializes read-then-compare against concurrent
    // submitters; basket records are never removed.
    baskets: RwLock<HashMap<BasketId, BasketState>>,
}

impl NavGate {
    /// Build the gate and issue the single manager capability.
    pub fn new(defaults: GateConfig) -> (Self, ManagerCap) {
        let gate = Self {
            defaults,
            baskets: RwLock::new(HashMap::new()),
        };
        (gate, ManagerCap { _priv: () })
    }

    fn fresh_state(&self) -> BasketState {
        BasketState {
            observed: None,
            staleness_threshold_secs: self.defaults.default_staleness_secs,
            deviation_threshold_bps: self.defaults.default_deviation_bps,
        }
    }

    /// Submit a candidate observation for a basket.
    ///
    /// The first value for a basket is accepted without a deviation check;
    /// afterwards `|new - previous| / previous` must stay within the
    /// basket's threshold, judged identically for increases and decreases.
    pub fn submit_observation(&self, basket: BasketId, nav: u128) -> Result<(), NavError> {
        if nav == 0 {
            return Err(NavError::InvalidNav { basket });
        }

        let mut baskets = self
            .baskets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = baskets
            .entry(basket)
            .or_insert_with(|| self.fresh_state());

        if let Some((previous, _)) = state.observed {
            if exceeds_deviation(previous, nav, state.deviation_threshold_bps) {
                let deviation_bps = deviation_bps(previous, nav);
                warn!(
                    basket = %basket,
                    previous,
                    candidate = nav,
                    deviation_bps,
                    threshold_bps = state.deviation_threshold_bps,
                    "observation rejected"
                );
                return Err(NavError::DeviationTooHigh {
                    basket,
                    previous,
                    candidate: nav,
                    deviation_bps,
                    threshold_bps: state.deviation_threshold_bps,
                });
            }
        } else {
            info!(basket = %basket, nav, "first observation for basket");
        }

        state.observed = Some((nav, Utc::now().timestamp()));
        Ok(())
    }

    /// The latest accepted observation, or `None` while uninitialized.
    pub fn observation(&self, basket: BasketId) -> Option<NavObservation> {
        let baskets = self.baskets.read().ok()?;
        let state = baskets.get(&basket)?;
        let (nav, timestamp) = state.observed?;
        Some(NavObservation {
            nav,
            timestamp,
            staleness_threshold_secs: state.staleness_threshold_secs,
            deviation_threshold_bps: state.deviation_threshold_bps,
        })
    }

    /// Whether the basket's latest observation is stale right now.
    /// `None` while the basket has no observation.
    pub fn is_stale(&self, basket: BasketId) -> Option<bool> {
        self.observation(basket)
            .map(|obs| obs.is_stale(Utc::now().timestamp()))
    }

    /// Change a basket's staleness threshold. Creates the basket record
    /// lazily so thresholds can be configured before the first observation.
    pub fn set_staleness_threshold(
        &self,
        _cap: &ManagerCap,
        basket: BasketId,
        secs: u64,
    ) -> Result<(), NavError> {
        let mut baskets = self
            .baskets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = baskets
            .entry(basket)
            .or_insert_with(|| self.fresh_state());
        state.staleness_threshold_secs = secs;
        Ok(())
    }

    /// Change a basket's deviation threshold. Values above 100% (10000
    /// bps) are rejected.
    pub fn set_deviation_threshold(
        &self,
        _cap: &ManagerCap,
        basket: BasketId,
        bps: u64,
    ) -> Result<(), NavError> {
        if bps > MAX_DEVIATION_BPS {
            return Err(NavError::InvalidThreshold { bps });
        }
        let mut baskets = self
            .baskets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = baskets
            .entry(basket)
            .or_insert_with(|| self.fresh_state());
        state.deviation_threshold_bps = bps;
        Ok(())
    }
}

/// Exact threshold test: `|candidate - previous| / previous > threshold /
/// 10000`, cross-multiplied so no division can round a sub-bps overshoot
/// down to the threshold. Overflow scaling the diff means the move dwarfs
/// any representable bound; overflow on the bound side means the bound
/// exceeds any representable diff.
fn exceeds_deviation(previous: u128, candidate: u128, threshold_bps: u64) -> bool {
    let diff = previous.abs_diff(candidate);
    match (
        diff.checked_mul(10_000),
        previous.checked_mul(threshold_bps as u128),
    ) {
        (Some(scaled), Some(bound)) => scaled > bound,
        (None, _) => true,
        (Some(_), None) => false,
    }
}

/// Truncated deviation in basis points, for diagnostics only; acceptance
/// is decided by [`exceeds_deviation`]. Saturates at `u64::MAX` rather
/// than overflowing on absurd inputs.
fn deviation_bps(previous: u128, candidate: u128) -> u64 {
    debug_assert!(previous > 0);
    let diff = previous.abs_diff(candidate);
    match diff.checked_mul(10_000) {
        Some(scaled) => {
            let bps = scaled / previous;
            bps.min(u64::MAX as u128) as u64
        }
        None => u64::MAX,
    }
}
