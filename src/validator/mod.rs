//! Cross-validator
//!
//! Independently re-resolves a price for a symbol from a second, unrelated
//! data source and compares it with the value the primary provider produced.
//! Candidate encodings are tried in order (direct concatenation, dashed,
//! override-table entry, inverted pair); disagreement beyond the class
//! threshold fires an alert. A cross-check failure never blocks the primary
//! pipeline; it records and alerts for out-of-band monitoring only.

mod google;

pub use google::GoogleFinanceSource;

use crate::error::FetchError;
use crate::retry::RetryPolicy;
use crate::types::Symbol;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// A candidate lookup against the secondary source: the query to send and
/// an optional extraction pattern replacing the source's default.
#[derive(Debug, Clone)]
pub struct SecondaryQuery {
    pub query: String,
    pub pattern: Option<Regex>,
}

impl SecondaryQuery {
    fn plain(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            pattern: None,
        }
    }
}

/// Narrow seam around the scraped secondary source so the extraction
/// strategy can be swapped without touching retry or threshold logic.
///
/// `Ok(None)` means the source had no quote for this candidate encoding;
/// the caller moves on to the next candidate.
#[async_trait]
pub trait SecondaryQuoteSource: Send + Sync {
    async fn resolve(&self, query: &SecondaryQuery) -> Result<Option<f64>, FetchError>;
}

/// Outcome of one cross-check. The last result per symbol is retained for
/// inspection; alerts accumulate separately until drained.
#[derive(Debug, Clone)]
pub struct CrossCheckResult {
    pub symbol: String,
    pub ok: bool,
    pub provider_price: f64,
    pub secondary_price: Option<f64>,
    pub diff_pct: Option<f64>,
    pub threshold_pct: f64,
    pub inverse_used: bool,
    /// Which candidate encoding resolved: "direct", "dashed", "override",
    /// "inverse", "inverse-dashed", or "" when none did.
    pub resolution_path: String,
    pub error: Option<String>,
    pub alert: Option<String>,
}

/// Symbols whose secondary-source encoding differs structurally from
/// currency pairs (commodity crosses). These get their own query, their own
/// extraction pattern, and the wider commodity threshold.
#[derive(Debug, Clone)]
pub struct OverrideEntry {
    pub query: String,
    pub pattern: Regex,
}

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Tolerated diff for plain currency pairs, in percent.
    pub currency_threshold_pct: f64,
    /// Tolerated diff for override-table symbols, in percent.
    pub commodity_threshold_pct: f64,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            currency_threshold_pct: 1.0,
            commodity_threshold_pct: 3.0,
            max_attempts: 2,
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
        }
    }
}

pub struct CrossValidator {
    source: Arc<dyn SecondaryQuoteSource>,
    config: ValidatorConfig,
    retry: RetryPolicy,
    overrides: HashMap<String, OverrideEntry>,
    last_checks: RwLock<HashMap<String, CrossCheckResult>>,
    alerts: RwLock<Vec<String>>,
}

impl CrossValidator {
    pub fn new(source: Arc<dyn SecondaryQuoteSource>, config: ValidatorConfig) -> Self {
        let retry = RetryPolicy::new(
            config.max_attempts,
            config.initial_delay_ms,
            config.max_delay_ms,
        );
        Self {
            source,
            retry,
            config,
            overrides: default_override_table(),
            last_checks: RwLock::new(HashMap::new()),
            alerts: RwLock::new(Vec::new()),
        }
    }

    /// Replace the override table (commodity-style symbol encodings).
    pub fn with_overrides(mut self, overrides: HashMap<String, OverrideEntry>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Cross-check `provider_price` for `symbol_key` against the secondary
    /// source. Never returns an error: indeterminate outcomes are encoded
    /// in the result so callers can count alerts and data-quality problems
    /// separately.
    pub async fn check(&self, symbol_key: &str, provider_price: f64) -> CrossCheckResult {
        let Some(symbol) = Symbol::parse(symbol_key) else {
            let result = CrossCheckResult {
                symbol: symbol_key.to_string(),
                ok: false,
                provider_price,
                secondary_price: None,
                diff_pct: None,
                threshold_pct: self.config.currency_threshold_pct,
                inverse_used: false,
                resolution_path: String::new(),
                error: Some("unsupported symbol".to_string()),
                alert: None,
            };
            self.store(result.clone());
            return result;
        };

        let threshold_pct = if self.overrides.contains_key(symbol.as_str()) {
            self.config.commodity_threshold_pct
        } else {
            self.config.currency_threshold_pct
        };

        let resolved = self.resolve_secondary(symbol).await;

        let mut result = CrossCheckResult {
            symbol: symbol.concat(),
            ok: false,
            provider_price,
            secondary_price: None,
            diff_pct: None,
            threshold_pct,
            inverse_used: false,
            resolution_path: String::new(),
            error: None,
            alert: None,
        };

        match resolved {
            Err(e) => {
                result.error = Some(e);
            }
            Ok((secondary_price, path, inverse_used)) => {
                result.secondary_price = Some(secondary_price);
                result.resolution_path = path;
                result.inverse_used = inverse_used;

                if !secondary_price.is_finite()
                    || secondary_price <= 0.0
                    || !provider_price.is_finite()
                {
                    // Indeterminate, not a disagreement: no alert fires.
                    result.error = Some("Invalid diff".to_string());
                } else {
                    let diff_pct =
                        (provider_price - secondary_price).abs() / secondary_price * 100.0;
                    result.diff_pct = Some(diff_pct);
                    result.ok = diff_pct <= threshold_pct;

                    if !result.ok {
                        let alert = format!(
                            "price divergence on {}: provider {:.6} vs secondary {:.6} \
                             ({:.4}% > {:.2}%)",
                            symbol, provider_price, secondary_price, diff_pct, threshold_pct
                        );
                        warn!(symbol = %symbol, diff_pct, threshold_pct, "cross-check alert");
                        if let Ok(mut alerts) = self.alerts.write() {
                            alerts.push(alert.clone());
                        }
                        result.alert = Some(alert);
                    } else {
                        debug!(symbol = %symbol, diff_pct, "cross-check within tolerance");
                    }
                }
            }
        }

        self.store(result.clone());
        result
    }

    /// Try candidate encodings in order. Returns the resolved price, the
    /// path label, and whether the inverse pair was used.
    async fn resolve_secondary(&self, symbol: Symbol) -> Result<(f64, String, bool), String> {
        let mut candidates: Vec<(String, SecondaryQuery, bool)> = vec![
            ("direct".into(), SecondaryQuery::plain(symbol.concat()), false),
            ("dashed".into(), SecondaryQuery::plain(symbol.dashed()), false),
        ];
        if let Some(entry) = self.overrides.get(symbol.as_str()) {
            candidates.push((
                "override".into(),
                SecondaryQuery {
                    query: entry.query.clone(),
                    pattern: Some(entry.pattern.clone()),
                },
                false,
            ));
        }
        let inverse = symbol.inverse();
        candidates.push((
            "inverse".into(),
            SecondaryQuery::plain(inverse.concat()),
            true,
        ));
        candidates.push((
            "inverse-dashed".into(),
            SecondaryQuery::plain(inverse.dashed()),
            true,
        ));

        let mut last_err: Option<String> = None;

        for (path, query, inverted) in candidates {
            match self.retry.execute(|| self.source.resolve(&query)).await {
                Ok(Some(price)) => {
                    if inverted {
                        if !price.is_finite() || price == 0.0 {
                            last_err = Some(format!("inverse price {price} not invertible"));
                            continue;
                        }
                        return Ok((1.0 / price, path, true));
                    }
                    return Ok((price, path, false));
                }
                Ok(None) => {
                    debug!(symbol = %symbol, candidate = %query.query, "no secondary match");
                }
                Err(e) => {
                    // Non-transient errors already aborted the retry loop;
                    // either way this candidate is done, move to the next.
                    warn!(symbol = %symbol, candidate = %query.query, error = %e, "candidate failed");
                    last_err = Some(e.to_string());
                }
            }
        }

        Err(last_err.unwrap_or_else(|| "no secondary quote resolved".to_string()))
    }

    fn store(&self, result: CrossCheckResult) {
        if let Ok(mut checks) = self.last_checks.write() {
            checks.insert(result.symbol.clone(), result);
        }
    }

    /// Last result recorded for a symbol, if any.
    pub fn last_check(&self, symbol_key: &str) -> Option<CrossCheckResult> {
        self.last_checks.read().ok()?.get(symbol_key).cloned()
    }

    /// Drain the pending alert buffer.
    pub fn take_alerts(&self) -> Vec<String> {
        self.alerts
            .write()
            .map(|mut alerts| std::mem::take(&mut *alerts))
            .unwrap_or_default()
    }

    pub fn pending_alert_count(&self) -> usize {
        self.alerts.read().map(|a| a.len()).unwrap_or(0)
    }

    /// Clear all recorded results and alerts (test isolation).
    pub fn reset(&self) {
        if let Ok(mut checks) = self.last_checks.write() {
            checks.clear();
        }
        if let Ok(mut alerts) = self.alerts.write() {
            alerts.clear();
        }
    }
}

/// Commodity crosses whose secondary-source encoding is not a currency
/// pair. Patterns extract a dollar amount from prose-style markup.
fn default_override_table() -> HashMap<String, OverrideEntry> {
    let mut table = HashMap::new();
    if let Ok(pattern) = Regex::new(r"([0-9][0-9,]*\.?[0-9]*)\s*(?:USD|US dollars?) per (?:troy )?ounce") {
        table.insert(
            "XAUUSD".to_string(),
            OverrideEntry {
                query: "gold price per ounce in USD".to_string(),
                pattern: pattern.clone(),
            },
        );
        table.insert(
            "XAGUSD".to_string(),
            OverrideEntry {
                query: "silver price per ounce in USD".to_string(),
                pattern,
            },
        );
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum StubResponse {
        Price(f64),
        Miss,
        Status(u16),
    }

    /// Scriptable secondary source: each query consumes the next scripted
    /// response; unknown queries read as "no match".
    #[derive(Default)]
    struct StubSecondary {
        scripts: Mutex<HashMap<String, VecDeque<StubResponse>>>,
    }

    impl StubSecondary {
        fn script(self, query: &str, responses: Vec<StubResponse>) -> Self {
            if let Ok(mut scripts) = self.scripts.lock() {
                scripts.insert(query.to_string(), responses.into());
            }
            self
        }

        fn price(self, query: &str, value: f64) -> Self {
            self.script(query, vec![StubResponse::Price(value)])
        }
    }

    #[async_trait]
    impl SecondaryQuoteSource for StubSecondary {
        async fn resolve(&self, query: &SecondaryQuery) -> Result<Option<f64>, FetchError> {
            let mut scripts = self.scripts.lock().expect("stub lock");
            match scripts.get_mut(&query.query).and_then(|q| q.pop_front()) {
                Some(StubResponse::Price(value)) => Ok(Some(value)),
                Some(StubResponse::Miss) | None => Ok(None),
                Some(StubResponse::Status(status)) => Err(FetchError::Http {
                    origin: "google",
                    status,
                }),
            }
        }
    }

    fn validator(stub: StubSecondary) -> CrossValidator {
        let config = ValidatorConfig {
            initial_delay_ms: 10,
            max_delay_ms: 50,
            ..Default::default()
        };
        CrossValidator::new(Arc::new(stub), config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_candidate_within_tolerance() {
        let v = validator(StubSecondary::default().price("EURUSD", 1.0840));

        let result = v.check("EURUSD", 1.0850).await;
        assert!(result.ok);
        assert_eq!(result.resolution_path, "direct");
        assert_eq!(result.secondary_price, Some(1.0840));
        assert!(!result.inverse_used);
        let diff = result.diff_pct.unwrap();
        assert!((diff - 0.0922).abs() < 0.001, "diff was {diff}");
        assert!(result.alert.is_none());
        assert_eq!(v.pending_alert_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_divergence_fires_alert() {
        let v = validator(StubSecondary::default().price("EURUSD", 1.00));

        let result = v.check("EURUSD", 1.10).await;
        assert!(!result.ok);
        let diff = result.diff_pct.unwrap();
        assert!((diff - 10.0).abs() < 1e-9);
        assert!(result.alert.is_some());

        let alerts = v.take_alerts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("EURUSD"));
        // Draining empties the buffer.
        assert!(v.take_alerts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dashed_candidate_after_direct_miss() {
        let v = validator(
            StubSecondary::default()
                .script("EURUSD", vec![StubResponse::Miss])
                .price("EUR-USD", 1.0845),
        );

        let result = v.check("EURUSD", 1.0850).await;
        assert!(result.ok);
        assert_eq!(result.resolution_path, "dashed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_inverse_pair_derivation() {
        let v = validator(StubSecondary::default().price("JPYUSD", 0.0067));

        let result = v.check("USDJPY", 149.30).await;
        assert!(result.inverse_used);
        assert_eq!(result.resolution_path, "inverse");
        let secondary = result.secondary_price.unwrap();
        assert!((secondary - 149.2537).abs() < 0.001, "secondary {secondary}");
        assert!(result.ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_symbol_fails_fast() {
        let v = validator(StubSecondary::default());

        let result = v.check("EURUS", 1.0).await;
        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("unsupported symbol"));
        assert!(result.resolution_path.is_empty());
        // Stored for later inspection.
        assert!(v.last_check("EURUS").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_secondary_is_indeterminate() {
        let v = validator(StubSecondary::default().price("EURUSD", 0.0));

        let result = v.check("EURUSD", 1.0850).await;
        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("Invalid diff"));
        assert!(result.diff_pct.is_none());
        // Indeterminate outcomes are alert-ineligible.
        assert_eq!(v.pending_alert_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_table_uses_commodity_threshold() {
        let v = validator(StubSecondary::default().price("gold price per ounce in USD", 2360.0));

        let result = v.check("XAUUSD", 2400.0).await;
        assert_eq!(result.resolution_path, "override");
        assert_eq!(result.threshold_pct, 3.0);
        // ~1.69% diff would breach the 1% currency threshold but passes
        // the commodity one.
        assert!(result.ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_moves_to_next_candidate() {
        let v = validator(
            StubSecondary::default()
                .script("EURUSD", vec![StubResponse::Status(404)])
                .price("EUR-USD", 1.0845),
        );

        let result = v.check("EURUSD", 1.0850).await;
        assert!(result.ok);
        assert_eq!(result.resolution_path, "dashed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retried_within_candidate() {
        let v = validator(StubSecondary::default().script(
            "EURUSD",
            vec![StubResponse::Status(429), StubResponse::Price(1.0840)],
        ));

        let result = v.check("EURUSD", 1.0850).await;
        assert!(result.ok);
        assert_eq!(result.resolution_path, "direct");
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_resolves_records_error() {
        let v = validator(StubSecondary::default());

        let result = v.check("EURUSD", 1.0850).await;
        assert!(!result.ok);
        assert!(result.error.is_some());
        assert!(result.secondary_price.is_none());
        assert_eq!(v.pending_alert_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_check_and_reset() {
        let v = validator(StubSecondary::default().price("EURUSD", 1.00));

        v.check("EURUSD", 1.10).await;
        assert!(v.last_check("EURUSD").is_some());
        assert_eq!(v.pending_alert_count(), 1);

        v.reset();
        assert!(v.last_check("EURUSD").is_none());
        assert_eq!(v.pending_alert_count(), 0);
    }
}
