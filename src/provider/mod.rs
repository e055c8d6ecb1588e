//! Primary price provider
//!
//! Resolves a symbol against named sources in priority order (live primary,
//! live secondary, on-disk cache as last resort). The first source to yield
//! a finite, positive value wins. Per-symbol fetch overrides support
//! degraded-mode drills; lifecycle events fan out to subscribers without
//! ever blocking resolution.

pub mod sources;

use crate::cache::PriceCache;
use crate::codec;
use crate::error::FetchError;
use crate::retry::RetryPolicy;
use crate::types::{FetchPriceResult, PriceSample, SourceLabel, Symbol};
use sources::QuoteSource;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

/// Per-symbol operator hook consulted before any network call.
/// Set and cleared explicitly; never persisted across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOverride {
    /// Skip the primary source entirely.
    pub force_secondary: bool,
    /// Serve the cached record without touching the network.
    pub use_last_known: bool,
}

/// Lifecycle events emitted during resolution.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// A price was successfully resolved.
    Price {
        symbol: Symbol,
        value: f64,
        source: SourceLabel,
    },
    /// The symbol was unsupported or explicitly bypassed.
    Skip { symbol: String, reason: String },
    /// A source failed; resolution may continue with the next one.
    Error {
        symbol: Symbol,
        source: SourceLabel,
        error: String,
    },
    /// Resolution moved to the next-priority source.
    Fallback {
        symbol: Symbol,
        from: SourceLabel,
        to: SourceLabel,
    },
}

pub struct PriceProvider {
    live_sources: Vec<Arc<dyn QuoteSource>>,
    cache: PriceCache,
    retry: RetryPolicy,
    overrides: RwLock<HashMap<Symbol, FetchOverride>>,
    subscribers: RwLock<Vec<UnboundedSender<ProviderEvent>>>,
}

impl PriceProvider {
    pub fn new(
        primary: Arc<dyn QuoteSource>,
        secondary: Arc<dyn QuoteSource>,
        cache: PriceCache,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            live_sources: vec![primary, secondary],
            cache,
            retry,
            overrides: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to lifecycle events. Senders to dropped receivers are
    /// ignored on emit, so subscribers may come and go freely.
    pub fn subscribe(&self) -> UnboundedReceiver<ProviderEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subs) = self.subscribers.write() {
            subs.push(tx);
        }
        rx
    }

    fn emit(&self, event: ProviderEvent) {
        if let Ok(subs) = self.subscribers.read() {
            for tx in subs.iter() {
                let _ = tx.send(event.clone());
            }
        }
    }

    pub fn set_fetch_override(&self, symbol: Symbol, value: FetchOverride) {
        if let Ok(mut overrides) = self.overrides.write() {
            overrides.insert(symbol, value);
        }
    }

    pub fn clear_fetch_override(&self, symbol: Symbol) {
        if let Ok(mut overrides) = self.overrides.write() {
            overrides.remove(&symbol);
        }
    }

    pub fn clear_all_fetch_overrides(&self) {
        if let Ok(mut overrides) = self.overrides.write() {
            overrides.clear();
        }
    }

    pub fn fetch_override(&self, symbol: Symbol) -> Option<FetchOverride> {
        self.overrides.read().ok()?.get(&symbol).copied()
    }

    /// Resolve a price for `symbol_key`.
    ///
    /// Returns `Ok(None)` for unsupported symbols (a `Skip` event is
    /// emitted); `Err` when every source in the priority chain failed.
    pub async fn fetch(&self, symbol_key: &str) -> Result<Option<FetchPriceResult>, FetchError> {
        let Some(symbol) = Symbol::parse(symbol_key) else {
            self.emit(ProviderEvent::Skip {
                symbol: symbol_key.to_string(),
                reason: "unsupported symbol".to_string(),
            });
            return Ok(None);
        };

        let override_ = self.fetch_override(symbol).unwrap_or_default();

        if override_.use_last_known {
            let record = self.cache.load().ok_or(FetchError::NoFallbackAvailable)?;
            let result = self.finish(symbol, &record.value, &record.source, record.timestamp, true)?;
            info!(symbol = %symbol, "serving last known price by override");
            return Ok(Some(result));
        }

        let live: Vec<Arc<dyn QuoteSource>> = if override_.force_secondary {
            self.live_sources
                .iter()
                .filter(|s| s.label() == SourceLabel::Secondary)
                .cloned()
                .collect()
        } else {
            self.live_sources.clone()
        };
        let last_live_label = live.last().map(|s| s.label());

        let quote = self
            .cache
            .get_with_fallback(|| self.resolve_live(symbol, live))
            .await?;

        if quote.from_cache {
            if let Some(from) = last_live_label {
                self.emit(ProviderEvent::Fallback {
                    symbol,
                    from,
                    to: SourceLabel::Cache,
                });
            }
        }

        let result = self.finish(
            symbol,
            &quote.value,
            &quote.source,
            quote.timestamp,
            quote.from_cache,
        )?;
        Ok(Some(result))
    }

    /// Walk the live sources in priority order, retrying transient
    /// failures per source. Returns the winning textual price and label.
    async fn resolve_live(
        &self,
        symbol: Symbol,
        sources: Vec<Arc<dyn QuoteSource>>,
    ) -> Result<(String, String), FetchError> {
        let mut last_err: Option<FetchError> = None;

        for (idx, source) in sources.iter().enumerate() {
            if idx > 0 {
                self.emit(ProviderEvent::Fallback {
                    symbol,
                    from: sources[idx - 1].label(),
                    to: source.label(),
                });
            }

            match self.retry.execute(|| source.fetch(symbol)).await {
                Ok(raw) => match codec::parse_price(&raw.price_text, None) {
                    Ok((amount, _)) if amount > 0 => {
                        return Ok((raw.price_text, source.label().name().to_string()));
                    }
                    Ok(_) => {
                        let err = FetchError::InvalidPrice(format!(
                            "{} returned non-positive price {:?}",
                            source.name(),
                            raw.price_text
                        ));
                        warn!(symbol = %symbol, source = source.name(), error = %err, "source rejected");
                        self.emit(ProviderEvent::Error {
                            symbol,
                            source: source.label(),
                            error: err.to_string(),
                        });
                        last_err = Some(err);
                    }
                    Err(e) => {
                        let err = FetchError::from(e);
                        warn!(symbol = %symbol, source = source.name(), error = %err, "unparsable quote");
                        self.emit(ProviderEvent::Error {
                            symbol,
                            source: source.label(),
                            error: err.to_string(),
                        });
                        last_err = Some(err);
                    }
                },
                Err(e) => {
                    warn!(symbol = %symbol, source = source.name(), error = %e, "source failed");
                    self.emit(ProviderEvent::Error {
                        symbol,
                        source: source.label(),
                        error: e.to_string(),
                    });
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(FetchError::NoFallbackAvailable))
    }

    /// Parse a winning textual price into the final result and emit the
    /// `Price` event.
    fn finish(
        &self,
        symbol: Symbol,
        value_text: &str,
        source_name: &str,
        timestamp_millis: i64,
        from_cache: bool,
    ) -> Result<FetchPriceResult, FetchError> {
        let (amount, decimals) = codec::parse_price(value_text, None)?;
        if amount == 0 {
            return Err(FetchError::InvalidPrice(format!(
                "non-positive price {value_text:?}"
            )));
        }

        let label = if from_cache {
            SourceLabel::Cache
        } else {
            SourceLabel::parse(source_name).unwrap_or(SourceLabel::Primary)
        };

        let sample = PriceSample {
            symbol,
            amount,
            decimals,
            timestamp: timestamp_millis / 1000,
            degraded: from_cache,
        };

        self.emit(ProviderEvent::Price {
            symbol,
            value: sample.value_f64(),
            source: label,
        });

        Ok(FetchPriceResult {
            sample,
            source: label,
            stale: from_cache,
        })
    }
}
