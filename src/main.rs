//! NAV oracle daemon
//!
//! Wires the pipeline together from configuration and runs one check cycle
//! per configured symbol/basket pair on an interval until ctrl-c.

use anyhow::{Context, Result};
use nav_oracle::cache::PriceCache;
use nav_oracle::config::AppConfig;
use nav_oracle::nav::{GateConfig, NavGate};
use nav_oracle::pipeline::{CycleOutcome, Pipeline};
use nav_oracle::provider::sources::{BackupQuoteApi, LiveQuoteApi};
use nav_oracle::provider::{PriceProvider, ProviderEvent};
use nav_oracle::retry::RetryPolicy;
use nav_oracle::types::BasketId;
use nav_oracle::validator::{CrossValidator, GoogleFinanceSource, ValidatorConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!(config = %config.digest(), "starting nav-oracle");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.provider.timeout_ms))
        .build()
        .context("Failed to create HTTP client")?;

    let retry = RetryPolicy::new(
        config.provider.max_attempts,
        config.provider.initial_delay_ms,
        config.provider.max_delay_ms,
    );

    let validator = Arc::new(CrossValidator::new(
        Arc::new(GoogleFinanceSource::new(
            client.clone(),
            config.validator.base_url.clone(),
        )),
        ValidatorConfig {
            currency_threshold_pct: config.validator.currency_threshold_pct,
            commodity_threshold_pct: config.validator.commodity_threshold_pct,
            max_attempts: config.validator.max_attempts,
            initial_delay_ms: config.validator.initial_delay_ms,
            max_delay_ms: config.validator.max_delay_ms,
        },
    ));

    let (gate, manager_cap) = NavGate::new(GateConfig {
        default_staleness_secs: config.nav.staleness_secs,
        default_deviation_bps: config.nav.deviation_bps,
    });
    let gate = Arc::new(gate);

    // Configured baskets may carry their own thresholds; apply them with
    // the manager capability before the first cycle runs.
    for override_ in &config.nav.overrides {
        let basket = BasketId::from_hex(&override_.basket)
            .with_context(|| format!("invalid basket id {:?}", override_.basket))?;
        if let Some(secs) = override_.staleness_secs {
            gate.set_staleness_threshold(&manager_cap, basket, secs)?;
        }
        if let Some(bps) = override_.deviation_bps {
            gate.set_deviation_threshold(&manager_cap, basket, bps)?;
        }
        info!(
            basket = %basket,
            staleness_secs = ?override_.staleness_secs,
            deviation_bps = ?override_.deviation_bps,
            "applied basket threshold overrides"
        );
    }

    // One cache slot per symbol so degraded mode stays symbol-accurate.
    let mut pipelines: Vec<(String, BasketId, Pipeline)> = Vec::new();
    for (symbol, basket_hex) in config
        .pipeline
        .symbols
        .iter()
        .zip(config.pipeline.baskets.iter())
    {
        let basket = BasketId::from_hex(basket_hex)
            .with_context(|| format!("invalid basket id {basket_hex:?}"))?;

        let cache_path = Path::new(&config.cache.dir).join(format!("{}.json", symbol));
        let cache = PriceCache::new(&cache_path, config.cache.fallback_enabled);
        if config.cache.fallback_enabled && !cache.is_valid(config.cache.max_age_secs) {
            warn!(symbol = %symbol, "no recent cached price; degraded mode unavailable until first fetch");
        }

        let provider = Arc::new(PriceProvider::new(
            Arc::new(LiveQuoteApi::new(
                client.clone(),
                config.provider.primary_url.clone(),
            )),
            Arc::new(BackupQuoteApi::new(
                client.clone(),
                config.provider.secondary_url.clone(),
            )),
            cache,
            retry,
        ));

        spawn_event_logger(provider.subscribe());

        pipelines.push((
            symbol.clone(),
            basket,
            Pipeline::new(provider, validator.clone(), gate.clone()),
        ));
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(config.pipeline.interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for (symbol, basket, pipeline) in &pipelines {
                    match pipeline.run_cycle(symbol, *basket).await {
                        Ok(CycleOutcome::Accepted { nav, source, degraded, .. }) => {
                            info!(symbol = %symbol, nav, source = %source, degraded, "cycle complete");
                        }
                        Ok(CycleOutcome::Skipped { symbol }) => {
                            warn!(symbol = %symbol, "cycle skipped");
                        }
                        Err(e) => {
                            error!(symbol = %symbol, error = %e, "cycle failed");
                        }
                    }
                }
                for alert in validator.take_alerts() {
                    warn!(alert = %alert, "pending cross-check alert");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    Ok(())
}

/// Drain provider lifecycle events into the log.
fn spawn_event_logger(mut rx: tokio::sync::mpsc::UnboundedReceiver<ProviderEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ProviderEvent::Price {
                    symbol,
                    value,
                    source,
                } => {
                    info!(symbol = %symbol, value, source = %source, "price resolved");
                }
                ProviderEvent::Skip { symbol, reason } => {
                    warn!(symbol = %symbol, reason = %reason, "symbol skipped");
                }
                ProviderEvent::Error {
                    symbol,
                    source,
                    error,
                } => {
                    warn!(symbol = %symbol, source = %source, error = %error, "source error");
                }
                ProviderEvent::Fallback { symbol, from, to } => {
                    warn!(symbol = %symbol, from = %from, to = %to, "falling back");
                }
            }
        }
    });
}
