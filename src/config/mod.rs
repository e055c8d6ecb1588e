//! Configuration management for the NAV oracle
//!
//! Loads from config files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub cache: CacheConfig,
    pub validator: ValidatorCfg,
    pub nav: NavConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Primary live quote endpoint
    pub primary_url: String,
    /// Secondary live quote endpoint
    pub secondary_url: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// Maximum fetch attempts per source
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub initial_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Directory holding per-symbol cache files
    pub dir: String,
    /// Serve cached prices when every live source fails
    pub fallback_enabled: bool,
    /// Age in seconds below which a cached price counts as valid
    pub max_age_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorCfg {
    /// Scraped secondary source endpoint
    pub base_url: String,
    /// Tolerated diff for currency pairs, percent
    pub currency_threshold_pct: f64,
    /// Tolerated diff for commodity crosses, percent
    pub commodity_threshold_pct: f64,
    /// Attempts per candidate (retry on 429/503 only)
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NavConfig {
    /// Default staleness threshold applied to new baskets, seconds
    pub staleness_secs: u64,
    /// Default deviation threshold applied to new baskets, bps
    pub deviation_bps: u64,
    /// Per-basket threshold overrides applied at startup
    #[serde(default)]
    pub overrides: Vec<NavOverride>,
}

/// Thresholds for one basket, overriding the defaults above.
#[derive(Debug, Clone, Deserialize)]
pub struct NavOverride {
    /// Hex basket id
    pub basket: String,
    #[serde(default)]
    pub staleness_secs: Option<u64>,
    #[serde(default)]
    pub deviation_bps: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Symbols to check, e.g. ["EURUSD", "USDJPY"]
    pub symbols: Vec<String>,
    /// Hex basket ids, positionally paired with `symbols`
    pub baskets: Vec<String>,
    /// Seconds between check cycles
    pub interval_secs: u64,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Provider defaults
            .set_default("provider.primary_url", "https://quotes.example.com")?
            .set_default("provider.secondary_url", "https://rates.example.com")?
            .set_default("provider.timeout_ms", 10_000)?
            .set_default("provider.max_attempts", 3)?
            .set_default("provider.initial_delay_ms", 500)?
            .set_default("provider.max_delay_ms", 10_000)?
            // Cache defaults
            .set_default("cache.dir", "./data/cache")?
            .set_default("cache.fallback_enabled", true)?
            .set_default("cache.max_age_secs", 3600)?
            // Validator defaults
            .set_default("validator.base_url", "https://www.google.com/search")?
            .set_default("validator.currency_threshold_pct", 1.0)?
            .set_default("validator.commodity_threshold_pct", 3.0)?
            .set_default("validator.max_attempts", 2)?
            .set_default("validator.initial_delay_ms", 500)?
            .set_default("validator.max_delay_ms", 5_000)?
            // NAV gate defaults
            .set_default("nav.staleness_secs", 86_400)?
            .set_default("nav.deviation_bps", 500)?
            // Pipeline defaults
            .set_default("pipeline.symbols", vec!["EURUSD"])?
            .set_default(
                "pipeline.baskets",
                vec!["0x0000000000000000000000000000000000000000000000000000000000000001"],
            )?
            .set_default("pipeline.interval_secs", 60)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (NAVORACLE_*)
            .add_source(Environment::with_prefix("NAVORACLE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Structural checks that deserialization cannot express
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.symbols.len() != self.pipeline.baskets.len() {
            bail!(
                "pipeline.symbols ({}) and pipeline.baskets ({}) must pair up",
                self.pipeline.symbols.len(),
                self.pipeline.baskets.len()
            );
        }
        if self.nav.deviation_bps > 10_000 {
            bail!(
                "nav.deviation_bps {} exceeds the 10000 bps ceiling",
                self.nav.deviation_bps
            );
        }
        for raw in &self.pipeline.baskets {
            crate::types::BasketId::from_hex(raw)
                .with_context(|| format!("invalid basket id {raw:?}"))?;
        }
        for symbol in &self.pipeline.symbols {
            if crate::types::Symbol::parse(symbol).is_none() {
                bail!("unsupported symbol {symbol:?}: expected six uppercase letters");
            }
        }
        for override_ in &self.nav.overrides {
            crate::types::BasketId::from_hex(&override_.basket)
                .with_context(|| format!("invalid basket id {:?} in nav.overrides", override_.basket))?;
            if let Some(bps) = override_.deviation_bps {
                if bps > 10_000 {
                    bail!(
                        "nav.overrides deviation_bps {} for basket {} exceeds the 10000 bps ceiling",
                        bps,
                        override_.basket
                    );
                }
            }
        }
        Ok(())
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "symbols={:?} interval={}s deviation={}bps staleness={}s fallback={}",
            self.pipeline.symbols,
            self.pipeline.interval_secs,
            self.nav.deviation_bps,
            self.nav.staleness_secs,
            self.cache.fallback_enabled,
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
