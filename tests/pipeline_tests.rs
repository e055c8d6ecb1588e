//! End-to-end cycle tests with stubbed network sources.

use async_trait::async_trait;
use nav_oracle::cache::PriceCache;
use nav_oracle::error::FetchError;
use nav_oracle::nav::{GateConfig, NavGate};
use nav_oracle::pipeline::{CycleOutcome, Pipeline, PipelineError};
use nav_oracle::provider::sources::{QuoteSource, RawQuote};
use nav_oracle::provider::PriceProvider;
use nav_oracle::retry::RetryPolicy;
use nav_oracle::types::{BasketId, SourceLabel, Symbol};
use nav_oracle::validator::{CrossValidator, SecondaryQuery, SecondaryQuoteSource, ValidatorConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Live source stub whose price can be changed or broken between cycles.
struct StubLive {
    name: &'static str,
    label: SourceLabel,
    price: Mutex<Result<String, u16>>,
}

impl StubLive {
    fn serving(name: &'static str, label: SourceLabel, price: &str) -> Arc<Self> {
        Arc::new(Self {
            name,
            label,
            price: Mutex::new(Ok(price.to_string())),
        })
    }

    fn failing(name: &'static str, label: SourceLabel, status: u16) -> Arc<Self> {
        Arc::new(Self {
            name,
            label,
            price: Mutex::new(Err(status)),
        })
    }

    fn set_price(&self, price: &str) {
        *self.price.lock().unwrap() = Ok(price.to_string());
    }
}

#[async_trait]
impl QuoteSource for StubLive {
    fn name(&self) -> &'static str {
        self.name
    }

    fn label(&self) -> SourceLabel {
        self.label
    }

    async fn fetch(&self, _symbol: Symbol) -> Result<RawQuote, FetchError> {
        match &*self.price.lock().unwrap() {
            Ok(text) => Ok(RawQuote {
                price_text: text.clone(),
                timestamp: 1_700_000_000,
            }),
            Err(status) => Err(FetchError::Http {
                origin: self.name,
                status: *status,
            }),
        }
    }
}

/// Secondary-source stub keyed by candidate query.
struct StubSecondary {
    quotes: Mutex<HashMap<String, f64>>,
}

impl StubSecondary {
    fn new(entries: &[(&str, f64)]) -> Arc<Self> {
        Arc::new(Self {
            quotes: Mutex::new(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect(),
            ),
        })
    }

    fn set_quote(&self, candidate: &str, value: f64) {
        self.quotes
            .lock()
            .unwrap()
            .insert(candidate.to_string(), value);
    }
}

#[async_trait]
impl SecondaryQuoteSource for StubSecondary {
    async fn resolve(&self, query: &SecondaryQuery) -> Result<Option<f64>, FetchError> {
        Ok(self.quotes.lock().unwrap().get(&query.query).copied())
    }
}

struct Harness {
    _dir: TempDir,
    primary: Arc<StubLive>,
    secondary_check: Arc<StubSecondary>,
    pipeline: Pipeline,
}

fn harness(primary: Arc<StubLive>, backup: Arc<StubLive>) -> Harness {
    let dir = TempDir::new().unwrap();
    let cache = PriceCache::new(dir.path().join("EURUSD.json"), true);
    let provider = Arc::new(PriceProvider::new(
        primary.clone(),
        backup,
        cache,
        RetryPolicy::new(2, 10, 100),
    ));

    let secondary_check = StubSecondary::new(&[]);
    let validator = Arc::new(CrossValidator::new(
        secondary_check.clone(),
        ValidatorConfig {
            initial_delay_ms: 10,
            max_delay_ms: 50,
            ..Default::default()
        },
    ));

    let (gate, _cap) = NavGate::new(GateConfig {
        default_staleness_secs: 3600,
        default_deviation_bps: 500,
    });

    Harness {
        _dir: dir,
        primary,
        secondary_check,
        pipeline: Pipeline::new(provider, validator, Arc::new(gate)),
    }
}

fn basket(tag: u8) -> BasketId {
    BasketId::new([tag; 32])
}

#[tokio::test(start_paused = true)]
async fn full_cycle_accepts_cross_validated_price() {
    let h = harness(
        StubLive::serving("primary", SourceLabel::Primary, "1.0850"),
        StubLive::serving("secondary", SourceLabel::Secondary, "1.0848"),
    );
    h.secondary_check.set_quote("EURUSD", 1.0840);

    let outcome = h.pipeline.run_cycle("EURUSD", basket(1)).await.unwrap();
    match outcome {
        CycleOutcome::Accepted {
            nav,
            source,
            cross_ok,
            degraded,
            ..
        } => {
            assert_eq!(nav, 1_085_000_000_000_000_000);
            assert_eq!(source, SourceLabel::Primary);
            assert_eq!(cross_ok, Some(true));
            assert!(!degraded);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let obs = h.pipeline.gate().observation(basket(1)).unwrap();
    assert_eq!(obs.nav, 1_085_000_000_000_000_000);
}

#[tokio::test(start_paused = true)]
async fn cross_check_divergence_alerts_but_does_not_block() {
    let h = harness(
        StubLive::serving("primary", SourceLabel::Primary, "1.10"),
        StubLive::serving("secondary", SourceLabel::Secondary, "1.10"),
    );
    h.secondary_check.set_quote("EURUSD", 1.00);

    let outcome = h.pipeline.run_cycle("EURUSD", basket(1)).await.unwrap();
    match outcome {
        CycleOutcome::Accepted { cross_ok, .. } => assert_eq!(cross_ok, Some(false)),
        other => panic!("unexpected outcome {other:?}"),
    }

    // The disagreement was recorded for out-of-band monitoring.
    let alerts = h.pipeline.validator().take_alerts();
    assert_eq!(alerts.len(), 1);
    // ... and the observation was still accepted.
    assert!(h.pipeline.gate().observation(basket(1)).is_some());
}

#[tokio::test(start_paused = true)]
async fn unavailable_cross_check_is_recoverable() {
    let h = harness(
        StubLive::serving("primary", SourceLabel::Primary, "1.0850"),
        StubLive::serving("secondary", SourceLabel::Secondary, "1.0848"),
    );
    // No secondary quotes at all: cross-check resolves nothing.

    let outcome = h.pipeline.run_cycle("EURUSD", basket(1)).await.unwrap();
    match outcome {
        CycleOutcome::Accepted { cross_ok, .. } => assert_eq!(cross_ok, None),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(h.pipeline.validator().take_alerts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn gate_rejects_excessive_move_between_cycles() {
    let h = harness(
        StubLive::serving("primary", SourceLabel::Primary, "1.0850"),
        StubLive::serving("secondary", SourceLabel::Secondary, "1.0848"),
    );
    h.secondary_check.set_quote("EURUSD", 1.0850);

    h.pipeline.run_cycle("EURUSD", basket(1)).await.unwrap();

    // A 2x jump breaches the 500 bps default threshold.
    h.primary.set_price("2.1700");
    h.secondary_check.set_quote("EURUSD", 2.1700);
    let err = h.pipeline.run_cycle("EURUSD", basket(1)).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Nav(nav_oracle::error::NavError::DeviationTooHigh { .. })
    ));

    // The rejected cycle left the previous observation untouched.
    let obs = h.pipeline.gate().observation(basket(1)).unwrap();
    assert_eq!(obs.nav, 1_085_000_000_000_000_000);
}

#[tokio::test(start_paused = true)]
async fn backup_source_takes_over_when_primary_dies() {
    let h = harness(
        StubLive::serving("primary", SourceLabel::Primary, "1.0850"),
        StubLive::serving("secondary", SourceLabel::Secondary, "1.0848"),
    );
    h.secondary_check.set_quote("EURUSD", 1.0850);

    h.pipeline.run_cycle("EURUSD", basket(1)).await.unwrap();

    *h.primary.price.lock().unwrap() = Err(503);
    let outcome = h.pipeline.run_cycle("EURUSD", basket(1)).await.unwrap();
    match outcome {
        CycleOutcome::Accepted {
            nav,
            source,
            degraded,
            ..
        } => {
            assert_eq!(nav, 1_084_800_000_000_000_000);
            assert_eq!(source, SourceLabel::Secondary);
            assert!(!degraded);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn degraded_cycle_with_all_sources_down() {
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("EURUSD.json");

    // Seed the cache through a healthy run.
    PriceCache::new(&cache_path, true).save("1.0850", "primary");

    let provider = Arc::new(PriceProvider::new(
        StubLive::failing("primary", SourceLabel::Primary, 503),
        StubLive::failing("secondary", SourceLabel::Secondary, 503),
        PriceCache::new(&cache_path, true),
        RetryPolicy::new(2, 10, 100),
    ));
    let validator = Arc::new(CrossValidator::new(
        StubSecondary::new(&[("EURUSD", 1.0840)]),
        ValidatorConfig {
            initial_delay_ms: 10,
            max_delay_ms: 50,
            ..Default::default()
        },
    ));
    let (gate, _cap) = NavGate::new(GateConfig::default());
    let pipeline = Pipeline::new(provider, validator, Arc::new(gate));

    let outcome = pipeline.run_cycle("EURUSD", basket(1)).await.unwrap();
    match outcome {
        CycleOutcome::Accepted {
            source,
            degraded,
            nav,
            ..
        } => {
            assert_eq!(source, SourceLabel::Cache);
            assert!(degraded);
            assert_eq!(nav, 1_085_000_000_000_000_000);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn baskets_stay_isolated_across_shared_gate() {
    let dir = TempDir::new().unwrap();
    let (gate, cap) = NavGate::new(GateConfig {
        default_staleness_secs: 3600,
        default_deviation_bps: 500,
    });
    let gate = Arc::new(gate);
    let validator = Arc::new(CrossValidator::new(
        StubSecondary::new(&[]),
        ValidatorConfig::default(),
    ));

    let mk = |symbol: &str, price: &str| {
        Pipeline::new(
            Arc::new(PriceProvider::new(
                StubLive::serving("primary", SourceLabel::Primary, price),
                StubLive::serving("secondary", SourceLabel::Secondary, price),
                PriceCache::new(dir.path().join(format!("{symbol}.json")), true),
                RetryPolicy::new(2, 10, 100),
            )),
            validator.clone(),
            gate.clone(),
        )
    };

    let eur = mk("EURUSD", "1.0850");
    let jpy = mk("USDJPY", "149.25");

    eur.run_cycle("EURUSD", basket(1)).await.unwrap();
    jpy.run_cycle("USDJPY", basket(2)).await.unwrap();
    let jpy_before = gate.observation(basket(2)).unwrap();

    // Update basket 1 repeatedly and tighten its thresholds.
    gate.set_deviation_threshold(&cap, basket(1), 10_000).unwrap();
    gate.set_staleness_threshold(&cap, basket(1), 1).unwrap();
    eur.run_cycle("EURUSD", basket(1)).await.unwrap();

    assert_eq!(gate.observation(basket(2)).unwrap(), jpy_before);
    assert_eq!(jpy_before.nav, 149_250_000_000_000_000_000);
}

#[tokio::test(start_paused = true)]
async fn unsupported_symbol_skips_whole_cycle() {
    let h = harness(
        StubLive::serving("primary", SourceLabel::Primary, "1.0850"),
        StubLive::serving("secondary", SourceLabel::Secondary, "1.0848"),
    );

    let outcome = h.pipeline.run_cycle("eurusd!", basket(1)).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Skipped { .. }));
    assert!(h.pipeline.gate().observation(basket(1)).is_none());
}
