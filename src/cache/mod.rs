//! On-disk price cache
//!
//! Persists the last successfully resolved price so the pipeline can keep
//! serving a value when every live source is down. Caching is best-effort:
//! a write failure logs a warning and never aborts the calling fetch. Age
//! is reported here but enforced by the NAV gate, not this layer.
//!
//! One JSON record per cache instance; deployments wanting per-symbol
//! caching construct one cache per symbol path.

use crate::error::FetchError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The single stored record: decimal text plus provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedPrice {
    pub value: String,
    /// Unix milliseconds at save time.
    pub timestamp: i64,
    pub source: String,
}

impl CachedPrice {
    pub fn age_secs(&self, now_millis: i64) -> i64 {
        (now_millis - self.timestamp) / 1000
    }
}

/// A quote served through [`PriceCache::get_with_fallback`].
#[derive(Debug, Clone)]
pub struct ResolvedQuote {
    pub value: String,
    pub source: String,
    /// Unix milliseconds: save time for cached values, now for fresh ones.
    pub timestamp: i64,
    pub from_cache: bool,
}

pub struct PriceCache {
    path: PathBuf,
    fallback_enabled: bool,
}

impl PriceCache {
    pub fn new(path: impl Into<PathBuf>, fallback_enabled: bool) -> Self {
        Self {
            path: path.into(),
            fallback_enabled,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the stored record. Best-effort: failures are logged and
    /// swallowed so a cache problem never fails a successful fetch.
    pub fn save(&self, value: &str, source: &str) {
        let record = CachedPrice {
            value: value.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            source: source.to_string(),
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent) {
                    warn!(path = %self.path.display(), error = %e, "failed to create cache dir");
                    return;
                }
            }
        }
        let json = match serde_json::to_string_pretty(&record) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize cache record");
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, json) {
            warn!(path = %self.path.display(), error = %e, "failed to write price cache");
        }
    }

    /// Load the stored record. Missing file or a corrupt record both read
    /// as "no cache".
    pub fn load(&self) -> Option<CachedPrice> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt cache record ignored");
                None
            }
        }
    }

    /// Whether the stored record is younger than `max_age_secs`.
    pub fn is_valid(&self, max_age_secs: u64) -> bool {
        match self.load() {
            Some(record) => record.age_secs(Utc::now().timestamp_millis()) < max_age_secs as i64,
            None => false,
        }
    }

    /// Run `fetch`; on success save and return the fresh value, on failure
    /// serve the cached record regardless of its age (the age is logged,
    /// staleness enforcement belongs to the NAV gate). With no cache to
    /// fall back on, the failure becomes [`FetchError::NoFallbackAvailable`].
    pub async fn get_with_fallback<F, Fut>(&self, fetch: F) -> Result<ResolvedQuote, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, String), FetchError>>,
    {
        match fetch().await {
            Ok((value, source)) => {
                self.save(&value, &source);
                Ok(ResolvedQuote {
                    value,
                    source,
                    timestamp: Utc::now().timestamp_millis(),
                    from_cache: false,
                })
            }
            Err(e) => {
                if !self.fallback_enabled {
                    return Err(e);
                }
                match self.load() {
                    Some(record) => {
                        let age = record.age_secs(Utc::now().timestamp_millis());
                        debug!(error = %e, "live fetch failed, consulting cache");
                        warn!(
                            age_secs = age,
                            source = %record.source,
                            "serving cached price after live fetch failure"
                        );
                        Ok(ResolvedQuote {
                            value: record.value,
                            source: record.source,
                            timestamp: record.timestamp,
                            from_cache: true,
                        })
                    }
                    None => Err(FetchError::NoFallbackAvailable),
                }
            }
        }
    }
}
