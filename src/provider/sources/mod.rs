//! Quote source implementations for the primary price provider

mod primary;
mod secondary;

pub use primary::LiveQuoteApi;
pub use secondary::BackupQuoteApi;

use crate::error::FetchError;
use crate::types::{SourceLabel, Symbol};
use async_trait::async_trait;

/// A quote as delivered by an upstream source: the textual price exactly as
/// received (so the cache can persist it losslessly) plus the quote time.
#[derive(Debug, Clone)]
pub struct RawQuote {
    pub price_text: String,
    /// Unix seconds reported by the source, or fetch time if not reported.
    pub timestamp: i64,
}

/// Trait for live quote sources consulted in priority order.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Stable name used in logs and events.
    fn name(&self) -> &'static str;

    /// Priority label this source resolves under.
    fn label(&self) -> SourceLabel;

    /// Fetch the current quote for a symbol.
    async fn fetch(&self, symbol: Symbol) -> Result<RawQuote, FetchError>;
}
