//! Secondary live quote source
//!
//! Independent REST endpoint with a different payload shape, consulted when
//! the primary source fails or is explicitly bypassed:
//! `GET {base}/api/rates/EUR-USD` -> `{"ticker":"EUR-USD","last":"1.0848","updated_at":...}`.

use super::{QuoteSource, RawQuote};
use crate::error::FetchError;
use crate::types::{SourceLabel, Symbol};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RateResponse {
    ticker: String,
    last: String,
    #[serde(default)]
    updated_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct BackupQuoteApi {
    client: reqwest::Client,
    base_url: String,
}

impl BackupQuoteApi {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl QuoteSource for BackupQuoteApi {
    fn name(&self) -> &'static str {
        "secondary"
    }

    fn label(&self) -> SourceLabel {
        SourceLabel::Secondary
    }

    async fn fetch(&self, symbol: Symbol) -> Result<RawQuote, FetchError> {
        let url = format!("{}/api/rates/{}", self.base_url, symbol.dashed());
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                origin: self.name(),
                status: status.as_u16(),
            });
        }

        let payload: RateResponse = response
            .json()
            .await
            .map_err(|e| FetchError::InvalidPrice(format!("secondary payload: {e}")))?;

        if payload.ticker != symbol.dashed() {
            return Err(FetchError::InvalidPrice(format!(
                "secondary returned {} for requested {}",
                payload.ticker, symbol
            )));
        }

        Ok(RawQuote {
            price_text: payload.last,
            timestamp: payload.updated_at.unwrap_or_else(|| Utc::now().timestamp()),
        })
    }
}
