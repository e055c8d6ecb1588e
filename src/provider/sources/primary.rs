//! Primary live quote source
//!
//! Plain REST endpoint returning a textual price per symbol, e.g.
//! `GET {base}/v1/quote?symbol=EURUSD` -> `{"symbol":"EURUSD","price":"1.0850"}`.

use super::{QuoteSource, RawQuote};
use crate::error::FetchError;
use crate::types::{SourceLabel, Symbol};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    symbol: String,
    price: String,
    #[serde(default)]
    ts: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct LiveQuoteApi {
    client: reqwest::Client,
    base_url: String,
}

impl LiveQuoteApi {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl QuoteSource for LiveQuoteApi {
    fn name(&self) -> &'static str {
        "primary"
    }

    fn label(&self) -> SourceLabel {
        SourceLabel::Primary
    }

    async fn fetch(&self, symbol: Symbol) -> Result<RawQuote, FetchError> {
        let url = format!("{}/v1/quote?symbol={}", self.base_url, symbol);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                origin: self.name(),
                status: status.as_u16(),
            });
        }

        let payload: QuoteResponse = response
            .json()
            .await
            .map_err(|e| FetchError::InvalidPrice(format!("primary payload: {e}")))?;

        if payload.symbol != symbol.as_str() {
            return Err(FetchError::InvalidPrice(format!(
                "primary returned {} for requested {}",
                payload.symbol, symbol
            )));
        }

        Ok(RawQuote {
            price_text: payload.price,
            timestamp: payload.ts.unwrap_or_else(|| Utc::now().timestamp()),
        })
    }
}
