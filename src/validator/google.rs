//! Scraped secondary quote source
//!
//! Resolves candidate encodings against a Google-style search endpoint and
//! extracts the quoted rate from the returned markup with a regex. This
//! coupling is brittle by nature, which is why it sits behind the
//! [`SecondaryQuoteSource`] seam: swapping the extraction strategy must not
//! touch retry or threshold logic.

use super::{SecondaryQuery, SecondaryQuoteSource};
use crate::error::FetchError;
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0 Safari/537.36";
const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

pub struct GoogleFinanceSource {
    client: reqwest::Client,
    base_url: String,
    default_pattern: Regex,
}

impl GoogleFinanceSource {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            // Exchange-rate widget attribute present for known pairs.
            default_pattern: Regex::new(r#"data-exchange-rate="([0-9][0-9,]*\.?[0-9]*)""#)
                .expect("static pattern compiles"),
        }
    }

    fn extract(&self, markup: &str, pattern: Option<&Regex>) -> Option<f64> {
        let pattern = pattern.unwrap_or(&self.default_pattern);
        let captures = pattern.captures(markup)?;
        let raw = captures.get(1)?.as_str().replace(',', "");
        raw.parse::<f64>().ok()
    }
}

#[async_trait]
impl SecondaryQuoteSource for GoogleFinanceSource {
    async fn resolve(&self, query: &SecondaryQuery) -> Result<Option<f64>, FetchError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("q", query.query.as_str()), ("hl", "en"), ("gl", "us")])
            .header("User-Agent", USER_AGENT)
            .header("Accept", ACCEPT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                origin: "google",
                status: status.as_u16(),
            });
        }

        let markup = response.text().await?;
        let price = self.extract(&markup, query.pattern.as_ref());
        if price.is_none() {
            debug!(candidate = %query.query, "no rate found in markup");
        }
        Ok(price)
    }
}
