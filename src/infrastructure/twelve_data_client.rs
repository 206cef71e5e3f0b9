//! Twelve Data API Client
//!
//! Quote provider backed by the Twelve Data REST API. Three endpoints are
//! used: `/price` for the latest price, `/quote` for the display name, and
//! `/symbol_search` for the instrument type description.
//!
//! Twelve Data reports failures two ways: HTTP status codes, and 200
//! responses carrying an error payload (`{"code": ..., "status": "error"}`).
//! Both map onto [`ProviderError`]. Outbound calls are gated by a local
//! request budget so a burst of cache misses cannot blow through the API
//! plan's per-minute quota; an exhausted budget reads as a provider failure
//! and the caches degrade as usual.

use crate::domain::repositories::quote_provider::{ProviderError, ProviderResult, QuoteProvider};
use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, warn};

const TWELVE_DATA_BASE: &str = "https://api.twelvedata.com";

/// Twelve Data connection settings
#[derive(Debug, Clone)]
pub struct TwelveDataConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    /// Outbound request budget per minute, matched to the API plan
    pub requests_per_minute: u32,
}

impl TwelveDataConfig {
    pub fn new(api_key: String, timeout: Duration, requests_per_minute: u32) -> Self {
        Self {
            base_url: TWELVE_DATA_BASE.to_string(),
            api_key,
            timeout,
            requests_per_minute,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: Option<String>,
    code: Option<i64>,
    message: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    name: Option<String>,
    code: Option<i64>,
    message: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SymbolSearchResponse {
    data: Option<Vec<SymbolMatch>>,
    code: Option<i64>,
    message: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SymbolMatch {
    instrument_type: Option<String>,
}

/// Error-payload detection shared by all three endpoints
fn payload_error(code: Option<i64>, message: Option<String>) -> ProviderError {
    if code == Some(429) {
        return ProviderError::RateLimited;
    }
    ProviderError::ErrorPayload(message.unwrap_or_else(|| "unspecified provider error".to_string()))
}

fn is_error_payload(status: &Option<String>) -> bool {
    status.as_deref() == Some("error")
}

/// Quote provider over the Twelve Data REST API
pub struct TwelveDataClient {
    client: Client,
    config: TwelveDataConfig,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl TwelveDataClient {
    pub fn new(config: TwelveDataConfig) -> Self {
        let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            client: Client::new(),
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            config,
        }
    }

    /// GET one endpoint for one ticker, spending a unit of request budget.
    ///
    /// The URL carries the API key, so it is never logged.
    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str, ticker: &str) -> ProviderResult<T> {
        if self.limiter.check().is_err() {
            warn!("Request budget exhausted, skipping {} call for {}", endpoint, ticker);
            return Err(ProviderError::RateLimited);
        }

        let url = format!(
            "{}/{}?symbol={}&apikey={}",
            self.config.base_url, endpoint, ticker, self.config.api_key
        );
        debug!("GET /{} for {}", endpoint, ticker);

        let response = self
            .client
            .get(&url)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl QuoteProvider for TwelveDataClient {
    fn name(&self) -> &str {
        "twelvedata"
    }

    async fn fetch_price(&self, ticker: &str) -> ProviderResult<f64> {
        let body: PriceResponse = self.get_json("price", ticker).await?;
        if is_error_payload(&body.status) {
            return Err(payload_error(body.code, body.message));
        }

        let raw = body
            .price
            .ok_or_else(|| ProviderError::Malformed("price field missing".to_string()))?;
        raw.parse::<f64>()
            .map_err(|e| ProviderError::Malformed(format!("unparseable price {:?}: {}", raw, e)))
    }

    async fn fetch_quote_name(&self, ticker: &str) -> ProviderResult<Option<String>> {
        let body: QuoteResponse = self.get_json("quote", ticker).await?;
        if is_error_payload(&body.status) {
            return Err(payload_error(body.code, body.message));
        }

        Ok(body.name.filter(|n| !n.trim().is_empty()))
    }

    async fn fetch_instrument_description(&self, ticker: &str) -> ProviderResult<Option<String>> {
        let body: SymbolSearchResponse = self.get_json("symbol_search", ticker).await?;
        if is_error_payload(&body.status) {
            return Err(payload_error(body.code, body.message));
        }

        // the best match is first; only its type description matters
        Ok(body
            .data
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|m| m.instrument_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_response_parses() {
        let body: PriceResponse = serde_json::from_str(r#"{"price":"150.25"}"#).unwrap();
        assert_eq!(body.price.as_deref(), Some("150.25"));
        assert!(!is_error_payload(&body.status));
    }

    #[test]
    fn test_error_payload_detected() {
        let body: PriceResponse = serde_json::from_str(
            r#"{"code":404,"message":"symbol not found","status":"error"}"#,
        )
        .unwrap();
        assert!(is_error_payload(&body.status));

        let err = payload_error(body.code, body.message);
        assert!(matches!(err, ProviderError::ErrorPayload(ref m) if m.contains("symbol not found")));
    }

    #[test]
    fn test_quota_payload_maps_to_rate_limited() {
        let err = payload_error(Some(429), Some("API credits exhausted".to_string()));
        assert!(matches!(err, ProviderError::RateLimited));
    }

    #[test]
    fn test_symbol_search_takes_first_match() {
        let body: SymbolSearchResponse = serde_json::from_str(
            r#"{"data":[{"instrument_type":"Common Stock"},{"instrument_type":"ETF"}]}"#,
        )
        .unwrap();
        let description = body
            .data
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|m| m.instrument_type);
        assert_eq!(description.as_deref(), Some("Common Stock"));
    }

    #[test]
    fn test_symbol_search_empty_data() {
        let body: SymbolSearchResponse = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert!(body.data.unwrap_or_default().is_empty());
    }

    #[test]
    fn test_budget_blocks_after_quota() {
        let config = TwelveDataConfig::new("demo".to_string(), Duration::from_secs(5), 2);
        let client = TwelveDataClient::new(config);

        assert!(client.limiter.check().is_ok());
        assert!(client.limiter.check().is_ok());
        assert!(client.limiter.check().is_err());
    }
}
