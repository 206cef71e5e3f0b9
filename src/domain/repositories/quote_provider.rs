//! Quote Provider Trait
//!
//! This module defines the `QuoteProvider` trait, the common interface to the
//! external market data source. The resolver depends only on this trait, so
//! tests can substitute a mock provider and count outbound calls.

use async_trait::async_trait;
use thiserror::Error;

/// Common result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur while talking to the quote provider.
///
/// The resolver treats every variant the same way (a failed fetch subject to
/// the stale-fallback policy); the variants exist so logs say what happened.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected HTTP status: {0}")]
    Status(u16),

    #[error("Provider rejected the request: {0}")]
    ErrorPayload(String),

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Provider request quota exhausted")]
    RateLimited,
}

/// Quote provider trait giving the resolver its view of the market
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Name of this provider, used in logs
    fn name(&self) -> &str;

    /// Fetch the current unit price for a ticker.
    ///
    /// Implementations must return a positive price; anything else is a
    /// `ProviderError`.
    async fn fetch_price(&self, ticker: &str) -> ProviderResult<f64>;

    /// Fetch the display name for a ticker, `None` when the provider has no
    /// name on record.
    async fn fetch_quote_name(&self, ticker: &str) -> ProviderResult<Option<String>>;

    /// Fetch the provider's free-text instrument description for a ticker
    /// (e.g. "Common Stock", "ETF"), `None` when the symbol search returns
    /// no entries.
    async fn fetch_instrument_description(&self, ticker: &str)
        -> ProviderResult<Option<String>>;
}
