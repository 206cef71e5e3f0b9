//! Market Data Resolver
//!
//! Two-tier cache in front of the quote provider: a process-local price cache
//! with a short TTL, and the durable ticker metadata table with a long TTL.
//! Provider failures degrade to the last cached value where one exists, so a
//! flaky provider slows data down instead of failing requests.
//!
//! Staleness is derived at read time from stored timestamps; no cache entry
//! is ever removed. The stale entries are exactly what the fallback policy
//! serves when the provider is down.

use crate::domain::entities::holding::{normalize_ticker, InstrumentType};
use crate::domain::errors::MarketDataError;
use crate::domain::repositories::quote_provider::QuoteProvider;
use crate::persistence::models::TickerMetadataRecord;
use crate::persistence::repository::MetadataRepository;
use crate::persistence::DatabaseError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Source of "now" for TTL checks, swappable in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time, used everywhere outside tests
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// One entry in the in-memory price cache
#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: f64,
    fetched_at: DateTime<Utc>,
}

/// Resolved name and type for a ticker
#[derive(Debug, Clone, Serialize)]
pub struct TickerMetadata {
    pub ticker: String,
    pub name: String,
    pub instrument_type: InstrumentType,
}

impl TickerMetadata {
    fn from_record(record: &TickerMetadataRecord) -> Self {
        TickerMetadata {
            ticker: record.ticker.clone(),
            name: record.name.clone(),
            instrument_type: record
                .instrument_type
                .parse()
                .unwrap_or(InstrumentType::Stock),
        }
    }
}

/// Price cache entry as reported by `cache_snapshot`
#[derive(Debug, Clone, Serialize)]
pub struct PriceCacheEntry {
    pub ticker: String,
    pub price: f64,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
}

/// Metadata cache entry as reported by `cache_snapshot`
#[derive(Debug, Clone, Serialize)]
pub struct MetadataCacheEntry {
    pub ticker: String,
    pub name: String,
    pub instrument_type: String,
    pub updated_at: DateTime<Utc>,
    pub stale: bool,
}

/// Read-only view of both cache tiers
#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    pub prices: Vec<PriceCacheEntry>,
    pub metadata: Vec<MetadataCacheEntry>,
}

/// Resolves prices and instrument metadata through the two cache tiers
pub struct MarketDataService {
    provider: Arc<dyn QuoteProvider>,
    metadata_repo: MetadataRepository,
    price_cache: Mutex<HashMap<String, CachedPrice>>,
    clock: Arc<dyn Clock>,
    price_ttl: Duration,
    metadata_ttl: Duration,
}

impl MarketDataService {
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        metadata_repo: MetadataRepository,
        clock: Arc<dyn Clock>,
        price_ttl: Duration,
        metadata_ttl: Duration,
    ) -> Self {
        Self {
            provider,
            metadata_repo,
            price_cache: Mutex::new(HashMap::new()),
            clock,
            price_ttl,
            metadata_ttl,
        }
    }

    /// A timestamp in the future counts as fresh; the clock moved backwards,
    /// not the data forwards.
    fn is_fresh(now: DateTime<Utc>, stored: DateTime<Utc>, ttl: Duration) -> bool {
        match now.signed_duration_since(stored).to_std() {
            Ok(age) => age < ttl,
            Err(_) => true,
        }
    }

    /// Resolve the current price for a ticker.
    ///
    /// Fresh cache entries are returned without touching the provider. A
    /// provider failure (or a non-positive price in its response) falls back
    /// to the last cached price when one exists, however old.
    pub async fn resolve_price(&self, ticker: &str) -> Result<f64, MarketDataError> {
        let ticker = normalize_ticker(ticker);
        let now = self.clock.now();

        {
            let cache = self.price_cache.lock().await;
            if let Some(entry) = cache.get(&ticker) {
                if Self::is_fresh(now, entry.fetched_at, self.price_ttl) {
                    debug!("Price cache hit for {}: {}", ticker, entry.price);
                    return Ok(entry.price);
                }
            }
        }

        match self.provider.fetch_price(&ticker).await {
            Ok(price) if price > 0.0 => {
                let fetched_at = self.clock.now();
                let mut cache = self.price_cache.lock().await;
                cache.insert(ticker.clone(), CachedPrice { price, fetched_at });
                debug!("Fetched price for {}: {}", ticker, price);
                Ok(price)
            }
            Ok(price) => {
                warn!(
                    "Provider {} returned non-positive price {} for {}",
                    self.provider.name(),
                    price,
                    ticker
                );
                self.stale_price_or_fail(&ticker).await
            }
            Err(e) => {
                warn!(
                    "Price fetch failed for {} via {}: {}",
                    ticker,
                    self.provider.name(),
                    e
                );
                self.stale_price_or_fail(&ticker).await
            }
        }
    }

    async fn stale_price_or_fail(&self, ticker: &str) -> Result<f64, MarketDataError> {
        let cache = self.price_cache.lock().await;
        if let Some(entry) = cache.get(ticker) {
            warn!(
                "Serving stale price for {} from {} (degraded)",
                ticker, entry.fetched_at
            );
            Ok(entry.price)
        } else {
            Err(MarketDataError::PriceUnavailable {
                ticker: ticker.to_string(),
            })
        }
    }

    /// Resolve display name and instrument type for a ticker.
    ///
    /// The durable metadata cache answers while its entry is younger than the
    /// metadata TTL. On a miss or a stale entry the provider is consulted;
    /// if that fails and a stale entry exists, the stale entry is served.
    pub async fn resolve_metadata(&self, ticker: &str) -> Result<TickerMetadata, MarketDataError> {
        let ticker = normalize_ticker(ticker);
        let now = self.clock.now();

        let cached = match self.metadata_repo.get(&ticker).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Metadata cache read failed for {}: {}", ticker, e);
                None
            }
        };

        if let Some(record) = &cached {
            if Self::is_fresh(now, record.updated_at, self.metadata_ttl) {
                debug!("Metadata cache hit for {}", ticker);
                return Ok(TickerMetadata::from_record(record));
            }
        }

        match self.fetch_and_store_metadata(&ticker).await {
            Ok(metadata) => Ok(metadata),
            Err(e) => match cached {
                Some(record) => {
                    warn!(
                        "Serving stale metadata for {} from {} (degraded)",
                        ticker, record.updated_at
                    );
                    Ok(TickerMetadata::from_record(&record))
                }
                None => Err(e),
            },
        }
    }

    /// Unconditionally re-fetch metadata from the provider and upsert it,
    /// regardless of cache freshness. Failures surface to the caller; this
    /// is the manual invalidation path, not a best-effort refresh.
    pub async fn refresh_metadata(&self, ticker: &str) -> Result<TickerMetadata, MarketDataError> {
        let ticker = normalize_ticker(ticker);
        info!("Manually refreshing metadata for {}", ticker);
        self.fetch_and_store_metadata(&ticker).await
    }

    /// Name lookup and type lookup are independent calls: a missing name
    /// fails the operation, a failed type lookup degrades to `stock`.
    async fn fetch_and_store_metadata(
        &self,
        ticker: &str,
    ) -> Result<TickerMetadata, MarketDataError> {
        let name = match self.provider.fetch_quote_name(ticker).await {
            Ok(Some(name)) if !name.trim().is_empty() => name,
            Ok(_) => {
                warn!("Provider {} has no name for {}", self.provider.name(), ticker);
                return Err(MarketDataError::MetadataUnavailable {
                    ticker: ticker.to_string(),
                });
            }
            Err(e) => {
                warn!(
                    "Name lookup failed for {} via {}: {}",
                    ticker,
                    self.provider.name(),
                    e
                );
                return Err(MarketDataError::MetadataUnavailable {
                    ticker: ticker.to_string(),
                });
            }
        };

        let instrument_type = match self.provider.fetch_instrument_description(ticker).await {
            Ok(Some(description)) => InstrumentType::classify(&description),
            Ok(None) => {
                debug!("No instrument description for {}, defaulting to stock", ticker);
                InstrumentType::Stock
            }
            Err(e) => {
                warn!(
                    "Type lookup failed for {}: {}, defaulting to stock",
                    ticker, e
                );
                InstrumentType::Stock
            }
        };

        // Write-through. A failed upsert costs a future provider call, not
        // this request.
        if let Err(e) = self
            .metadata_repo
            .upsert(ticker, &name, instrument_type, self.clock.now())
            .await
        {
            warn!("Failed to cache metadata for {}: {}", ticker, e);
        }

        info!(
            "Resolved metadata for {}: {} ({})",
            ticker, name, instrument_type
        );
        Ok(TickerMetadata {
            ticker: ticker.to_string(),
            name,
            instrument_type,
        })
    }

    /// Current contents of both cache tiers with derived staleness flags
    pub async fn cache_snapshot(&self) -> Result<CacheSnapshot, DatabaseError> {
        let now = self.clock.now();

        let prices = {
            let cache = self.price_cache.lock().await;
            let mut entries: Vec<PriceCacheEntry> = cache
                .iter()
                .map(|(ticker, entry)| PriceCacheEntry {
                    ticker: ticker.clone(),
                    price: entry.price,
                    fetched_at: entry.fetched_at,
                    stale: !Self::is_fresh(now, entry.fetched_at, self.price_ttl),
                })
                .collect();
            entries.sort_by(|a, b| a.ticker.cmp(&b.ticker));
            entries
        };

        let metadata = self
            .metadata_repo
            .list_all()
            .await?
            .into_iter()
            .map(|record| MetadataCacheEntry {
                stale: !Self::is_fresh(now, record.updated_at, self.metadata_ttl),
                ticker: record.ticker,
                name: record.name,
                instrument_type: record.instrument_type,
                updated_at: record.updated_at,
            })
            .collect();

        Ok(CacheSnapshot { prices, metadata })
    }
}
