//! Shared fixtures: in-memory database setup, a manual clock, and a
//! counting mock quote provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio::application::services::market_data::{Clock, MarketDataService};
use folio::domain::repositories::quote_provider::{ProviderError, ProviderResult, QuoteProvider};
use folio::persistence::repository::MetadataRepository;
use folio::persistence::{init_database, DbPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PRICE_TTL: Duration = Duration::from_secs(300);
pub const METADATA_TTL: Duration = Duration::from_secs(86400);

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Configurable quote provider that counts every call it receives
#[derive(Default)]
pub struct MockProvider {
    pub price_calls: AtomicUsize,
    pub name_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
    price: Mutex<Option<ProviderResult<f64>>>,
    name: Mutex<Option<ProviderResult<Option<String>>>>,
    description: Mutex<Option<ProviderResult<Option<String>>>>,
}

impl MockProvider {
    pub fn set_price(&self, result: ProviderResult<f64>) {
        *self.price.lock().unwrap() = Some(result);
    }

    pub fn set_name(&self, result: ProviderResult<Option<String>>) {
        *self.name.lock().unwrap() = Some(result);
    }

    pub fn set_description(&self, result: ProviderResult<Option<String>>) {
        *self.description.lock().unwrap() = Some(result);
    }

    pub fn total_calls(&self) -> usize {
        self.price_calls.load(Ordering::SeqCst)
            + self.name_calls.load(Ordering::SeqCst)
            + self.search_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_price(&self, _ticker: &str) -> ProviderResult<f64> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        self.price
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Err(ProviderError::Transport("no price configured".into())))
    }

    async fn fetch_quote_name(&self, _ticker: &str) -> ProviderResult<Option<String>> {
        self.name_calls.fetch_add(1, Ordering::SeqCst);
        self.name
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Err(ProviderError::Transport("no name configured".into())))
    }

    async fn fetch_instrument_description(&self, _ticker: &str) -> ProviderResult<Option<String>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.description
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Err(ProviderError::Transport("no search configured".into())))
    }
}

pub async fn memory_pool() -> DbPool {
    init_database("sqlite::memory:").await.unwrap()
}

pub fn market_data_service(
    pool: &DbPool,
    provider: Arc<MockProvider>,
    clock: Arc<ManualClock>,
) -> MarketDataService {
    MarketDataService::new(
        provider,
        MetadataRepository::new(pool.clone()),
        clock,
        PRICE_TTL,
        METADATA_TTL,
    )
}
