//! Position Ledger
//!
//! Buy and sell accounting over per-user holdings. Buys merge into an
//! existing position at a quantity-weighted average cost; sells reduce
//! quantity without touching the cost basis and remove the row when it
//! reaches zero.
//!
//! Missing trade fields (price, name, instrument type) are filled in from
//! the market data resolver before any position math runs. Gold and
//! currency positions have no quotable feed, so their price must always be
//! supplied by the caller.

use crate::application::services::market_data::MarketDataService;
use crate::domain::entities::holding::{normalize_ticker, InstrumentType};
use crate::domain::errors::LedgerError;
use crate::persistence::models::CreateHolding;
use crate::persistence::repository::HoldingRepository;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of a buy, for the new or merged position
#[derive(Debug, Clone, Serialize)]
pub struct BuyOutcome {
    pub record_id: i64,
    /// true when the buy opened a new position instead of merging
    pub created: bool,
    pub quantity: f64,
    pub avg_cost: f64,
    pub price_used: f64,
    pub instrument_type: InstrumentType,
}

/// Result of a sell
#[derive(Debug, Clone, Serialize)]
pub struct SellOutcome {
    pub record_id: i64,
    pub sold_quantity: f64,
    pub remaining_quantity: f64,
    pub price_used: f64,
    pub sale_value: f64,
    /// true when the sell emptied the position and the row was removed
    pub closed: bool,
}

/// Buy/sell accounting over the holdings table
pub struct PositionLedger {
    holdings: HoldingRepository,
    market_data: Arc<MarketDataService>,
    /// One lock per (user, ticker) pair; trades on the same position run
    /// read-compute-write under it, trades on different positions do not
    /// contend.
    position_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PositionLedger {
    pub fn new(holdings: HoldingRepository, market_data: Arc<MarketDataService>) -> Self {
        Self {
            holdings,
            market_data,
            position_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn position_lock(&self, user_id: i64, ticker: &str) -> Arc<Mutex<()>> {
        let key = format!("{}:{}", user_id, ticker);
        let mut locks = self.position_locks.lock().await;
        locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Record a buy for a user.
    ///
    /// A caller-supplied price of zero counts as absent and triggers
    /// resolution, as do absent or blank names. Caller-supplied instrument
    /// types are kept as-is; only missing fields are resolved.
    pub async fn buy(
        &self,
        user_id: i64,
        ticker: &str,
        quantity: f64,
        price: Option<f64>,
        instrument_type: Option<InstrumentType>,
        name: Option<String>,
    ) -> Result<BuyOutcome, LedgerError> {
        if !(quantity > 0.0) {
            return Err(LedgerError::InvalidQuantity);
        }
        let ticker = normalize_ticker(ticker);

        let price = price.filter(|p| *p != 0.0);
        if let Some(p) = price {
            if !(p > 0.0) {
                return Err(LedgerError::InvalidPrice);
            }
        }
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let (price, name, instrument_type) = match instrument_type {
            Some(manual) if manual.requires_manual_price() => {
                let price = price.ok_or(LedgerError::ManualPriceRequired)?;
                (price, name.unwrap_or_else(|| ticker.clone()), manual)
            }
            given_type => {
                let (name, instrument_type) = self
                    .resolve_missing_fields(&ticker, name, given_type)
                    .await?;
                let price = match price {
                    Some(p) => p,
                    None => self.market_data.resolve_price(&ticker).await.map_err(|e| {
                        warn!("Price resolution failed for {}: {}", ticker, e);
                        LedgerError::PriceUnavailable
                    })?,
                };
                (price, name, instrument_type)
            }
        };

        let lock = self.position_lock(user_id, &ticker).await;
        let _guard = lock.lock().await;

        match self.holdings.find_by_ticker(user_id, &ticker).await? {
            Some(existing) => {
                let new_quantity = existing.quantity + quantity;
                let new_avg_cost =
                    (existing.quantity * existing.avg_cost + quantity * price) / new_quantity;
                self.holdings
                    .update_position(existing.record_id, new_quantity, new_avg_cost)
                    .await?;

                info!(
                    "Merged buy of {} {} @ {} for user {}: {} @ {:.4}",
                    quantity, ticker, price, user_id, new_quantity, new_avg_cost
                );
                Ok(BuyOutcome {
                    record_id: existing.record_id,
                    created: false,
                    quantity: new_quantity,
                    avg_cost: new_avg_cost,
                    price_used: price,
                    instrument_type,
                })
            }
            None => {
                let record = self
                    .holdings
                    .insert(CreateHolding {
                        user_id,
                        instrument_type,
                        ticker: ticker.clone(),
                        name,
                        avg_cost: price,
                        quantity,
                    })
                    .await?;

                info!(
                    "Opened position {} {} @ {} for user {} ({})",
                    quantity, ticker, price, user_id, instrument_type
                );
                Ok(BuyOutcome {
                    record_id: record.record_id,
                    created: true,
                    quantity,
                    avg_cost: price,
                    price_used: price,
                    instrument_type,
                })
            }
        }
    }

    /// Fill in whichever of name and type the caller left out.
    ///
    /// One resolver call covers both. A failed resolution is fatal only when
    /// the name is missing; a missing type alone degrades to `stock`.
    async fn resolve_missing_fields(
        &self,
        ticker: &str,
        name: Option<String>,
        given_type: Option<InstrumentType>,
    ) -> Result<(String, InstrumentType), LedgerError> {
        if let (Some(name), Some(instrument_type)) = (name.clone(), given_type) {
            return Ok((name, instrument_type));
        }

        match self.market_data.resolve_metadata(ticker).await {
            Ok(metadata) => Ok((
                name.unwrap_or(metadata.name),
                given_type.unwrap_or(metadata.instrument_type),
            )),
            Err(e) => match name {
                Some(name) => {
                    warn!(
                        "Type resolution failed for {}: {}, defaulting to stock",
                        ticker, e
                    );
                    Ok((name, given_type.unwrap_or(InstrumentType::Stock)))
                }
                None => {
                    warn!("Name resolution failed for {}: {}", ticker, e);
                    Err(LedgerError::NameUnavailable)
                }
            },
        }
    }

    /// Record a sell for a user.
    ///
    /// The sale price never changes the stored average cost. Selling the
    /// full quantity deletes the position row.
    pub async fn sell(
        &self,
        user_id: i64,
        ticker: &str,
        quantity: f64,
        price: Option<f64>,
    ) -> Result<SellOutcome, LedgerError> {
        if !(quantity > 0.0) {
            return Err(LedgerError::InvalidQuantity);
        }
        let ticker = normalize_ticker(ticker);

        let price = price.filter(|p| *p != 0.0);
        if let Some(p) = price {
            if !(p > 0.0) {
                return Err(LedgerError::InvalidPrice);
            }
        }
        let price = match price {
            Some(p) => p,
            None => self.market_data.resolve_price(&ticker).await.map_err(|e| {
                warn!("Price resolution failed for {}: {}", ticker, e);
                LedgerError::PriceUnavailable
            })?,
        };

        let lock = self.position_lock(user_id, &ticker).await;
        let _guard = lock.lock().await;

        let existing = self
            .holdings
            .find_by_ticker(user_id, &ticker)
            .await?
            .ok_or(LedgerError::PositionNotFound)?;

        if existing.quantity < quantity {
            debug!(
                "Rejected sell of {} {} for user {}: only {} held",
                quantity, ticker, user_id, existing.quantity
            );
            return Err(LedgerError::InsufficientQuantity);
        }

        let remaining = existing.quantity - quantity;
        let sale_value = quantity * price;

        if remaining == 0.0 {
            self.holdings.delete(existing.record_id).await?;
            info!(
                "Closed position {} for user {}: sold {} @ {}",
                ticker, user_id, quantity, price
            );
            Ok(SellOutcome {
                record_id: existing.record_id,
                sold_quantity: quantity,
                remaining_quantity: 0.0,
                price_used: price,
                sale_value,
                closed: true,
            })
        } else {
            self.holdings
                .update_quantity(existing.record_id, remaining)
                .await?;
            info!(
                "Reduced position {} for user {}: sold {} @ {}, {} remaining",
                ticker, user_id, quantity, price, remaining
            );
            Ok(SellOutcome {
                record_id: existing.record_id,
                sold_quantity: quantity,
                remaining_quantity: remaining,
                price_used: price,
                sale_value,
                closed: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::market_data::SystemClock;
    use crate::domain::repositories::quote_provider::{
        ProviderError, ProviderResult, QuoteProvider,
    };
    use crate::persistence::init_database;
    use crate::persistence::repository::MetadataRepository;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MockProvider {
        price_calls: AtomicUsize,
        name_calls: AtomicUsize,
        search_calls: AtomicUsize,
        price: StdMutex<Option<ProviderResult<f64>>>,
        name: StdMutex<Option<ProviderResult<Option<String>>>>,
        description: StdMutex<Option<ProviderResult<Option<String>>>>,
    }

    impl MockProvider {
        fn set_price(&self, result: ProviderResult<f64>) {
            *self.price.lock().unwrap() = Some(result);
        }

        fn set_name(&self, result: ProviderResult<Option<String>>) {
            *self.name.lock().unwrap() = Some(result);
        }

        fn set_description(&self, result: ProviderResult<Option<String>>) {
            *self.description.lock().unwrap() = Some(result);
        }

        fn total_calls(&self) -> usize {
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

        async fn fetch_instrument_description(
            &self,
            _ticker: &str,
        ) -> ProviderResult<Option<String>> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            self.description
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(Err(ProviderError::Transport("no search configured".into())))
        }
    }

    async fn ledger_with(provider: Arc<MockProvider>) -> PositionLedger {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let market_data = MarketDataService::new(
            provider,
            MetadataRepository::new(pool.clone()),
            Arc::new(SystemClock),
            Duration::from_secs(300),
            Duration::from_secs(86400),
        );
        PositionLedger::new(HoldingRepository::new(pool), Arc::new(market_data))
    }

    fn fully_specified() -> (Option<InstrumentType>, Option<String>) {
        (Some(InstrumentType::Stock), Some("Apple Inc".to_string()))
    }

    #[tokio::test]
    async fn test_buy_opens_position() {
        let provider = Arc::new(MockProvider::default());
        let ledger = ledger_with(provider.clone()).await;
        let (instrument_type, name) = fully_specified();

        let outcome = ledger
            .buy(1, "aapl", 10.0, Some(150.0), instrument_type, name)
            .await
            .unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.quantity, 10.0);
        assert_eq!(outcome.avg_cost, 150.0);
        assert_eq!(outcome.price_used, 150.0);
        // everything supplied, nothing resolved
        assert_eq!(provider.total_calls(), 0);

        let row = ledger.holdings.find_by_ticker(1, "AAPL").await.unwrap().unwrap();
        assert_eq!(row.ticker, "AAPL");
        assert_eq!(row.name, "Apple Inc");
    }

    #[tokio::test]
    async fn test_buy_merges_at_weighted_average() {
        let provider = Arc::new(MockProvider::default());
        let ledger = ledger_with(provider).await;
        let (instrument_type, name) = fully_specified();

        ledger
            .buy(1, "AAPL", 10.0, Some(150.0), instrument_type, name.clone())
            .await
            .unwrap();
        let outcome = ledger
            .buy(1, "AAPL", 10.0, Some(200.0), instrument_type, name)
            .await
            .unwrap();

        assert!(!outcome.created);
        assert_eq!(outcome.quantity, 20.0);
        assert_eq!(outcome.avg_cost, 175.0);
    }

    #[tokio::test]
    async fn test_sell_partial_keeps_cost_basis() {
        let provider = Arc::new(MockProvider::default());
        let ledger = ledger_with(provider).await;
        let (instrument_type, name) = fully_specified();

        ledger
            .buy(1, "AAPL", 10.0, Some(150.0), instrument_type, name.clone())
            .await
            .unwrap();
        ledger
            .buy(1, "AAPL", 10.0, Some(200.0), instrument_type, name)
            .await
            .unwrap();

        let outcome = ledger.sell(1, "AAPL", 5.0, Some(160.0)).await.unwrap();
        assert!(!outcome.closed);
        assert_eq!(outcome.sold_quantity, 5.0);
        assert_eq!(outcome.remaining_quantity, 15.0);
        assert_eq!(outcome.sale_value, 800.0);

        let row = ledger.holdings.find_by_ticker(1, "AAPL").await.unwrap().unwrap();
        assert_eq!(row.quantity, 15.0);
        // sale price never moves the average cost
        assert_eq!(row.avg_cost, 175.0);
    }

    #[tokio::test]
    async fn test_sell_full_quantity_closes_position() {
        let provider = Arc::new(MockProvider::default());
        let ledger = ledger_with(provider).await;
        let (instrument_type, name) = fully_specified();

        ledger
            .buy(1, "AAPL", 15.0, Some(175.0), instrument_type, name)
            .await
            .unwrap();

        let outcome = ledger.sell(1, "AAPL", 15.0, Some(180.0)).await.unwrap();
        assert!(outcome.closed);
        assert_eq!(outcome.remaining_quantity, 0.0);

        assert!(ledger.holdings.find_by_ticker(1, "AAPL").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sell_more_than_held_is_rejected_without_mutation() {
        let provider = Arc::new(MockProvider::default());
        let ledger = ledger_with(provider).await;
        let (instrument_type, name) = fully_specified();

        ledger
            .buy(1, "AAPL", 10.0, Some(150.0), instrument_type, name)
            .await
            .unwrap();

        let err = ledger.sell(1, "AAPL", 50.0, Some(160.0)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientQuantity));

        let row = ledger.holdings.find_by_ticker(1, "AAPL").await.unwrap().unwrap();
        assert_eq!(row.quantity, 10.0);
        assert_eq!(row.avg_cost, 150.0);
    }

    #[tokio::test]
    async fn test_sell_unknown_ticker_not_found() {
        let provider = Arc::new(MockProvider::default());
        let ledger = ledger_with(provider).await;

        let err = ledger.sell(1, "MISSING", 1.0, Some(10.0)).await.unwrap_err();
        assert!(matches!(err, LedgerError::PositionNotFound));
    }

    #[tokio::test]
    async fn test_buy_rejects_non_positive_quantity() {
        let provider = Arc::new(MockProvider::default());
        let ledger = ledger_with(provider).await;
        let (instrument_type, name) = fully_specified();

        let err = ledger
            .buy(1, "AAPL", 0.0, Some(150.0), instrument_type, name.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidQuantity));

        let err = ledger
            .buy(1, "AAPL", -3.0, Some(150.0), instrument_type, name.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidQuantity));

        let err = ledger
            .buy(1, "AAPL", f64::NAN, Some(150.0), instrument_type, name)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidQuantity));
    }

    #[tokio::test]
    async fn test_buy_rejects_negative_price() {
        let provider = Arc::new(MockProvider::default());
        let ledger = ledger_with(provider).await;
        let (instrument_type, name) = fully_specified();

        let err = ledger
            .buy(1, "AAPL", 10.0, Some(-150.0), instrument_type, name)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidPrice));
    }

    #[tokio::test]
    async fn test_gold_requires_manual_price() {
        let provider = Arc::new(MockProvider::default());
        let ledger = ledger_with(provider.clone()).await;

        let err = ledger
            .buy(1, "XAU", 2.0, None, Some(InstrumentType::Gold), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ManualPriceRequired));

        // a zero price counts as absent
        let err = ledger
            .buy(1, "XAU", 2.0, Some(0.0), Some(InstrumentType::Gold), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ManualPriceRequired));

        let outcome = ledger
            .buy(1, "XAU", 2.0, Some(1900.0), Some(InstrumentType::Gold), None)
            .await
            .unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.instrument_type, InstrumentType::Gold);

        // manual instruments never touch the provider
        assert_eq!(provider.total_calls(), 0);

        // name defaults to the ticker itself
        let row = ledger.holdings.find_by_ticker(1, "XAU").await.unwrap().unwrap();
        assert_eq!(row.name, "XAU");
    }

    #[tokio::test]
    async fn test_buy_resolves_missing_fields() {
        let provider = Arc::new(MockProvider::default());
        provider.set_price(Ok(150.0));
        provider.set_name(Ok(Some("Apple Inc".to_string())));
        provider.set_description(Ok(Some("Common Stock".to_string())));
        let ledger = ledger_with(provider.clone()).await;

        let outcome = ledger.buy(1, "aapl", 10.0, None, None, None).await.unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.price_used, 150.0);
        assert_eq!(outcome.instrument_type, InstrumentType::Stock);

        let row = ledger.holdings.find_by_ticker(1, "AAPL").await.unwrap().unwrap();
        assert_eq!(row.name, "Apple Inc");
        assert_eq!(row.instrument_type, "stock");
    }

    #[tokio::test]
    async fn test_buy_keeps_caller_supplied_type() {
        let provider = Arc::new(MockProvider::default());
        provider.set_price(Ok(98.5));
        let ledger = ledger_with(provider.clone()).await;

        let outcome = ledger
            .buy(
                1,
                "AGG",
                5.0,
                None,
                Some(InstrumentType::Bond),
                Some("iShares Core US Aggregate".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(outcome.instrument_type, InstrumentType::Bond);
        // name and type were both given, so only the price was resolved
        assert_eq!(provider.name_calls.load(Ordering::SeqCst), 0);
        assert_eq!(provider.search_calls.load(Ordering::SeqCst), 0);
        assert_eq!(provider.price_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_buy_missing_name_with_provider_down_fails() {
        let provider = Arc::new(MockProvider::default());
        provider.set_price(Ok(150.0));
        provider.set_name(Err(ProviderError::Status(500)));
        let ledger = ledger_with(provider).await;

        let err = ledger.buy(1, "AAPL", 10.0, None, None, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::NameUnavailable));
    }

    #[tokio::test]
    async fn test_buy_missing_type_with_provider_down_defaults_to_stock() {
        let provider = Arc::new(MockProvider::default());
        provider.set_price(Ok(150.0));
        provider.set_name(Err(ProviderError::Status(500)));
        provider.set_description(Err(ProviderError::Status(500)));
        let ledger = ledger_with(provider).await;

        let outcome = ledger
            .buy(1, "AAPL", 10.0, None, None, Some("Apple Inc".to_string()))
            .await
            .unwrap();
        assert_eq!(outcome.instrument_type, InstrumentType::Stock);
    }

    #[tokio::test]
    async fn test_buy_without_price_and_provider_down_fails() {
        let provider = Arc::new(MockProvider::default());
        provider.set_price(Err(ProviderError::Transport("down".into())));
        let ledger = ledger_with(provider).await;
        let (instrument_type, name) = fully_specified();

        let err = ledger
            .buy(1, "AAPL", 10.0, None, instrument_type, name)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PriceUnavailable));
    }
}
