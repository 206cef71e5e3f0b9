use thiserror::Error;

use crate::persistence::DatabaseError;

/// Errors raised while resolving market data
#[derive(Debug, Error, Clone)]
pub enum MarketDataError {
    #[error("No price available for {ticker}")]
    PriceUnavailable { ticker: String },

    #[error("No metadata available for {ticker}")]
    MetadataUnavailable { ticker: String },
}

/// Errors raised by buy/sell accounting
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Quantity must be positive")]
    InvalidQuantity,

    #[error("Price must be positive")]
    InvalidPrice,

    #[error("Price is required for currency and gold transactions. Please provide the price field manually.")]
    ManualPriceRequired,

    #[error("Unable to auto-detect name. Please provide the name field manually.")]
    NameUnavailable,

    #[error("Unable to auto-detect price. Please provide the price field manually.")]
    PriceUnavailable,

    #[error("Holding not found")]
    PositionNotFound,

    #[error("Insufficient quantity to sell")]
    InsufficientQuantity,

    #[error("Database error: {0}")]
    Store(#[from] DatabaseError),
}
