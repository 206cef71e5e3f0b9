//! Database Models
//!
//! Persistent data structures for users, holdings, and cached ticker metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::entities::holding::{Holding, InstrumentType};

/// Holding row in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HoldingRecord {
    pub record_id: i64,
    pub user_id: i64,
    pub instrument_type: String,
    pub ticker: String,
    pub name: String,
    pub avg_cost: f64,
    pub quantity: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HoldingRecord {
    /// Domain view of this row with a typed instrument type.
    ///
    /// Rows written through the repositories always carry a valid type
    /// string; anything else reads back as a stock.
    pub fn into_holding(self) -> Holding {
        let instrument_type = self
            .instrument_type
            .parse()
            .unwrap_or(InstrumentType::Stock);
        Holding {
            record_id: self.record_id,
            user_id: self.user_id,
            instrument_type,
            ticker: self.ticker,
            name: self.name,
            avg_cost: self.avg_cost,
            quantity: self.quantity,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// User row in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRecord {
    pub user_id: i64,
    pub username: String,
    /// SHA-256 hex digest, never serialized into API responses
    #[serde(skip_serializing)]
    pub password: String,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Ticker metadata row in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TickerMetadataRecord {
    pub ticker: String,
    pub name: String,
    pub instrument_type: String,
    pub updated_at: DateTime<Utc>,
}

/// Create holding input
#[derive(Debug, Clone)]
pub struct CreateHolding {
    pub user_id: i64,
    pub instrument_type: InstrumentType,
    pub ticker: String,
    pub name: String,
    pub avg_cost: f64,
    pub quantity: f64,
}

/// Update holding input (raw field replacement)
#[derive(Debug, Clone)]
pub struct UpdateHolding {
    pub instrument_type: InstrumentType,
    pub ticker: String,
    pub name: String,
    pub avg_cost: f64,
    pub quantity: f64,
}

/// Create user input
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub username: String,
    pub password: String,
    pub avatar: Option<String>,
}
