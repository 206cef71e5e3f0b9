//! Holding Entity
//!
//! A holding is one user's position in one instrument: the ticker, the
//! display name, the instrument type, the accumulated quantity, and the
//! quantity-weighted average cost paid for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical ticker form used as cache and database key
pub fn normalize_ticker(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Asset class of a holding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentType {
    Stock,
    Bond,
    Fund,
    Gold,
    Currency,
}

impl InstrumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentType::Stock => "stock",
            InstrumentType::Bond => "bond",
            InstrumentType::Fund => "fund",
            InstrumentType::Gold => "gold",
            InstrumentType::Currency => "currency",
        }
    }

    /// Map a provider's free-text instrument description to a type.
    ///
    /// Keyword matching is case-insensitive and checked in a fixed order;
    /// the first keyword found wins. Descriptions matching nothing are
    /// treated as stocks.
    pub fn classify(description: &str) -> InstrumentType {
        let description = description.to_lowercase();
        if description.contains("bond") {
            InstrumentType::Bond
        } else if description.contains("stock") || description.contains("common stock") {
            InstrumentType::Stock
        } else if description.contains("fund") || description.contains("etf") {
            InstrumentType::Fund
        } else if description.contains("gold") {
            InstrumentType::Gold
        } else if description.contains("currency") {
            InstrumentType::Currency
        } else {
            InstrumentType::Stock
        }
    }

    /// Gold and currency positions have no quoted market price and must be
    /// priced by the caller.
    pub fn requires_manual_price(&self) -> bool {
        matches!(self, InstrumentType::Gold | InstrumentType::Currency)
    }
}

impl std::str::FromStr for InstrumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stock" => Ok(InstrumentType::Stock),
            "bond" => Ok(InstrumentType::Bond),
            "fund" => Ok(InstrumentType::Fund),
            "gold" => Ok(InstrumentType::Gold),
            "currency" => Ok(InstrumentType::Currency),
            other => Err(format!("Unknown instrument type: {}", other)),
        }
    }
}

impl std::fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user's position in one instrument
#[derive(Debug, Clone, Serialize)]
pub struct Holding {
    pub record_id: i64,
    pub user_id: i64,
    pub instrument_type: InstrumentType,
    pub ticker: String,
    pub name: String,
    pub avg_cost: f64,
    pub quantity: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
