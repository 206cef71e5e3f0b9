//! Persistence Layer
//!
//! This module provides database persistence for users, holdings, and the
//! durable ticker metadata cache. Uses SQLite for local storage with async
//! operations via sqlx.
//!
//! # Database Schema
//!
//! ## Users Table
//! - user_id: Autoincrement primary key
//! - username: Unique login name
//! - password: SHA-256 hex digest
//! - avatar: Optional avatar URL
//! - created_at: Timestamp
//!
//! ## Holdings Table
//! - record_id: Autoincrement primary key
//! - user_id: Foreign key to users
//! - instrument_type: One of 'stock', 'bond', 'fund', 'gold', 'currency'
//! - ticker: Canonical (upper-case) ticker
//! - name: Display name
//! - avg_cost: Quantity-weighted average cost per unit
//! - quantity: Units held
//! - created_at / updated_at: Timestamps
//!
//! At most one holding exists per (user_id, ticker) pair, enforced by a
//! unique index.
//!
//! ## Ticker Metadata Table
//! - ticker: Canonical ticker, primary key
//! - name: Display name from the quote provider
//! - instrument_type: Classified type
//! - updated_at: When the row was last refreshed, drives staleness

pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),
}

/// Initialize the database connection pool
///
/// # Arguments
/// - `database_url`: Path to SQLite database file (e.g., "sqlite://data/folio.db")
///
/// # Returns
/// Database connection pool ready for use
///
/// # Errors
/// Returns error if database connection fails or migrations fail
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", database_url);

    // Ensure data directory exists
    if let Some(db_path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
            })?;
        }
    }

    // Create connection options
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(false)
        .log_statements(tracing::log::LevelFilter::Debug);

    // An in-memory SQLite database exists per connection, so the pool
    // must not grow past one for ":memory:" URLs
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    // Create connection pool
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    // Run migrations
    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

/// Run database migrations
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    // Create users table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            avatar TEXT,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create users table: {}", e)))?;

    // Create holdings table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS holdings (
            record_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            instrument_type TEXT NOT NULL
                CHECK(instrument_type IN ('stock', 'bond', 'fund', 'gold', 'currency')),
            ticker TEXT NOT NULL,
            name TEXT NOT NULL,
            avg_cost REAL NOT NULL,
            quantity REAL NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (user_id) REFERENCES users(user_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create holdings table: {}", e))
    })?;

    // Create ticker metadata table (durable cache tier)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ticker_metadata (
            ticker TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            instrument_type TEXT NOT NULL
                CHECK(instrument_type IN ('stock', 'bond', 'fund', 'gold', 'currency')),
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create ticker_metadata table: {}", e))
    })?;

    // One holding per (user, ticker) pair
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_holdings_user_ticker ON holdings(user_id, ticker)",
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_holdings_user ON holdings(user_id)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    info!("✓ Database migrations completed successfully");

    Ok(())
}
