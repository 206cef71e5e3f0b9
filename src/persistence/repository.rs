//! Database Repository
//!
//! Data access layer for holdings, users, and cached ticker metadata.

use super::models::*;
use super::{DatabaseError, DbPool};
use crate::domain::entities::holding::InstrumentType;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, error};

/// Holding repository
#[derive(Clone)]
pub struct HoldingRepository {
    pool: DbPool,
}

impl HoldingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get a user's holding for one ticker
    pub async fn find_by_ticker(
        &self,
        user_id: i64,
        ticker: &str,
    ) -> Result<Option<HoldingRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, HoldingRecord>(
            "SELECT * FROM holdings WHERE user_id = ?1 AND ticker = ?2",
        )
        .bind(user_id)
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get holding {} for user {}: {}", ticker, user_id, e);
            DatabaseError::QueryError(format!("Failed to get holding: {}", e))
        })?;

        Ok(record)
    }

    /// Get all holdings for a user
    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<HoldingRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, HoldingRecord>(
            "SELECT * FROM holdings WHERE user_id = ?1 ORDER BY ticker",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list holdings for user {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to list holdings: {}", e))
        })?;

        Ok(records)
    }

    /// Create a new holding
    pub async fn insert(&self, holding: CreateHolding) -> Result<HoldingRecord, DatabaseError> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, HoldingRecord>(
            r#"
            INSERT INTO holdings (
                user_id, instrument_type, ticker, name, avg_cost, quantity,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            RETURNING *
            "#,
        )
        .bind(holding.user_id)
        .bind(holding.instrument_type.as_str())
        .bind(&holding.ticker)
        .bind(&holding.name)
        .bind(holding.avg_cost)
        .bind(holding.quantity)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create holding {}: {}", holding.ticker, e);
            DatabaseError::QueryError(format!("Failed to create holding: {}", e))
        })?;

        debug!(
            "Created holding: {} ({}) for user {}",
            record.ticker, record.record_id, record.user_id
        );
        Ok(record)
    }

    /// Update quantity and average cost after a merged buy
    pub async fn update_position(
        &self,
        record_id: i64,
        quantity: f64,
        avg_cost: f64,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now();
        let rows_affected = sqlx::query(
            "UPDATE holdings SET quantity = ?1, avg_cost = ?2, updated_at = ?3 WHERE record_id = ?4",
        )
        .bind(quantity)
        .bind(avg_cost)
        .bind(now)
        .bind(record_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update holding {}: {}", record_id, e);
            DatabaseError::QueryError(format!("Failed to update holding: {}", e))
        })?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!(
                "Holding not found: {}",
                record_id
            )));
        }

        debug!("Updated holding position: {}", record_id);
        Ok(())
    }

    /// Update quantity only, leaving the cost basis untouched
    pub async fn update_quantity(
        &self,
        record_id: i64,
        quantity: f64,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now();
        let rows_affected = sqlx::query(
            "UPDATE holdings SET quantity = ?1, updated_at = ?2 WHERE record_id = ?3",
        )
        .bind(quantity)
        .bind(now)
        .bind(record_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update holding quantity {}: {}", record_id, e);
            DatabaseError::QueryError(format!("Failed to update holding: {}", e))
        })?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!(
                "Holding not found: {}",
                record_id
            )));
        }

        debug!("Updated holding quantity: {}", record_id);
        Ok(())
    }

    /// Replace every mutable field of a holding (raw CRUD path)
    ///
    /// Returns false when the record does not exist for this user.
    pub async fn update_fields(
        &self,
        user_id: i64,
        record_id: i64,
        update: UpdateHolding,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now();
        let rows_affected = sqlx::query(
            r#"
            UPDATE holdings
            SET instrument_type = ?1, ticker = ?2, name = ?3, avg_cost = ?4,
                quantity = ?5, updated_at = ?6
            WHERE record_id = ?7 AND user_id = ?8
            "#,
        )
        .bind(update.instrument_type.as_str())
        .bind(&update.ticker)
        .bind(&update.name)
        .bind(update.avg_cost)
        .bind(update.quantity)
        .bind(now)
        .bind(record_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update holding {}: {}", record_id, e);
            DatabaseError::QueryError(format!("Failed to update holding: {}", e))
        })?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    /// Delete a holding by record id
    pub async fn delete(&self, record_id: i64) -> Result<(), DatabaseError> {
        let rows_affected = sqlx::query("DELETE FROM holdings WHERE record_id = ?1")
            .bind(record_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to delete holding {}: {}", record_id, e);
                DatabaseError::QueryError(format!("Failed to delete holding: {}", e))
            })?
            .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!(
                "Holding not found: {}",
                record_id
            )));
        }

        debug!("Deleted holding: {}", record_id);
        Ok(())
    }

    /// Delete a holding owned by a specific user (raw CRUD path)
    ///
    /// Returns false when the record does not exist for this user.
    pub async fn delete_for_user(
        &self,
        user_id: i64,
        record_id: i64,
    ) -> Result<bool, DatabaseError> {
        let rows_affected =
            sqlx::query("DELETE FROM holdings WHERE record_id = ?1 AND user_id = ?2")
                .bind(record_id)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to delete holding {}: {}", record_id, e);
                    DatabaseError::QueryError(format!("Failed to delete holding: {}", e))
                })?
                .rows_affected();

        Ok(rows_affected > 0)
    }
}

/// User repository
#[derive(Clone)]
pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// SHA-256 hex digest used as the stored password form
    pub fn hash_password(password: &str) -> String {
        hex::encode(Sha256::digest(password.as_bytes()))
    }

    /// Create a new user, storing the password digest
    pub async fn create(&self, user: CreateUser) -> Result<UserRecord, DatabaseError> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (username, password, avatar, created_at)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING *
            "#,
        )
        .bind(&user.username)
        .bind(Self::hash_password(&user.password))
        .bind(&user.avatar)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create user {}: {}", user.username, e);
            DatabaseError::QueryError(format!("Failed to create user: {}", e))
        })?;

        debug!("Created user: {} ({})", record.username, record.user_id);
        Ok(record)
    }

    /// Get user by ID
    pub async fn get(&self, user_id: i64) -> Result<Option<UserRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to get user {}: {}", user_id, e);
                DatabaseError::QueryError(format!("Failed to get user: {}", e))
            })?;

        Ok(record)
    }

    /// Get user by username
    pub async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE username = ?1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to get user {}: {}", username, e);
                DatabaseError::QueryError(format!("Failed to get user: {}", e))
            })?;

        Ok(record)
    }

    /// Get all users
    pub async fn list(&self) -> Result<Vec<UserRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, UserRecord>("SELECT * FROM users ORDER BY user_id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to list users: {}", e);
                DatabaseError::QueryError(format!("Failed to list users: {}", e))
            })?;

        Ok(records)
    }

    /// Check a plaintext password against the stored digest
    pub fn password_matches(record: &UserRecord, password: &str) -> bool {
        Self::hash_password(password) == record.password
    }

    /// Replace username, password, and avatar for a user
    ///
    /// Returns false when the user does not exist.
    pub async fn update(
        &self,
        user_id: i64,
        username: &str,
        password: &str,
        avatar: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let rows_affected = sqlx::query(
            "UPDATE users SET username = ?1, password = ?2, avatar = ?3 WHERE user_id = ?4",
        )
        .bind(username)
        .bind(Self::hash_password(password))
        .bind(avatar)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update user {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to update user: {}", e))
        })?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    /// Delete a user
    ///
    /// Returns false when the user does not exist.
    pub async fn delete(&self, user_id: i64) -> Result<bool, DatabaseError> {
        let rows_affected = sqlx::query("DELETE FROM users WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to delete user {}: {}", user_id, e);
                DatabaseError::QueryError(format!("Failed to delete user: {}", e))
            })?
            .rows_affected();

        if rows_affected > 0 {
            debug!("Deleted user: {}", user_id);
        }
        Ok(rows_affected > 0)
    }
}

/// Ticker metadata repository (durable cache tier)
#[derive(Clone)]
pub struct MetadataRepository {
    pool: DbPool,
}

impl MetadataRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get cached metadata for a ticker
    pub async fn get(&self, ticker: &str) -> Result<Option<TickerMetadataRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, TickerMetadataRecord>(
            "SELECT * FROM ticker_metadata WHERE ticker = ?1",
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get metadata for {}: {}", ticker, e);
            DatabaseError::QueryError(format!("Failed to get metadata: {}", e))
        })?;

        Ok(record)
    }

    /// Insert or refresh cached metadata for a ticker.
    ///
    /// UPDATE first, INSERT when no row was touched. The two statements are
    /// not atomic, but the metadata table has a single writer per ticker in
    /// practice and a lost write costs one extra provider call.
    pub async fn upsert(
        &self,
        ticker: &str,
        name: &str,
        instrument_type: InstrumentType,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let rows_affected = sqlx::query(
            "UPDATE ticker_metadata SET name = ?1, instrument_type = ?2, updated_at = ?3 WHERE ticker = ?4",
        )
        .bind(name)
        .bind(instrument_type.as_str())
        .bind(now)
        .bind(ticker)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update metadata for {}: {}", ticker, e);
            DatabaseError::QueryError(format!("Failed to update metadata: {}", e))
        })?
        .rows_affected();

        if rows_affected == 0 {
            sqlx::query(
                "INSERT INTO ticker_metadata (ticker, name, instrument_type, updated_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(ticker)
            .bind(name)
            .bind(instrument_type.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to insert metadata for {}: {}", ticker, e);
                DatabaseError::QueryError(format!("Failed to insert metadata: {}", e))
            })?;
        }

        debug!("Cached metadata: {} -> {} ({})", ticker, name, instrument_type);
        Ok(())
    }

    /// Get every cached metadata row, newest first
    pub async fn list_all(&self) -> Result<Vec<TickerMetadataRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, TickerMetadataRecord>(
            "SELECT * FROM ticker_metadata ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list metadata: {}", e);
            DatabaseError::QueryError(format!("Failed to list metadata: {}", e))
        })?;

        Ok(records)
    }
}
