use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use folio::application::services::ledger::PositionLedger;
use folio::application::services::market_data::{MarketDataService, SystemClock};
use folio::config::AppConfig;
use folio::domain::entities::holding::InstrumentType;
use folio::domain::errors::LedgerError;
use folio::infrastructure::twelve_data_client::{TwelveDataClient, TwelveDataConfig};
use folio::persistence::models::{CreateHolding, CreateUser, HoldingRecord, UpdateHolding};
use folio::persistence::repository::{HoldingRepository, MetadataRepository, UserRepository};
use folio::persistence::{init_database, DbPool};

#[derive(Clone)]
struct AppState {
    pool: DbPool,
    users: UserRepository,
    holdings: HoldingRepository,
    ledger: Arc<PositionLedger>,
    market_data: Arc<MarketDataService>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "folio=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Folio holdings server starting...");

    let config = AppConfig::from_env();
    if config.api_key.is_empty() {
        warn!("TWELVE_DATA_API_KEY is not set; provider lookups will fail until cached data exists");
    }

    let pool = init_database(&config.database_url).await?;

    let provider = Arc::new(TwelveDataClient::new(TwelveDataConfig::new(
        config.api_key.clone(),
        config.provider_timeout,
        config.provider_requests_per_minute,
    )));
    let market_data = Arc::new(MarketDataService::new(
        provider,
        MetadataRepository::new(pool.clone()),
        Arc::new(SystemClock),
        config.price_ttl,
        config.metadata_ttl,
    ));
    let ledger = Arc::new(PositionLedger::new(
        HoldingRepository::new(pool.clone()),
        market_data.clone(),
    ));

    let state = AppState {
        users: UserRepository::new(pool.clone()),
        holdings: HoldingRepository::new(pool.clone()),
        pool,
        ledger,
        market_data,
    };

    let app = Router::new()
        .route("/", get(|| async { "Folio holdings server is running!" }))
        .route("/health", get(health_check))
        .route("/api/users", get(list_users).post(create_user))
        .route(
            "/api/users/:user_id",
            post(verify_password).put(update_user).delete(delete_user),
        )
        .route(
            "/api/holdings/:user_id",
            get(list_holdings).post(create_holding),
        )
        .route(
            "/api/holdings/:user_id/:record_id",
            put(update_holding).delete(delete_holding),
        )
        .route("/api/holdings/:user_id/buy", post(buy_holding))
        .route("/api/holdings/:user_id/sell", post(sell_holding))
        .route("/api/stock/price/:ticker", get(get_stock_price))
        .route("/api/stock/quote/:ticker", get(get_stock_quote))
        .route("/api/cache/refresh/:ticker", post(refresh_cache))
        .route("/api/cache/status", get(cache_status))
        .with_state(state);

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let server = axum::serve(listener, app);

    let shutdown_signal = async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Server started successfully. Press Ctrl+C to stop.");
    server.with_graceful_shutdown(shutdown_signal).await?;

    info!("Server shut down gracefully");
    Ok(())
}

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn database_error(e: impl std::fmt::Display) -> ApiResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": "Database error", "error": e.to_string() })),
    )
}

fn bad_request(message: &str) -> ApiResponse {
    (StatusCode::BAD_REQUEST, Json(json!({ "message": message })))
}

/// Map ledger failures onto the API's status codes and guidance messages
fn ledger_error_response(err: LedgerError) -> ApiResponse {
    match &err {
        LedgerError::Store(e) => database_error(e),
        LedgerError::PositionNotFound => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": err.to_string() })),
        ),
        LedgerError::ManualPriceRequired => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "message": err.to_string(),
                "error": "Manual price input required for currency/gold"
            })),
        ),
        LedgerError::NameUnavailable => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "message": err.to_string(),
                "error": "Name detection service unavailable"
            })),
        ),
        LedgerError::PriceUnavailable => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "message": err.to_string(),
                "error": "Price detection service unavailable"
            })),
        ),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": err.to_string() })),
        ),
    }
}

/// A price field may arrive as a number, a numeric string, or an empty
/// string; empty and zero mean "resolve it for me".
fn optional_price(value: &Option<serde_json::Value>) -> Option<f64> {
    match value {
        Some(v) => {
            if let Some(n) = v.as_f64() {
                Some(n)
            } else if let Some(s) = v.as_str() {
                let s = s.trim();
                if s.is_empty() {
                    None
                } else {
                    s.parse().ok()
                }
            } else {
                None
            }
        }
        None => None,
    }
}

fn parse_instrument_type(raw: Option<&str>) -> Result<Option<InstrumentType>, ApiResponse> {
    match raw.map(str::trim) {
        Some(s) if !s.is_empty() => match s.parse() {
            Ok(instrument_type) => Ok(Some(instrument_type)),
            Err(e) => Err(bad_request(&e)),
        },
        _ => Ok(None),
    }
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    Json(json!({ "status": "running", "database": database_ok }))
}

// ---- Users ----

#[derive(Deserialize)]
struct CreateUserRequest {
    username: Option<String>,
    password: Option<String>,
    avatar: Option<String>,
}

#[derive(Deserialize)]
struct VerifyPasswordRequest {
    password: Option<String>,
}

async fn list_users(State(state): State<AppState>) -> ApiResponse {
    match state.users.list().await {
        Ok(users) => (StatusCode::OK, Json(json!(users))),
        Err(e) => database_error(e),
    }
}

async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> ApiResponse {
    let (username, password) = match (payload.username, payload.password) {
        (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
            (username, password)
        }
        _ => return bad_request("Username and password are required"),
    };

    match state.users.find_by_username(&username).await {
        Ok(Some(_)) => {
            return (
                StatusCode::CONFLICT,
                Json(json!({ "message": "Username already exists" })),
            )
        }
        Ok(None) => {}
        Err(e) => return database_error(e),
    }

    match state
        .users
        .create(CreateUser {
            username,
            password,
            avatar: payload.avatar,
        })
        .await
    {
        Ok(user) => (
            StatusCode::CREATED,
            Json(json!({
                "message": "User created successfully",
                "user_id": user.user_id,
                "username": user.username
            })),
        ),
        Err(e) => database_error(e),
    }
}

async fn verify_password(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(payload): Json<VerifyPasswordRequest>,
) -> ApiResponse {
    let password = match payload.password {
        Some(password) if !password.is_empty() => password,
        _ => return bad_request("Password is required"),
    };

    match state.users.get(user_id).await {
        Ok(Some(user)) => {
            if UserRepository::password_matches(&user, &password) {
                (
                    StatusCode::OK,
                    Json(json!({
                        "message": "Password is correct",
                        "user_id": user.user_id,
                        "username": user.username
                    })),
                )
            } else {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "message": "Password is incorrect" })),
                )
            }
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "User not found" })),
        ),
        Err(e) => database_error(e),
    }
}

async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(payload): Json<CreateUserRequest>,
) -> ApiResponse {
    let (username, password) = match (payload.username, payload.password) {
        (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
            (username, password)
        }
        _ => return bad_request("Username and password are required"),
    };

    match state
        .users
        .update(user_id, &username, &password, payload.avatar.as_deref())
        .await
    {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({ "message": "User updated successfully" })),
        ),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "User not found" })),
        ),
        Err(e) => database_error(e),
    }
}

async fn delete_user(State(state): State<AppState>, Path(user_id): Path<i64>) -> ApiResponse {
    match state.users.delete(user_id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({ "message": "User deleted successfully" })),
        ),
        Ok(false) => (
            StatusCode::OK,
            Json(json!({ "message": "User not found or already deleted" })),
        ),
        Err(e) => database_error(e),
    }
}

// ---- Holdings CRUD ----

#[derive(Deserialize)]
struct HoldingFieldsRequest {
    instrument_type: Option<String>,
    ticker: Option<String>,
    name: Option<String>,
    avg_cost: Option<f64>,
    quantity: Option<f64>,
}

async fn list_holdings(State(state): State<AppState>, Path(user_id): Path<i64>) -> ApiResponse {
    match state.holdings.list_for_user(user_id).await {
        Ok(records) => {
            let holdings: Vec<_> = records.into_iter().map(HoldingRecord::into_holding).collect();
            (StatusCode::OK, Json(json!(holdings)))
        }
        Err(e) => database_error(e),
    }
}

async fn create_holding(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(payload): Json<HoldingFieldsRequest>,
) -> ApiResponse {
    let (instrument_type, ticker, name, avg_cost, quantity) = match (
        payload.instrument_type,
        payload.ticker,
        payload.name,
        payload.avg_cost,
        payload.quantity,
    ) {
        (Some(t), Some(ticker), Some(name), Some(avg_cost), Some(quantity)) => {
            (t, ticker, name, avg_cost, quantity)
        }
        _ => return bad_request("All fields are required"),
    };

    let instrument_type = match parse_instrument_type(Some(&instrument_type)) {
        Ok(Some(instrument_type)) => instrument_type,
        Ok(None) => return bad_request("All fields are required"),
        Err(response) => return response,
    };

    match state.holdings.find_by_ticker(user_id, &ticker).await {
        Ok(Some(_)) => {
            return (
                StatusCode::CONFLICT,
                Json(json!({ "message": "Holding already exists for this ticker" })),
            )
        }
        Ok(None) => {}
        Err(e) => return database_error(e),
    }

    match state
        .holdings
        .insert(CreateHolding {
            user_id,
            instrument_type,
            ticker,
            name,
            avg_cost,
            quantity,
        })
        .await
    {
        Ok(record) => (
            StatusCode::CREATED,
            Json(json!({
                "message": "Holding added successfully",
                "record_id": record.record_id
            })),
        ),
        Err(e) => database_error(e),
    }
}

async fn update_holding(
    State(state): State<AppState>,
    Path((user_id, record_id)): Path<(i64, i64)>,
    Json(payload): Json<HoldingFieldsRequest>,
) -> ApiResponse {
    let (instrument_type, ticker, name, avg_cost, quantity) = match (
        payload.instrument_type,
        payload.ticker,
        payload.name,
        payload.avg_cost,
        payload.quantity,
    ) {
        (Some(t), Some(ticker), Some(name), Some(avg_cost), Some(quantity)) => {
            (t, ticker, name, avg_cost, quantity)
        }
        _ => return bad_request("All fields are required"),
    };

    let instrument_type = match parse_instrument_type(Some(&instrument_type)) {
        Ok(Some(instrument_type)) => instrument_type,
        Ok(None) => return bad_request("All fields are required"),
        Err(response) => return response,
    };

    match state
        .holdings
        .update_fields(
            user_id,
            record_id,
            UpdateHolding {
                instrument_type,
                ticker,
                name,
                avg_cost,
                quantity,
            },
        )
        .await
    {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({ "message": "Holding updated successfully" })),
        ),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "Holding not found" })),
        ),
        Err(e) => database_error(e),
    }
}

async fn delete_holding(
    State(state): State<AppState>,
    Path((user_id, record_id)): Path<(i64, i64)>,
) -> ApiResponse {
    match state.holdings.delete_for_user(user_id, record_id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({ "message": "Holding deleted successfully" })),
        ),
        Ok(false) => (
            StatusCode::OK,
            Json(json!({ "message": "Holding not found or already deleted" })),
        ),
        Err(e) => database_error(e),
    }
}

// ---- Buy / Sell ----

#[derive(Deserialize)]
struct BuyRequest {
    ticker: Option<String>,
    instrument_type: Option<String>,
    name: Option<String>,
    price: Option<serde_json::Value>,
    quantity: Option<f64>,
}

#[derive(Deserialize)]
struct SellRequest {
    ticker: Option<String>,
    price: Option<serde_json::Value>,
    quantity: Option<f64>,
}

async fn buy_holding(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(payload): Json<BuyRequest>,
) -> ApiResponse {
    let (ticker, quantity) = match (payload.ticker, payload.quantity) {
        (Some(ticker), Some(quantity)) if !ticker.trim().is_empty() => (ticker, quantity),
        _ => return bad_request("Ticker and quantity are required"),
    };

    let instrument_type = match parse_instrument_type(payload.instrument_type.as_deref()) {
        Ok(instrument_type) => instrument_type,
        Err(response) => return response,
    };
    let price = optional_price(&payload.price);

    match state
        .ledger
        .buy(user_id, &ticker, quantity, price, instrument_type, payload.name)
        .await
    {
        Ok(outcome) if outcome.created => (
            StatusCode::CREATED,
            Json(json!({
                "message": "New holding created successfully",
                "record_id": outcome.record_id,
                "quantity": outcome.quantity,
                "price": outcome.avg_cost,
                "used_price": outcome.price_used,
                "detected_type": outcome.instrument_type
            })),
        ),
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "message": "Holdings updated successfully",
                "record_id": outcome.record_id,
                "new_quantity": outcome.quantity,
                "new_avg_price": outcome.avg_cost,
                "used_price": outcome.price_used,
                "detected_type": outcome.instrument_type
            })),
        ),
        Err(e) => ledger_error_response(e),
    }
}

async fn sell_holding(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(payload): Json<SellRequest>,
) -> ApiResponse {
    let (ticker, quantity) = match (payload.ticker, payload.quantity) {
        (Some(ticker), Some(quantity)) if !ticker.trim().is_empty() => (ticker, quantity),
        _ => return bad_request("Ticker and quantity are required"),
    };

    let price = optional_price(&payload.price);

    match state.ledger.sell(user_id, &ticker, quantity, price).await {
        Ok(outcome) if outcome.closed => (
            StatusCode::OK,
            Json(json!({
                "message": "Holding sold completely and removed",
                "sold_quantity": outcome.sold_quantity,
                "remaining_quantity": 0,
                "sell_price": outcome.price_used,
                "sell_value": outcome.sale_value
            })),
        ),
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "message": "Holdings sold successfully",
                "record_id": outcome.record_id,
                "sold_quantity": outcome.sold_quantity,
                "remaining_quantity": outcome.remaining_quantity,
                "sell_price": outcome.price_used,
                "sell_value": outcome.sale_value
            })),
        ),
        Err(e) => ledger_error_response(e),
    }
}

// ---- Market data ----

async fn get_stock_price(State(state): State<AppState>, Path(ticker): Path<String>) -> ApiResponse {
    match state.market_data.resolve_price(&ticker).await {
        Ok(price) => (
            StatusCode::OK,
            Json(json!({ "ticker": ticker.trim().to_uppercase(), "price": price })),
        ),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": e.to_string() })),
        ),
    }
}

async fn get_stock_quote(State(state): State<AppState>, Path(ticker): Path<String>) -> ApiResponse {
    match state.market_data.resolve_metadata(&ticker).await {
        Ok(metadata) => (StatusCode::OK, Json(json!(metadata))),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": e.to_string() })),
        ),
    }
}

async fn refresh_cache(State(state): State<AppState>, Path(ticker): Path<String>) -> ApiResponse {
    match state.market_data.refresh_metadata(&ticker).await {
        Ok(metadata) => (
            StatusCode::OK,
            Json(json!({
                "message": format!("Cache refreshed successfully for {}", metadata.ticker),
                "data": metadata
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "Failed to refresh cache", "error": e.to_string() })),
        ),
    }
}

async fn cache_status(State(state): State<AppState>) -> ApiResponse {
    match state.market_data.cache_snapshot().await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(json!({
                "message": "Cache status retrieved successfully",
                "cached_tickers": snapshot.metadata.len(),
                "data": snapshot
            })),
        ),
        Err(e) => database_error(e),
    }
}
