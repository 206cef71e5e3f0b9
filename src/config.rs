use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Runtime configuration for the folio service
#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub api_key: String,
    pub price_ttl: Duration,
    pub metadata_ttl: Duration,
    pub provider_timeout: Duration,
    pub provider_requests_per_minute: u32,
}

impl AppConfig {
    /// Default configuration suitable for local development
    pub fn default() -> AppConfig {
        AppConfig {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3000),
            database_url: "sqlite://data/folio.db".to_string(),
            api_key: String::new(),
            price_ttl: Duration::from_secs(300),
            metadata_ttl: Duration::from_secs(24 * 60 * 60),
            provider_timeout: Duration::from_secs(5),
            provider_requests_per_minute: 8,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> AppConfig {
        let mut config = AppConfig::default();

        if let Ok(addr) = std::env::var("FOLIO_BIND_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(value) => {
                    config.bind_addr = value;
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse FOLIO_BIND_ADDR '{}': {}, using default: {}",
                        addr,
                        e,
                        config.bind_addr
                    );
                }
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                config.database_url = url;
            }
        }

        if let Ok(key) = std::env::var("TWELVE_DATA_API_KEY") {
            config.api_key = key;
        }

        if let Ok(ttl) = std::env::var("PRICE_TTL_SECONDS") {
            match ttl.parse::<u64>() {
                Ok(value) if value > 0 => {
                    config.price_ttl = Duration::from_secs(value);
                }
                Ok(value) => {
                    tracing::warn!(
                        "Invalid PRICE_TTL_SECONDS value: {} (must be positive), using default: {}s",
                        value,
                        config.price_ttl.as_secs()
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse PRICE_TTL_SECONDS '{}': {}, using default: {}s",
                        ttl,
                        e,
                        config.price_ttl.as_secs()
                    );
                }
            }
        }

        if let Ok(ttl) = std::env::var("METADATA_TTL_SECONDS") {
            match ttl.parse::<u64>() {
                Ok(value) if value > 0 => {
                    config.metadata_ttl = Duration::from_secs(value);
                }
                Ok(value) => {
                    tracing::warn!(
                        "Invalid METADATA_TTL_SECONDS value: {} (must be positive), using default: {}s",
                        value,
                        config.metadata_ttl.as_secs()
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse METADATA_TTL_SECONDS '{}': {}, using default: {}s",
                        ttl,
                        e,
                        config.metadata_ttl.as_secs()
                    );
                }
            }
        }

        if let Ok(timeout) = std::env::var("PROVIDER_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse::<u64>() {
                if value > 0 && value <= 60 {
                    config.provider_timeout = Duration::from_secs(value);
                }
            }
        }

        if let Ok(quota) = std::env::var("PROVIDER_REQUESTS_PER_MINUTE") {
            if let Ok(value) = quota.parse::<u32>() {
                if value > 0 && value <= 1000 {
                    config.provider_requests_per_minute = value;
                }
            }
        }

        config
    }
}
