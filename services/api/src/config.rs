use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
///
/// Room-server credentials are mandatory: a missing key or secret fails here,
/// at process start, never per request.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub room_server_url: String,
    pub room_server_api_key: String,
    pub room_server_api_secret: String,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let room_server_url =
            std::env::var("ROOM_SERVER_URL").unwrap_or_else(|_| "ws://localhost:7880".to_string());
        if !room_server_url.starts_with("ws://") && !room_server_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(
                "ROOM_SERVER_URL".to_string(),
                "must start with ws:// or wss://".to_string(),
            ));
        }

        let room_server_api_key = std::env::var("ROOM_SERVER_API_KEY")
            .map_err(|_| ConfigError::MissingVar("ROOM_SERVER_API_KEY".to_string()))?;
        let room_server_api_secret = std::env::var("ROOM_SERVER_API_SECRET")
            .map_err(|_| ConfigError::MissingVar("ROOM_SERVER_API_SECRET".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            database_url,
            room_server_url,
            room_server_api_key,
            room_server_api_secret,
            log_level,
        })
    }
}
