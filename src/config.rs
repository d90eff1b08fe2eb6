use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (HTTP API and WebSocket share it)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// HS256 secret used to verify bearer tokens
    pub jwt_secret: Option<String>,

    /// Database URL
    pub db_url: Option<String>,

    /// Quiet period before a document's merged state is written back
    #[serde(default = "default_persistence_debounce_ms")]
    pub persistence_debounce_ms: u64,

    /// Lifetime of presence and socket tracking entries
    #[serde(default = "default_presence_ttl_secs")]
    pub presence_ttl_secs: u64,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Per-document broadcast buffer; slow receivers past this are told to resync
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// Role (JWT `roles` claim) granting access to the admin endpoints
    #[serde(default = "default_admin_role")]
    pub admin_role: String,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                config.validate()?;
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Check the settings the service cannot start without
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.jwt_secret {
            Some(secret) if !secret.is_empty() => {}
            _ => return Err(ConfigError::Missing("JWT_SECRET")),
        }
        if self.db_url.is_none() && !self.is_development() {
            return Err(ConfigError::Missing("DB_URL"));
        }
        if self.persistence_debounce_ms == 0 {
            return Err(ConfigError::Invalid("PERSISTENCE_DEBOUNCE_MS must be greater than zero"));
        }
        if self.presence_ttl_secs == 0 {
            return Err(ConfigError::Invalid("PRESENCE_TTL_SECS must be greater than zero"));
        }
        if self.heartbeat_interval_secs == 0 || self.heartbeat_interval_secs >= self.presence_ttl_secs {
            return Err(ConfigError::Invalid(
                "HEARTBEAT_INTERVAL_SECS must be non-zero and shorter than PRESENCE_TTL_SECS",
            ));
        }
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::Invalid("BROADCAST_CAPACITY must be greater than zero"));
        }
        Ok(())
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn persistence_debounce(&self) -> Duration {
        Duration::from_millis(self.persistence_debounce_ms)
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            service_name: default_service_name(),
            jwt_secret: None,
            db_url: None,
            persistence_debounce_ms: default_persistence_debounce_ms(),
            presence_ttl_secs: default_presence_ttl_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            broadcast_capacity: default_broadcast_capacity(),
            admin_role: default_admin_role(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
    #[error("Required setting {0} is not set")]
    Missing(&'static str),
    #[error("Invalid setting: {0}")]
    Invalid(&'static str),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "colabri-collab".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_persistence_debounce_ms() -> u64 {
    10_000
}

fn default_presence_ttl_secs() -> u64 {
    60
}

fn default_heartbeat_interval_secs() -> u64 {
    20
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_admin_role() -> String {
    "Colabri-CloudAdmin".to_string()
}
