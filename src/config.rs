//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::time::Duration;

use crate::events::publisher::KafkaConfig;
use crate::services::orchestrator::OrchestratorConfig;
use crate::workers::sweeper::SweeperConfig;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub kafka: KafkaConfig,
    pub services: ServicesConfig,
    pub payments: PaymentsConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64, // seconds
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub max_connections: u32,
}

/// Cross-service endpoints
#[derive(Debug, Clone)]
pub struct ServicesConfig {
    pub order_service_url: String,
    pub course_service_url: String,
    pub fx_api_url: String,
}

/// Payment lifecycle tuning
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub expiry_secs: u64,
    pub sweeper_interval_secs: u64,
    pub sweeper_batch_limit: i64,
    pub default_success_url: String,
    pub default_cancel_url: String,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingVariable(String),
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            kafka: kafka_from_env(),
            services: ServicesConfig::from_env(),
            payments: PaymentsConfig::from_env()?,
            logging: LoggingConfig::from_env(),
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.cache.validate()?;
        self.payments.validate()?;
        if self.kafka.brokers.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "KAFKA_BROKERS cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            payment_expiry: Duration::from_secs(self.payments.expiry_secs),
            default_success_url: self.payments.default_success_url.clone(),
            default_cancel_url: self.payments.default_cancel_url.clone(),
            ..Default::default()
        }
    }

    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.payments.sweeper_interval_secs),
            batch_limit: self.payments.sweeper_batch_limit,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("PORT cannot be 0".to_string()));
        }
        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue("HOST cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }
        Ok(())
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: env::var("REDIS_URL")
                .map_err(|_| ConfigError::MissingVariable("REDIS_URL".to_string()))?,
            max_connections: env::var("REDIS_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("REDIS_MAX_CONNECTIONS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::InvalidValue("REDIS_URL".to_string()));
        }
        Ok(())
    }
}

fn kafka_from_env() -> KafkaConfig {
    KafkaConfig {
        brokers: env::var("KAFKA_BROKERS").unwrap_or_else(|_| "127.0.0.1:9092".to_string()),
        group_id: env::var("KAFKA_GROUP_ID").unwrap_or_else(|_| "payment-service".to_string()),
        message_timeout_ms: env::var("KAFKA_MESSAGE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5000),
    }
}

impl ServicesConfig {
    pub fn from_env() -> Self {
        ServicesConfig {
            order_service_url: env::var("ORDER_SERVICE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8001".to_string()),
            course_service_url: env::var("COURSE_SERVICE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8002".to_string()),
            fx_api_url: env::var("FX_API_URL")
                .unwrap_or_else(|_| "https://api.frankfurter.app".to_string()),
        }
    }
}

impl PaymentsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(PaymentsConfig {
            expiry_secs: env::var("PAYMENT_EXPIRY_SECS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PAYMENT_EXPIRY_SECS".to_string()))?,
            sweeper_interval_secs: env::var("SWEEPER_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SWEEPER_INTERVAL_SECS".to_string()))?,
            sweeper_batch_limit: env::var("SWEEPER_BATCH_LIMIT")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SWEEPER_BATCH_LIMIT".to_string()))?,
            default_success_url: env::var("PAYMENT_SUCCESS_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3000/payments/success".to_string()),
            default_cancel_url: env::var("PAYMENT_CANCEL_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3000/payments/cancel".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expiry_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_EXPIRY_SECS cannot be 0".to_string(),
            ));
        }
        if self.sweeper_batch_limit <= 0 {
            return Err(ConfigError::InvalidValue(
                "SWEEPER_BATCH_LIMIT must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        LoggingConfig {
            level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_rejects_port_zero() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn database_config_rejects_inverted_pool_bounds() {
        let config = DatabaseConfig {
            url: "postgres://localhost/payments".to_string(),
            max_connections: 5,
            min_connections: 10,
            connection_timeout: 30,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn payments_config_rejects_zero_expiry() {
        let config = PaymentsConfig {
            expiry_secs: 0,
            sweeper_interval_secs: 60,
            sweeper_batch_limit: 50,
            default_success_url: String::new(),
            default_cancel_url: String::new(),
        };
        assert!(config.validate().is_err());
    }
}
