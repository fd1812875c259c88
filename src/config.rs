//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;

use bigdecimal::{BigDecimal, Zero};

use crate::payments::error::PaymentError;
use crate::payments::factory::PaymentFactoryConfig;
use crate::payments::providers::{FlutterwaveConfig, PaystackConfig};
use crate::payments::types::PaymentGateway;
use crate::services::payment_orchestrator::OrchestratorConfig;
use crate::services::reconciliation::ReconciliationPolicy;
use crate::workers::pending_sweeper::PendingSweeperConfig;
use crate::workers::webhook_retry::WebhookRetryConfig;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageBackend,
    /// Present when `storage` is Postgres.
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub payments: PaymentsConfig,
    pub reconciliation: ReconciliationConfig,
    pub workers: WorkerConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local store; state is lost on restart.
    Memory,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
    pub run_migrations: bool,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Gateway selection and credentials. Credentials are only read for enabled
/// hosted gateways.
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub gateways: PaymentFactoryConfig,
    pub paystack: Option<PaystackConfig>,
    pub flutterwave: Option<FlutterwaveConfig>,
}

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub policy: ReconciliationPolicy,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub pending_sweeper: PendingSweeperConfig,
    pub webhook_retry: WebhookRetryConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let storage = StorageBackend::from_env()?;
        let database = match storage {
            StorageBackend::Postgres => Some(DatabaseConfig::from_env()?),
            StorageBackend::Memory => None,
        };

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            storage,
            database,
            logging: LoggingConfig::from_env()?,
            payments: PaymentsConfig::from_env()?,
            reconciliation: ReconciliationConfig::from_env(),
            workers: WorkerConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.payments.validate()?;
        self.reconciliation.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl StorageBackend {
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var("STORAGE")
            .unwrap_or_else(|_| "postgres".to_string())
            .trim()
            .to_lowercase()
            .as_str()
        {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(ConfigError::InvalidValue(format!("STORAGE={}", other))),
        }
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
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
            run_migrations: env::var("RUN_MIGRATIONS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("RUN_MIGRATIONS".to_string()))?,
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

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl PaymentsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let gateways = PaymentFactoryConfig::from_env()?;
        let paystack = if gateways.is_enabled(PaymentGateway::Paystack) {
            Some(PaystackConfig::from_env()?)
        } else {
            None
        };
        let flutterwave = if gateways.is_enabled(PaymentGateway::Flutterwave) {
            Some(FlutterwaveConfig::from_env()?)
        } else {
            None
        };

        Ok(PaymentsConfig {
            gateways,
            paystack,
            flutterwave,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, base_url) in [
            ("PAYSTACK_BASE_URL", self.paystack.as_ref().map(|c| &c.base_url)),
            (
                "FLUTTERWAVE_BASE_URL",
                self.flutterwave.as_ref().map(|c| &c.base_url),
            ),
        ] {
            if let Some(url) = base_url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(ConfigError::InvalidValue(format!(
                        "{} must be a valid URL",
                        name
                    )));
                }
            }
        }

        if let Some(flutterwave) = &self.flutterwave {
            if flutterwave.webhook_secret.is_none() && !flutterwave.allow_legacy_hash {
                return Err(ConfigError::MissingVariable(
                    "FLUTTERWAVE_WEBHOOK_SECRET".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Self {
        ReconciliationConfig {
            policy: ReconciliationPolicy::from_env(),
            orchestrator: OrchestratorConfig::from_env(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let pct = &self.policy.minimum_deposit_percentage;
        if *pct < BigDecimal::zero() || *pct > BigDecimal::from(100) {
            return Err(ConfigError::InvalidValue(
                "MIN_DEPOSIT_PERCENTAGE must be between 0 and 100".to_string(),
            ));
        }

        if self.policy.amount_tolerance < BigDecimal::zero() {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_AMOUNT_TOLERANCE cannot be negative".to_string(),
            ));
        }

        if self.orchestrator.pending_expiry.is_zero() {
            return Err(ConfigError::InvalidValue(
                "PENDING_PAYMENT_EXPIRY_MINUTES cannot be 0".to_string(),
            ));
        }

        if self.orchestrator.default_currency.len() != 3 {
            return Err(ConfigError::InvalidValue(
                "DEFAULT_CURRENCY must be an ISO 4217 code".to_string(),
            ));
        }

        Ok(())
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(WorkerConfig {
            enabled: env::var("WORKERS_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("WORKERS_ENABLED".to_string()))?,
            pending_sweeper: PendingSweeperConfig::from_env(),
            webhook_retry: WebhookRetryConfig::from_env(),
        })
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<PaymentError> for ConfigError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::ValidationError {
                field: Some(field),
                message,
            } if message.contains("required") => ConfigError::MissingVariable(field),
            PaymentError::ValidationError {
                field: Some(field),
                ..
            } => ConfigError::InvalidValue(field),
            other => ConfigError::ValidationFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconciliation_defaults_are_valid() {
        let config = ReconciliationConfig {
            policy: ReconciliationPolicy::default(),
            orchestrator: OrchestratorConfig::default(),
        };
        assert!(config.validate().is_ok());
        assert_eq!(
            config.orchestrator.pending_expiry,
            Duration::from_secs(30 * 60)
        );
    }

    #[test]
    fn test_deposit_percentage_out_of_range() {
        let config = ReconciliationConfig {
            policy: ReconciliationPolicy {
                minimum_deposit_percentage: BigDecimal::from(150),
                ..ReconciliationPolicy::default()
            },
            orchestrator: OrchestratorConfig::default(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_flutterwave_requires_webhook_trust() {
        let config = PaymentsConfig {
            gateways: PaymentFactoryConfig::default(),
            paystack: None,
            flutterwave: Some(FlutterwaveConfig {
                secret_key: "FLWSECK_TEST".to_string(),
                ..FlutterwaveConfig::default()
            }),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingVariable(_))
        ));
    }

    #[test]
    fn test_payment_error_maps_to_missing_variable() {
        let err: ConfigError = PaymentError::ValidationError {
            message: "PAYSTACK_SECRET_KEY environment variable is required".to_string(),
            field: Some("PAYSTACK_SECRET_KEY".to_string()),
        }
        .into();
        assert!(matches!(err, ConfigError::MissingVariable(v) if v == "PAYSTACK_SECRET_KEY"));
    }
}
