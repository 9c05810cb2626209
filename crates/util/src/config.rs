use std::{env, fmt, net::SocketAddr};

use super::{database_url, server_bind_address};

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    /// Minimum motivation letter length enforced on new applications.
    pub min_letter_len: usize,
    /// Whether a rejected applicant may submit to the same campaign again.
    pub allow_reapply: bool,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let database_url = database_url();

        let min_letter_len = match env::var("APP_MIN_LETTER_LEN") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidMinLetterLen(raw))?,
            Err(_) => 50,
        };

        let allow_reapply = match env::var("APP_ALLOW_REAPPLY") {
            Ok(raw) => match raw.as_str() {
                "1" | "true" => true,
                "0" | "false" => false,
                _ => return Err(ConfigError::InvalidReapplyFlag(raw)),
            },
            Err(_) => false,
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            min_letter_len,
            allow_reapply,
        })
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    InvalidMinLetterLen(String),
    InvalidReapplyFlag(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::InvalidMinLetterLen(value) => write!(
                f,
                "APP_MIN_LETTER_LEN must be a non-negative integer (got {value})"
            ),
            Self::InvalidReapplyFlag(value) => write!(
                f,
                "APP_ALLOW_REAPPLY must be one of '1', 'true', '0', or 'false' (got {value})"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
