//! Engine configuration
//!
//! All configuration is resolved once from the environment into an
//! [`EngineConfig`] value and passed into the orchestrator at construction.
//! Nothing here is ambient or global, so multiple pipelines can run in the
//! same process without interference.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default upstream API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.open.fec.gov/v1";

/// Default records per page. The provider caps `per_page` at 100.
pub const DEFAULT_PER_PAGE: u32 = 100;

/// Provider maximum for `per_page`.
pub const MAX_PER_PAGE: u32 = 100;

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default retry attempts for transient upstream failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/fecsync";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
}

/// Upstream API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the upstream API
    pub base_url: String,
    /// Resolved API key, sent as the `X-Api-Key` header
    pub api_key: String,
    /// Page size for paginated requests (bounded by the provider maximum)
    pub per_page: u32,
    /// Optional cap on pages fetched per run; None means run to exhaustion
    pub max_pages: Option<u32>,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

/// Retry/backoff policy for transient upstream failures
///
/// Policy, not structure: attempt count and base delay are configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per request before the error becomes terminal
    pub max_retries: u32,
    /// Base delay for exponential backoff; attempt n waits base * 2^(n-1)
    pub base_delay_ms: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl EngineConfig {
    /// Load configuration from environment and defaults
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = EngineConfig {
            api: ApiConfig {
                base_url: std::env::var("FEC_API_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
                api_key: std::env::var("FEC_API_KEY").unwrap_or_default(),
                per_page: std::env::var("FECSYNC_PER_PAGE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_PER_PAGE),
                max_pages: std::env::var("FECSYNC_MAX_PAGES")
                    .ok()
                    .and_then(|s| s.parse().ok()),
                request_timeout_secs: std::env::var("FECSYNC_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            },
            retry: RetryConfig {
                max_retries: std::env::var("FECSYNC_MAX_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_MAX_RETRIES),
                base_delay_ms: std::env::var("FECSYNC_RETRY_BASE_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS),
            },
            database: DatabaseConfig::from_env()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api.base_url.is_empty() {
            anyhow::bail!("FEC_API_BASE_URL cannot be empty");
        }

        if self.api.api_key.is_empty() {
            anyhow::bail!("Missing FEC_API_KEY in environment");
        }

        if self.api.per_page == 0 || self.api.per_page > MAX_PER_PAGE {
            anyhow::bail!(
                "FECSYNC_PER_PAGE must be between 1 and {}, got {}",
                MAX_PER_PAGE,
                self.api.per_page
            );
        }

        if self.api.max_pages == Some(0) {
            anyhow::bail!("FECSYNC_MAX_PAGES must be greater than 0 when set");
        }

        if self.retry.max_retries == 0 {
            anyhow::bail!("FECSYNC_MAX_RETRIES must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
        }

        Ok(())
    }
}

impl ApiConfig {
    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl RetryConfig {
    /// Backoff delay before retrying the given 1-based attempt
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << exp))
    }
}

impl DatabaseConfig {
    /// Load warehouse connection parameters from the environment. Standalone
    /// so control-table inspection does not demand an API credential.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
            connect_timeout_secs: std::env::var("DATABASE_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
        };

        if config.url.is_empty() {
            anyhow::bail!("DATABASE_URL cannot be empty");
        }
        if config.max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
        }

        Ok(config)
    }

    /// Open a connection pool against the configured warehouse
    pub async fn connect(&self) -> anyhow::Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout_secs))
            .connect(&self.url)
            .await?;
        Ok(pool)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            retry: RetryConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: String::new(),
            per_page: DEFAULT_PER_PAGE,
            max_pages: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}
