//! ETL configuration
//!
//! Built once at process start from environment variables (a `.env` file is
//! honoured) and passed down explicitly. Nothing in the engine reads the
//! environment on its own.

use crate::entities::EntityKind;
use award_etl_common::coerce::to_bool;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

pub const DEFAULT_BASE_URL: &str = "https://api.fwc.gov.au/api/v1";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EtlConfig {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub state: StateConfig,
    pub orchestrator: OrchestratorConfig,
}

/// Source API client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    /// Subscription key sent with every request
    #[serde(skip_serializing)]
    pub api_key: String,
    pub timeout_secs: u64,
    /// Request ceiling per rolling second
    pub rate_limit_per_sec: u32,
    /// Total attempts per request, including the first
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub page_size: u32,
    pub max_pages: Option<u32>,
}

/// Destination store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(skip_serializing)]
    pub url: String,
    pub max_connections: u32,
    pub batch_size: usize,
    pub load_retry_attempts: u32,
    pub load_retry_delay_ms: u64,
    /// Archive each raw API batch into `raw_api_responses`
    pub archive_raw_responses: bool,
    /// Archive each transformed batch after loading
    pub archive_loaded_batches: bool,
}

/// Local job-state store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub database_path: PathBuf,
    pub stale_job_timeout_minutes: i64,
}

/// Fan-out settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Parent identifiers processed at once; 1 keeps the loop sequential
    pub parent_concurrency: usize,
    pub child_entities: Vec<EntityKind>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            timeout_secs: 30,
            rate_limit_per_sec: 10,
            retry_attempts: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 10_000,
            page_size: 100,
            max_pages: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/awards.db?mode=rwc".to_string(),
            max_connections: 5,
            batch_size: 1_000,
            load_retry_attempts: 3,
            load_retry_delay_ms: 500,
            archive_raw_responses: false,
            archive_loaded_batches: false,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/state.db"),
            stale_job_timeout_minutes: 120,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            parent_concurrency: 1,
            child_entities: EntityKind::CHILDREN.to_vec(),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Boolean flags accept the same spellings as record fields (`1`, `yes`, `on`, ...)
fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| to_bool(&serde_json::Value::String(v)))
        .unwrap_or(default)
}

impl EtlConfig {
    /// Load `.env` (if present) and then the process environment
    pub fn load() -> anyhow::Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(anyhow::anyhow!("Failed to read .env file: {e}"));
            }
        }
        Self::from_env()
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            api: ApiConfig::from_env(),
            database: DatabaseConfig::from_env(),
            state: StateConfig::from_env(),
            orchestrator: OrchestratorConfig::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.api.validate()?;
        self.database.validate()?;
        self.state.validate()?;
        self.orchestrator.validate()?;
        Ok(())
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env_or("FWC_API_BASE_URL", defaults.base_url),
            api_key: env_or("FWC_API_KEY", defaults.api_key),
            timeout_secs: env_or("API_TIMEOUT_SECS", defaults.timeout_secs),
            rate_limit_per_sec: env_or("API_RATE_LIMIT", defaults.rate_limit_per_sec),
            retry_attempts: env_or("API_RETRY_ATTEMPTS", defaults.retry_attempts),
            retry_base_delay_ms: env_or("API_RETRY_DELAY_MS", defaults.retry_base_delay_ms),
            retry_max_delay_ms: env_or("API_RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms),
            page_size: env_or("DEFAULT_PAGE_SIZE", defaults.page_size),
            max_pages: std::env::var("API_MAX_PAGES")
                .ok()
                .and_then(|v| v.trim().parse().ok()),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_key.trim().is_empty() {
            anyhow::bail!("FWC_API_KEY must be set");
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            anyhow::bail!("FWC_API_BASE_URL must be an http(s) URL, got '{}'", self.base_url);
        }
        if self.rate_limit_per_sec == 0 {
            anyhow::bail!("API_RATE_LIMIT must be greater than 0");
        }
        if self.retry_attempts == 0 {
            anyhow::bail!("API_RETRY_ATTEMPTS must be at least 1");
        }
        if self.page_size == 0 {
            anyhow::bail!("DEFAULT_PAGE_SIZE must be greater than 0");
        }
        if self.max_pages == Some(0) {
            anyhow::bail!("API_MAX_PAGES must be greater than 0 when set");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: env_or("DATABASE_URL", defaults.url),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", defaults.max_connections),
            batch_size: env_or("BATCH_SIZE", defaults.batch_size),
            load_retry_attempts: env_or("LOAD_RETRY_ATTEMPTS", defaults.load_retry_attempts),
            load_retry_delay_ms: env_or("LOAD_RETRY_DELAY_MS", defaults.load_retry_delay_ms),
            archive_raw_responses: env_flag(
                "ARCHIVE_RAW_RESPONSES",
                defaults.archive_raw_responses,
            ),
            archive_loaded_batches: env_flag(
                "ARCHIVE_LOADED_BATCHES",
                defaults.archive_loaded_batches,
            ),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.trim().is_empty() {
            anyhow::bail!("DATABASE_URL must be set");
        }
        if self.max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
        }
        if self.batch_size == 0 {
            anyhow::bail!("BATCH_SIZE must be greater than 0");
        }
        Ok(())
    }

    pub fn load_retry_delay(&self) -> Duration {
        Duration::from_millis(self.load_retry_delay_ms)
    }
}

impl StateConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_path: std::env::var("SQLITE_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            stale_job_timeout_minutes: env_or(
                "STALE_JOB_TIMEOUT_MINUTES",
                defaults.stale_job_timeout_minutes,
            ),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.stale_job_timeout_minutes <= 0 {
            anyhow::bail!("STALE_JOB_TIMEOUT_MINUTES must be greater than 0");
        }
        Ok(())
    }

    pub fn stale_job_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_job_timeout_minutes)
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let child_entities = match std::env::var("ETL_CHILD_ENTITIES") {
            Ok(list) if !list.trim().is_empty() => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<EntityKind>().map_err(anyhow::Error::from))
                .collect::<anyhow::Result<Vec<_>>>()?,
            _ => defaults.child_entities,
        };

        Ok(Self {
            parent_concurrency: env_or("ETL_PARENT_CONCURRENCY", defaults.parent_concurrency),
            child_entities,
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.parent_concurrency == 0 {
            anyhow::bail!("ETL_PARENT_CONCURRENCY must be greater than 0");
        }
        if let Some(parent) = self.child_entities.iter().find(|e| !e.is_child()) {
            anyhow::bail!("ETL_CHILD_ENTITIES cannot include the parent entity '{parent}'");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "FWC_API_BASE_URL",
        "FWC_API_KEY",
        "API_RATE_LIMIT",
        "DEFAULT_PAGE_SIZE",
        "API_MAX_PAGES",
        "BATCH_SIZE",
        "ETL_CHILD_ENTITIES",
        "ETL_PARENT_CONCURRENCY",
        "ARCHIVE_RAW_RESPONSES",
        "ARCHIVE_LOADED_BATCHES",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let config = EtlConfig::default();
        assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.api.rate_limit_per_sec, 10);
        assert_eq!(config.api.retry_attempts, 3);
        assert_eq!(config.api.page_size, 100);
        assert_eq!(config.orchestrator.parent_concurrency, 1);
        assert_eq!(config.orchestrator.child_entities.len(), 5);
        assert_eq!(config.state.database_path, PathBuf::from("./data/state.db"));
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let config = EtlConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("FWC_API_KEY"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        std::env::set_var("FWC_API_KEY", "secret");
        std::env::set_var("API_RATE_LIMIT", "4");
        std::env::set_var("API_MAX_PAGES", "12");
        std::env::set_var("BATCH_SIZE", "250");
        std::env::set_var("ETL_CHILD_ENTITIES", "pay_rates, penalties");

        let config = EtlConfig::from_env().unwrap();
        assert_eq!(config.api.api_key, "secret");
        assert_eq!(config.api.rate_limit_per_sec, 4);
        assert_eq!(config.api.max_pages, Some(12));
        assert_eq!(config.database.batch_size, 250);
        assert_eq!(
            config.orchestrator.child_entities,
            vec![EntityKind::PayRates, EntityKind::Penalties]
        );

        clear_env();
    }

    #[test]
    #[serial]
    fn test_parent_entity_not_a_child() {
        clear_env();
        std::env::set_var("FWC_API_KEY", "secret");
        std::env::set_var("ETL_CHILD_ENTITIES", "awards");

        assert!(EtlConfig::from_env().is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_unparseable_values_fall_back() {
        clear_env();
        std::env::set_var("FWC_API_KEY", "secret");
        std::env::set_var("DEFAULT_PAGE_SIZE", "lots");

        let config = EtlConfig::from_env().unwrap();
        assert_eq!(config.api.page_size, 100);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_archive_flags_accept_common_spellings() {
        clear_env();
        std::env::set_var("FWC_API_KEY", "secret");
        std::env::set_var("ARCHIVE_RAW_RESPONSES", "1");
        std::env::set_var("ARCHIVE_LOADED_BATCHES", "Yes");

        let config = EtlConfig::from_env().unwrap();
        assert!(config.database.archive_raw_responses);
        assert!(config.database.archive_loaded_batches);

        std::env::set_var("ARCHIVE_RAW_RESPONSES", "off");
        std::env::set_var("ARCHIVE_LOADED_BATCHES", "maybe");
        let config = EtlConfig::from_env().unwrap();
        assert!(!config.database.archive_raw_responses);
        assert!(!config.database.archive_loaded_batches);

        clear_env();
    }
}
