//! Ledger configuration.
//!
//! Built once at start-up and passed explicitly to every service; nothing
//! reads the environment after that.

use fundledger_accounting::ActualWindow;
use fundledger_core::PageLimits;
use thiserror::Error;

pub const ENV_PREFIX: &str = "FUNDLEDGER_";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub page_limits: PageLimits,
    /// Leading segment of journal numbers, e.g. `JE` in `JE/HQ/202401/0001`.
    pub journal_number_scheme: String,
    /// Attempts at allocating a journal number before giving up with
    /// `DuplicateSequence`.
    pub sequence_retry_attempts: u32,
    /// Month (1-12) the organization's fiscal year starts in. Drives the
    /// start of the current-year net income line on the balance sheet.
    pub fiscal_year_start_month: u32,
    pub budget_actual_window: ActualWindow,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            page_limits: PageLimits::default(),
            journal_number_scheme: "JE".to_string(),
            sequence_retry_attempts: 3,
            fiscal_year_start_month: 1,
            budget_actual_window: ActualWindow::YearToDate,
            database_url: None,
            database_max_connections: 10,
        }
    }
}

impl LedgerConfig {
    /// Load from `FUNDLEDGER_*` environment variables. `DATABASE_URL` is
    /// honoured when `FUNDLEDGER_DATABASE_URL` is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;
        if config.database_url.is_none() {
            config.database_url = std::env::var("DATABASE_URL").ok();
        }
        Ok(config)
    }

    /// Load from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(v) = get("DEFAULT_PAGE_SIZE") {
            config.page_limits.default_size = parse_number("DEFAULT_PAGE_SIZE", &v)?;
        }
        if let Some(v) = get("MAX_PAGE_SIZE") {
            config.page_limits.max_size = parse_number("MAX_PAGE_SIZE", &v)?;
        }
        if let Some(v) = get("JOURNAL_NUMBER_SCHEME") {
            if v.contains('/') {
                return Err(invalid("JOURNAL_NUMBER_SCHEME", &v, "must not contain '/'"));
            }
            config.journal_number_scheme = v;
        }
        if let Some(v) = get("SEQUENCE_RETRY_ATTEMPTS") {
            config.sequence_retry_attempts = parse_number("SEQUENCE_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("FISCAL_YEAR_START_MONTH") {
            config.fiscal_year_start_month = parse_number("FISCAL_YEAR_START_MONTH", &v)?;
        }
        if let Some(v) = get("BUDGET_ACTUAL_WINDOW") {
            config.budget_actual_window = v
                .parse()
                .map_err(|e: fundledger_core::DomainError| {
                    invalid("BUDGET_ACTUAL_WINDOW", &v, &e.to_string())
                })?;
        }
        if let Some(v) = get("DATABASE_URL") {
            config.database_url = Some(v);
        }
        if let Some(v) = get("DATABASE_MAX_CONNECTIONS") {
            config.database_max_connections = parse_number("DATABASE_MAX_CONNECTIONS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let limits = self.page_limits;
        if limits.default_size == 0 || limits.max_size == 0 {
            return Err(invalid(
                "DEFAULT_PAGE_SIZE",
                &limits.default_size.to_string(),
                "page sizes must be positive",
            ));
        }
        if limits.default_size > limits.max_size {
            return Err(invalid(
                "DEFAULT_PAGE_SIZE",
                &limits.default_size.to_string(),
                "must not exceed MAX_PAGE_SIZE",
            ));
        }
        if self.sequence_retry_attempts == 0 {
            return Err(invalid("SEQUENCE_RETRY_ATTEMPTS", "0", "must be at least 1"));
        }
        if !(1..=12).contains(&self.fiscal_year_start_month) {
            return Err(invalid(
                "FISCAL_YEAR_START_MONTH",
                &self.fiscal_year_start_month.to_string(),
                "must be a month between 1 and 12",
            ));
        }
        if self.database_max_connections == 0 {
            return Err(invalid("DATABASE_MAX_CONNECTIONS", "0", "must be at least 1"));
        }
        Ok(())
    }
}

fn parse_number(name: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(name, value, &e.to_string()))
}

fn invalid(name: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: format!("{ENV_PREFIX}{name}"),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
