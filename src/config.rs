//! Runtime configuration
//!
//! Every value is read from the environment (after `.env` is loaded by the
//! binary) and has a default, so the service boots without any setup.
//! Parse failures are reported at startup, never mid-event.

use crate::error::GatekeeperError;
use crate::Result;
use chrono::{FixedOffset, Offset, Utc};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// What the ledger does when no account matches (user, institution).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountPolicy {
    /// Open a zero-balance account in the transaction's currency
    AutoCreate,
    /// Refuse the transaction with an error result
    RequireExisting,
}

impl FromStr for AccountPolicy {
    type Err = GatekeeperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto_create" | "auto-create" | "autocreate" => Ok(AccountPolicy::AutoCreate),
            "require_existing" | "require-existing" | "strict" => {
                Ok(AccountPolicy::RequireExisting)
            }
            other => Err(GatekeeperError::Config(format!(
                "ACCOUNT_POLICY must be auto_create or require_existing, got '{}'",
                other
            ))),
        }
    }
}

/// Whether finance notifications must come from a whitelisted institution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustPolicy {
    Enforce,
    Disabled,
}

impl FromStr for TrustPolicy {
    type Err = GatekeeperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "enforce" | "on" | "true" | "1" => Ok(TrustPolicy::Enforce),
            "disabled" | "off" | "false" | "0" => Ok(TrustPolicy::Disabled),
            other => Err(GatekeeperError::Config(format!(
                "TRUST_CHECK must be enforce or disabled, got '{}'",
                other
            ))),
        }
    }
}

/// Budget alert thresholds, expressed in the account's currency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetThresholds {
    pub absolute: f64,
    /// Fraction of the pre-transaction balance
    pub relative: f64,
}

impl Default for BudgetThresholds {
    fn default() -> Self {
        Self {
            absolute: 5_000_000.0,
            relative: 0.30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatekeeperConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub api_port: u16,
    pub database_url: Option<String>,
    pub exchange_rate_base_url: String,
    pub app_name_resolver_url: Option<String>,
    pub oracle_timeout: Duration,
    pub rate_timeout: Duration,
    pub default_language: String,
    pub local_offset: FixedOffset,
    pub log_retention_days: i64,
    pub budget: BudgetThresholds,
    pub account_policy: AccountPolicy,
    pub trust_policy: TrustPolicy,
    pub prompt_dir: Option<PathBuf>,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            gemini_model: "gemini-2.0-flash".to_string(),
            api_port: 8080,
            database_url: None,
            exchange_rate_base_url: "https://api.exchangerate-api.com/v4/latest".to_string(),
            app_name_resolver_url: None,
            oracle_timeout: Duration::from_secs(8),
            rate_timeout: Duration::from_secs(5),
            default_language: "Vietnamese".to_string(),
            local_offset: utc_offset(),
            log_retention_days: 30,
            budget: BudgetThresholds::default(),
            account_policy: AccountPolicy::AutoCreate,
            trust_policy: TrustPolicy::Enforce,
            prompt_dir: None,
        }
    }
}

impl GatekeeperConfig {
    /// Build configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(v) => parse_value::<u16>("PORT", &v)?,
            None => defaults.api_port,
        };

        let offset_minutes = match get("USER_UTC_OFFSET_MINUTES") {
            Some(v) => parse_value::<i32>("USER_UTC_OFFSET_MINUTES", &v)?,
            None => 0,
        };
        let local_offset = FixedOffset::east_opt(offset_minutes * 60).ok_or_else(|| {
            GatekeeperError::Config(format!(
                "USER_UTC_OFFSET_MINUTES out of range: {}",
                offset_minutes
            ))
        })?;

        let budget = BudgetThresholds {
            absolute: get("BUDGET_ABSOLUTE_THRESHOLD")
                .map(|v| parse_value::<f64>("BUDGET_ABSOLUTE_THRESHOLD", &v))
                .transpose()?
                .unwrap_or(defaults.budget.absolute),
            relative: get("BUDGET_RELATIVE_THRESHOLD")
                .map(|v| parse_value::<f64>("BUDGET_RELATIVE_THRESHOLD", &v))
                .transpose()?
                .unwrap_or(defaults.budget.relative),
        };

        if budget.absolute <= 0.0 || budget.relative <= 0.0 {
            return Err(GatekeeperError::Config(
                "budget thresholds must be positive".to_string(),
            ));
        }

        let secs = |key: &str, default: Duration| -> Result<Duration> {
            match get(key) {
                Some(v) => Ok(Duration::from_secs(parse_value::<u64>(key, &v)?)),
                None => Ok(default),
            }
        };

        Ok(Self {
            gemini_api_key: get("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            api_port,
            database_url: get("DATABASE_URL").or_else(|| get("POSTGRES_URL")),
            exchange_rate_base_url: get("EXCHANGE_RATE_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.exchange_rate_base_url),
            app_name_resolver_url: get("APP_NAME_RESOLVER_URL"),
            oracle_timeout: secs("ORACLE_TIMEOUT_SECS", defaults.oracle_timeout)?,
            rate_timeout: secs("RATE_TIMEOUT_SECS", defaults.rate_timeout)?,
            default_language: get("DEFAULT_LANGUAGE").unwrap_or(defaults.default_language),
            local_offset,
            log_retention_days: match get("LOG_RETENTION_DAYS") {
                Some(v) => parse_value::<i64>("LOG_RETENTION_DAYS", &v)?,
                None => defaults.log_retention_days,
            },
            budget,
            account_policy: get("ACCOUNT_POLICY")
                .map(|v| v.parse::<AccountPolicy>())
                .transpose()?
                .unwrap_or(defaults.account_policy),
            trust_policy: get("TRUST_CHECK")
                .map(|v| v.parse::<TrustPolicy>())
                .transpose()?
                .unwrap_or(defaults.trust_policy),
            prompt_dir: get("PROMPT_DIR").map(PathBuf::from),
        })
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        GatekeeperError::Config(format!("{} has an invalid value: '{}'", key, value))
    })
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}
