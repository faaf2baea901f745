//! Runtime configuration read from the environment.

use chrono::NaiveDate;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::Amount;
use crate::model::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Last day an installment may fall due.
    pub payment_deadline: NaiveDate,
    /// Shared secret for provider signatures. Empty rejects every event.
    pub webhook_secret: String,
    pub webhook_tolerance_secs: u64,
    pub retry: RetryPolicy,
    pub reminder_days_before: u64,
    pub gateway_timeout: Duration,
    /// Pause between two gateway calls in a scheduler pass.
    pub gateway_call_delay: Duration,
    /// Largest accepted gap between a charged and an expected amount.
    pub amount_tolerance: Amount,
    pub reference_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            payment_deadline: NaiveDate::from_ymd_opt(2026, 5, 20).unwrap_or(NaiveDate::MIN),
            webhook_secret: String::new(),
            webhook_tolerance_secs: 300,
            retry: RetryPolicy::default(),
            reminder_days_before: 3,
            gateway_timeout: Duration::from_secs(30),
            gateway_call_delay: Duration::from_millis(500),
            amount_tolerance: Amount::from_minor(1),
            reference_prefix: "CAMP".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());

        let payment_deadline = match var("PAYMENT_DEADLINE") {
            Some(value) => NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
                .map_err(|_| ConfigError::Invalid {
                    key: "PAYMENT_DEADLINE",
                    value,
                })?,
            None => defaults.payment_deadline,
        };

        Ok(Self {
            payment_deadline,
            webhook_secret: lookup("WEBHOOK_SECRET").unwrap_or_default(),
            webhook_tolerance_secs: parsed(
                &var,
                "WEBHOOK_TOLERANCE_SECS",
                defaults.webhook_tolerance_secs,
            )?,
            retry: RetryPolicy {
                ceiling: retry_ceiling(&var, defaults.retry.ceiling)?,
                retry_after_days: parsed(
                    &var,
                    "PAYMENT_RETRY_DAYS",
                    defaults.retry.retry_after_days,
                )?,
            },
            reminder_days_before: parsed(
                &var,
                "PAYMENT_REMINDER_DAYS_BEFORE",
                defaults.reminder_days_before,
            )?,
            gateway_timeout: Duration::from_secs(parsed(&var, "GATEWAY_TIMEOUT_SECS", 30)?),
            gateway_call_delay: Duration::from_millis(parsed(&var, "GATEWAY_CALL_DELAY_MS", 500)?),
            amount_tolerance: Amount::from_minor(parsed(
                &var,
                "AMOUNT_TOLERANCE_MINOR",
                defaults.amount_tolerance.minor(),
            )?),
            reference_prefix: var("BOOKING_REFERENCE_PREFIX").unwrap_or(defaults.reference_prefix),
        })
    }
}

/// `MAX_PAYMENT_RETRIES` within `1..=RetryPolicy::MAX_CEILING`.
fn retry_ceiling(
    var: &impl Fn(&'static str) -> Option<String>,
    default: u32,
) -> Result<u32, ConfigError> {
    const KEY: &str = "MAX_PAYMENT_RETRIES";
    let ceiling = parsed(var, KEY, default)?;
    if !(1..=RetryPolicy::MAX_CEILING).contains(&ceiling) {
        return Err(ConfigError::Invalid {
            key: KEY,
            value: ceiling.to_string(),
        });
    }
    Ok(ceiling)
}

fn parsed<T: FromStr>(
    var: &impl Fn(&'static str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}
