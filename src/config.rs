use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::booking::rules::BookingRules;

pub const ENV_LOG: &str = "SLOTKEEPER_LOG";
pub const ENV_SEED_FILE: &str = "SLOTKEEPER_SEED_FILE";
pub const ENV_SLOT_INTERVAL: &str = "SLOTKEEPER_SLOT_INTERVAL";
pub const ENV_ADVANCE_DAYS: &str = "SLOTKEEPER_ADVANCE_DAYS";

/// Startup configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `info` or `slotkeeper=debug`.
    pub log_filter: String,
    /// Optional JSON file of businesses and services loaded before serving.
    pub seed_file: Option<PathBuf>,
    /// Rules a business starts from before its own settings are applied.
    pub default_rules: BookingRules,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut default_rules = BookingRules::default();
        if let Some(interval) = parse_var(ENV_SLOT_INTERVAL, get(ENV_SLOT_INTERVAL))? {
            default_rules.slot_interval_minutes = interval;
        }
        if let Some(days) = parse_var(ENV_ADVANCE_DAYS, get(ENV_ADVANCE_DAYS))? {
            default_rules.advance_booking_days = days;
        }
        default_rules
            .validate()
            .with_context(|| format!("Invalid default booking rules from {ENV_SLOT_INTERVAL}"))?;

        Ok(Self {
            log_filter: get(ENV_LOG).unwrap_or_else(|| "info".to_string()),
            seed_file: get(ENV_SEED_FILE).map(PathBuf::from),
            default_rules,
        })
    }
}

fn parse_var<T>(key: &str, raw: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map(|s| {
        s.parse::<T>()
            .with_context(|| format!("{key} must be a non-negative integer, got '{s}'"))
    })
    .transpose()
}
