use chrono::Duration as ChronoDuration;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::orchestrator::CheckOptions;
use crate::rules::RulePolicy;

pub const BIND_ADDR: &str = "ATTENDANCE_BIND_ADDR";
pub const DATABASE_URL: &str = "DATABASE_URL";
pub const SEED_CSV: &str = "ATTENDANCE_SEED_CSV";
pub const GRACE_MINUTES: &str = "ATTENDANCE_GRACE_MINUTES";
pub const WORKERS: &str = "ATTENDANCE_WORKERS";
pub const TIMEOUT_SECS: &str = "ATTENDANCE_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub seed_csv: Option<PathBuf>,
    pub grace_minutes: i64,
    pub workers: usize,
    /// Zero disables the run timeout.
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "127.0.0.1:8080".to_string(),
            database_url: "sqlite::memory:".to_string(),
            seed_csv: None,
            grace_minutes: 0,
            workers: 4,
            timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Config {
            bind_addr: value(BIND_ADDR).unwrap_or(defaults.bind_addr),
            database_url: value(DATABASE_URL).unwrap_or(defaults.database_url),
            seed_csv: value(SEED_CSV).map(PathBuf::from),
            grace_minutes: parse(GRACE_MINUTES, value(GRACE_MINUTES))?.unwrap_or(defaults.grace_minutes),
            workers: parse(WORKERS, value(WORKERS))?.unwrap_or(defaults.workers),
            timeout_secs: parse(TIMEOUT_SECS, value(TIMEOUT_SECS))?.unwrap_or(defaults.timeout_secs),
        };

        if config.grace_minutes < 0 {
            return Err(invalid(GRACE_MINUTES, config.grace_minutes, "must not be negative"));
        }
        if config.workers == 0 {
            return Err(invalid(WORKERS, config.workers, "must be at least 1"));
        }
        Ok(config)
    }

    pub fn check_options(&self) -> CheckOptions {
        CheckOptions {
            policy: RulePolicy::with_grace(ChronoDuration::minutes(self.grace_minutes)),
            workers: self.workers,
            timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
        }
    }
}

fn parse<T>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|raw| {
        raw.parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
    })
    .transpose()
}

fn invalid(key: &'static str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
