//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::spool::FlushLimits;

/// When the daemon flushes the spool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushSchedule {
    /// Fixed period between flushes.
    Interval(Duration),
    /// Cron expression (seconds field first).
    Cron(String),
}

/// Spool daemon configuration.
#[derive(Debug, Clone)]
pub struct SpoolConfig {
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Limits applied to every scheduled flush.
    pub limits: FlushLimits,
    pub schedule: FlushSchedule,
    /// Flush once and exit instead of running the scheduler.
    pub run_once: bool,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/mail-spool.db"),
            limits: FlushLimits::unlimited(),
            schedule: FlushSchedule::Interval(Duration::from_secs(60)), // 1 minute
            run_once: false,
        }
    }
}

impl SpoolConfig {
    /// Read configuration from `MAIL_SPOOL_*` environment variables.
    ///
    /// Unset variables keep their default; malformed ones are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = lookup("MAIL_SPOOL_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(limit) = parse_var::<usize>(&lookup, "MAIL_SPOOL_MESSAGE_LIMIT")? {
            config.limits.message_limit = limit;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "MAIL_SPOOL_TIME_LIMIT_SECS")? {
            config.limits.time_limit = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "MAIL_SPOOL_FLUSH_INTERVAL_SECS")? {
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "MAIL_SPOOL_FLUSH_INTERVAL_SECS".into(),
                    message: "must be greater than zero".into(),
                });
            }
            config.schedule = FlushSchedule::Interval(Duration::from_secs(secs));
        }
        // A cron expression wins over the interval.
        if let Some(expr) = lookup("MAIL_SPOOL_FLUSH_CRON").filter(|s| !s.trim().is_empty()) {
            cron::Schedule::from_str(expr.trim()).map_err(|e| ConfigError::InvalidValue {
                key: "MAIL_SPOOL_FLUSH_CRON".into(),
                message: e.to_string(),
            })?;
            config.schedule = FlushSchedule::Cron(expr.trim().to_string());
        }
        if let Some(flag) = lookup("MAIL_SPOOL_RUN_ONCE") {
            config.run_once = parse_flag("MAIL_SPOOL_RUN_ONCE", &flag)?;
        }

        Ok(config)
    }
}

/// Parse an optional variable; a present but malformed value is an error.
pub(crate) fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}
