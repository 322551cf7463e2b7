//! Runtime configuration from environment variables

use crate::domain::PrincipalId;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const MIN_CALL_TIMEOUT_SECS: u64 = 5;
const MAX_CALL_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{var} has an invalid value `{value}`")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub bot_token: String,
    pub api_base: String,
    pub db_path: PathBuf,
    pub http_port: u16,
    /// Bound on each ledger or platform call
    pub call_timeout: Duration,
    /// Concurrent external calls, and concurrent interactions in the poller
    pub worker_pool: usize,
    pub admins: HashSet<PrincipalId>,
    /// How long a published ad stays before the order auto-completes
    pub post_retention: chrono::Duration,
    pub poll_timeout: Duration,
}

impl BrokerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bot_token =
            var("TELEGRAM_BOT_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;
        let api_base =
            var("TELEGRAM_API_BASE").unwrap_or_else(|| "https://api.telegram.org".to_string());
        let db_path = var("BROKER_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".adslot-broker").join("broker.db")
            },
            PathBuf::from,
        );

        let call_timeout_secs: u64 = parse(&var, "BROKER_CALL_TIMEOUT_SECS", 8)?;
        let retention_hours: i64 = parse(&var, "BROKER_POST_RETENTION_HOURS", 24)?;
        if retention_hours <= 0 {
            return Err(ConfigError::Invalid {
                var: "BROKER_POST_RETENTION_HOURS",
                value: retention_hours.to_string(),
            });
        }

        Ok(Self {
            bot_token,
            api_base,
            db_path,
            http_port: parse(&var, "BROKER_HTTP_PORT", 8080)?,
            call_timeout: Duration::from_secs(
                call_timeout_secs.clamp(MIN_CALL_TIMEOUT_SECS, MAX_CALL_TIMEOUT_SECS),
            ),
            worker_pool: parse::<usize>(&var, "BROKER_WORKER_POOL", 16)?.max(1),
            admins: parse_admins(var("BROKER_ADMIN_IDS").as_deref())?,
            post_retention: chrono::Duration::hours(retention_hours),
            poll_timeout: Duration::from_secs(parse(&var, "BROKER_POLL_TIMEOUT_SECS", 30)?),
        })
    }
}

fn parse<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            var: name,
            value,
        }),
    }
}

fn parse_admins(raw: Option<&str>) -> Result<HashSet<PrincipalId>, ConfigError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse().map_err(|_| ConfigError::Invalid {
                var: "BROKER_ADMIN_IDS",
                value: id.to_string(),
            })
        })
        .collect()
}
