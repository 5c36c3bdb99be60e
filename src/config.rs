//! Process configuration, read from environment variables.
//!
//! | Variable                          | Default                  |
//! |-----------------------------------|--------------------------|
//! | `EVENT_GUARD_LISTEN_ADDR`         | `0.0.0.0:3000`           |
//! | `EVENT_GUARD_LEDGER_ROOT`         | `./ledger`               |
//! | `EVENT_GUARD_LEDGER_TABLE`        | `ProcessedSlackEventsId` |
//! | `EVENT_GUARD_TTL_SECS`            | `300`                    |
//! | `EVENT_GUARD_WORK_TIMEOUT_SECS`   | `240`                    |
//! | `EVENT_GUARD_PRUNE_INTERVAL_SECS` | `600`                    |
//! | `EVENT_GUARD_EXECUTOR_URL`        | required                 |
//! | `SLACK_BOT_TOKEN`                 | required                 |
//! | `SLACK_SIGNING_SECRET`            | unset: no verification   |
//! | `SLACK_BOT_USER_ID`               | unset: no mention strip  |
//! | `SLACK_API_BASE`                  | `https://slack.com/api`  |

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::dispatch::DEFAULT_WORK_TIMEOUT;
use crate::guard::DEFAULT_TTL_SECS;
use crate::notify::SLACK_API_BASE;
use crate::types::UserId;

const DEFAULT_LISTEN_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000);
const DEFAULT_LEDGER_ROOT: &str = "./ledger";
const DEFAULT_LEDGER_TABLE: &str = "ProcessedSlackEventsId";
const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 600;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    /// The work deadline must expire before the record does, or a slow run
    /// could be overtaken by a redelivery.
    #[error("work timeout ({work_timeout:?}) must be shorter than the record TTL ({ttl:?})")]
    TimeoutNotBelowTtl { work_timeout: Duration, ttl: Duration },
}

#[derive(Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub ledger_root: PathBuf,
    /// Sub-directory of `ledger_root` holding this deployment's records.
    pub ledger_table: String,
    pub ttl: Duration,
    pub work_timeout: Duration,
    /// How often expired records are swept from the ledger.
    pub prune_interval: Duration,
    pub executor_url: String,
    pub slack_bot_token: String,
    pub slack_signing_secret: Option<String>,
    pub slack_bot_user_id: Option<UserId>,
    pub slack_api_base: String,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which returns a variable's
    /// value or `None` if unset.
    ///
    /// Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let listen_addr = parse_or(&get, "EVENT_GUARD_LISTEN_ADDR", DEFAULT_LISTEN_ADDR)?;
        let ttl = Duration::from_secs(parse_or(&get, "EVENT_GUARD_TTL_SECS", DEFAULT_TTL_SECS as u64)?);
        let work_timeout = Duration::from_secs(parse_or(
            &get,
            "EVENT_GUARD_WORK_TIMEOUT_SECS",
            DEFAULT_WORK_TIMEOUT.as_secs(),
        )?);
        let prune_interval = Duration::from_secs(parse_or(
            &get,
            "EVENT_GUARD_PRUNE_INTERVAL_SECS",
            DEFAULT_PRUNE_INTERVAL_SECS,
        )?);

        if ttl.is_zero() {
            return Err(ConfigError::Invalid {
                var: "EVENT_GUARD_TTL_SECS",
                value: "0".to_string(),
            });
        }
        if prune_interval.is_zero() {
            return Err(ConfigError::Invalid {
                var: "EVENT_GUARD_PRUNE_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }
        if work_timeout >= ttl {
            return Err(ConfigError::TimeoutNotBelowTtl { work_timeout, ttl });
        }

        let ledger_table = get("EVENT_GUARD_LEDGER_TABLE")
            .unwrap_or_else(|| DEFAULT_LEDGER_TABLE.to_string());
        if ledger_table.contains(['/', '\\']) || ledger_table.starts_with('.') {
            return Err(ConfigError::Invalid {
                var: "EVENT_GUARD_LEDGER_TABLE",
                value: ledger_table,
            });
        }

        Ok(Config {
            listen_addr,
            ledger_root: get("EVENT_GUARD_LEDGER_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LEDGER_ROOT)),
            ledger_table,
            ttl,
            work_timeout,
            prune_interval,
            executor_url: get("EVENT_GUARD_EXECUTOR_URL")
                .ok_or(ConfigError::Missing("EVENT_GUARD_EXECUTOR_URL"))?,
            slack_bot_token: get("SLACK_BOT_TOKEN").ok_or(ConfigError::Missing("SLACK_BOT_TOKEN"))?,
            slack_signing_secret: get("SLACK_SIGNING_SECRET"),
            slack_bot_user_id: get("SLACK_BOT_USER_ID").map(UserId::new),
            slack_api_base: get("SLACK_API_BASE").unwrap_or_else(|| SLACK_API_BASE.to_string()),
        })
    }

    /// Directory of the file ledger: `<ledger_root>/<ledger_table>`.
    pub fn ledger_dir(&self) -> PathBuf {
        self.ledger_root.join(&self.ledger_table)
    }

    /// Record TTL in the ledger's time type.
    pub fn ledger_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl.as_secs() as i64)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Secrets stay out of logs.
        f.debug_struct("Config")
            .field("listen_addr", &self.listen_addr)
            .field("ledger_root", &self.ledger_root)
            .field("ledger_table", &self.ledger_table)
            .field("ttl", &self.ttl)
            .field("work_timeout", &self.work_timeout)
            .field("prune_interval", &self.prune_interval)
            .field("executor_url", &self.executor_url)
            .field("signature_verification", &self.slack_signing_secret.is_some())
            .field("slack_bot_user_id", &self.slack_bot_user_id)
            .field("slack_api_base", &self.slack_api_base)
            .finish_non_exhaustive()
    }
}

/// Parses `var` if set, otherwise returns `default`.
fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}
