//! Engine configuration, read from the environment.
//!
//! A `.env` file in the working directory is loaded first if present.
//!
//! | Variable                      | Default  |
//! |-------------------------------|----------|
//! | `VHSYNC_DATABASE_URL`         | required |
//! | `VHSYNC_CONFIG_DATABASE_URL`  | same as `VHSYNC_DATABASE_URL` |
//! | `VHSYNC_SCHEMA`               | `public` |
//! | `VHSYNC_RESERVED_PREFIX`      | `vh_`    |
//! | `VHSYNC_TIMEOUT_SECS`         | `30`     |
//! | `VHSYNC_POOL_SIZE`            | `4`      |

use std::time::Duration;
use vhsync_sql::{IdentError, ReservedPrefix, SafeIdent};

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_POOL_SIZE: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{var} is not a valid identifier: {source}")]
    InvalidIdentifier {
        var: &'static str,
        #[source]
        source: IdentError,
    },

    #[error("{var} must be a positive integer, got {value:?}")]
    NotPositive { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The user's database, the one being introspected.
    pub database_url: String,
    /// Where the config store lives, when it is not the user's database.
    pub config_database_url: Option<String>,
    pub schema: SafeIdent,
    pub reserved_prefix: ReservedPrefix,
    /// Deadline for one whole reconcile or synchronize pass.
    pub operation_timeout: Duration,
    pub pool_size: usize,
}

impl EngineConfig {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env is normal outside development.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url =
            get("VHSYNC_DATABASE_URL").ok_or(ConfigError::Missing("VHSYNC_DATABASE_URL"))?;
        let config_database_url = get("VHSYNC_CONFIG_DATABASE_URL");

        let schema = SafeIdent::new(
            get("VHSYNC_SCHEMA").unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
        )
        .map_err(|source| ConfigError::InvalidIdentifier {
            var: "VHSYNC_SCHEMA",
            source,
        })?;

        let reserved_prefix = ReservedPrefix::new(
            get("VHSYNC_RESERVED_PREFIX").unwrap_or_else(|| ReservedPrefix::DEFAULT.to_string()),
        )
        .map_err(|source| ConfigError::InvalidIdentifier {
            var: "VHSYNC_RESERVED_PREFIX",
            source,
        })?;

        let timeout_secs = positive(
            "VHSYNC_TIMEOUT_SECS",
            get("VHSYNC_TIMEOUT_SECS"),
            DEFAULT_TIMEOUT_SECS,
        )?;
        let pool_size = positive("VHSYNC_POOL_SIZE", get("VHSYNC_POOL_SIZE"), DEFAULT_POOL_SIZE)?;

        Ok(Self {
            database_url,
            config_database_url,
            schema,
            reserved_prefix,
            operation_timeout: Duration::from_secs(timeout_secs),
            pool_size,
        })
    }

    /// URL of the config store database.
    pub fn config_url(&self) -> &str {
        self.config_database_url
            .as_deref()
            .unwrap_or(&self.database_url)
    }

    /// Whether the config store has its own database.
    pub fn has_separate_config_db(&self) -> bool {
        self.config_database_url
            .as_deref()
            .is_some_and(|url| url != self.database_url)
    }
}

fn positive<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        _ => Err(ConfigError::NotPositive { var, value: raw }),
    }
}
