//! Environment configuration
//!
//! | Variable                   | Default      |
//! |----------------------------|--------------|
//! | `TRUST_ROOT_STORE_DIR`     | `.trustroot` |
//! | `TRUST_ROOT_LOG_LEVEL`     | `info`       |
//! | `TRUST_ROOT_REQUIRE_CHAIN` | `true`       |
//! | `TRUST_ROOT_EXPIRY_DAYS`   | `365`        |
//! | `TRUST_ROOT_DATABASE_URL`  | unset        |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;

pub const STORE_DIR_VAR: &str = "TRUST_ROOT_STORE_DIR";
pub const LOG_LEVEL_VAR: &str = "TRUST_ROOT_LOG_LEVEL";
pub const REQUIRE_CHAIN_VAR: &str = "TRUST_ROOT_REQUIRE_CHAIN";
pub const EXPIRY_DAYS_VAR: &str = "TRUST_ROOT_EXPIRY_DAYS";
pub const DATABASE_URL_VAR: &str = "TRUST_ROOT_DATABASE_URL";

/// Rotation settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationConfig {
    /// Directory of the filesystem trust store
    pub store_dir: PathBuf,
    /// Log level name, parsed by [`RotationConfig::log_level`]
    pub log_level: String,
    /// Check each loaded root against its predecessor
    pub require_chain: bool,
    /// Validity period given to new and renewed roots
    pub expiry_days: i64,
    /// PostgreSQL connection string; selects the database store when set
    pub database_url: Option<String>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(".trustroot"),
            log_level: "info".into(),
            require_chain: true,
            expiry_days: 365,
            database_url: None,
        }
    }
}

impl RotationConfig {
    /// Read settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read settings through `lookup`, falling back to defaults for unset or
    /// unparsable values
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            store_dir: lookup(STORE_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or(defaults.store_dir),
            log_level: lookup(LOG_LEVEL_VAR).unwrap_or(defaults.log_level),
            require_chain: parsed(&lookup, REQUIRE_CHAIN_VAR).unwrap_or(defaults.require_chain),
            expiry_days: parsed(&lookup, EXPIRY_DAYS_VAR)
                .filter(|days: &i64| *days > 0)
                .unwrap_or(defaults.expiry_days),
            database_url: lookup(DATABASE_URL_VAR).filter(|url| !url.is_empty()),
        }
    }

    /// Tracing level, `INFO` when the configured name is not a level
    pub fn log_level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }
}

fn parsed<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(|raw| raw.trim().to_ascii_lowercase().parse().ok())
}
