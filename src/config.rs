//! Environment-driven configuration.
//!
//! `.env` is loaded if present (dev convenience); production injects the
//! variables directly.

use crate::diff::ComparisonPolicy;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_XTRACK_URL: &str = "XTRACK_URL";
pub const ENV_SYNC_INTERVAL: &str = "XTRACK_SYNC_INTERVAL_SECS";
pub const ENV_BIND_ADDR: &str = "XTRACK_BIND_ADDR";
pub const ENV_CHANGE_POLICY: &str = "XTRACK_OBJECT_CHANGE_POLICY";

pub const DEFAULT_XTRACK_URL: &str = "http://localhost:8080";
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// SQLite file; `None` means no store is configured
    pub database_path: Option<PathBuf>,
    /// Base URL of the Xtrack provider API
    pub xtrack_url: String,
    /// Period of each fetch-and-reconcile task
    pub sync_interval: Duration,
    pub bind_addr: String,
    pub comparison_policy: ComparisonPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: None,
            xtrack_url: DEFAULT_XTRACK_URL.to_string(),
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            comparison_policy: ComparisonPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset and blank values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Config::default();

        config.database_path = get(ENV_DATABASE_URL).and_then(|url| database_path(&url));

        if let Some(url) = get(ENV_XTRACK_URL) {
            config.xtrack_url = url.trim_end_matches('/').to_string();
        }

        if let Some(secs) = get(ENV_SYNC_INTERVAL) {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("{ENV_SYNC_INTERVAL} must be a whole number of seconds, got {secs:?}"))?;
            if secs == 0 {
                bail!("{ENV_SYNC_INTERVAL} must be greater than zero");
            }
            config.sync_interval = Duration::from_secs(secs);
        }

        if let Some(addr) = get(ENV_BIND_ADDR) {
            config.bind_addr = addr;
        }

        if let Some(policy) = get(ENV_CHANGE_POLICY) {
            config.comparison_policy = policy.parse().with_context(|| format!("invalid {ENV_CHANGE_POLICY}"))?;
        }

        Ok(config)
    }
}

/// `sqlite:///var/lib/x.db`, `sqlite:x.db` or a bare path.
fn database_path(url: &str) -> Option<PathBuf> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    (!path.is_empty()).then(|| PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c, Config::default());
        assert_eq!(c.database_path, None);
        assert_eq!(c.sync_interval, Duration::from_secs(300));
        assert_eq!(c.comparison_policy, ComparisonPolicy::TimestampsOnly);
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            (ENV_DATABASE_URL, "sqlite:///var/lib/xtrack/state.db"),
            (ENV_XTRACK_URL, "http://xtrack.local:9000/api/"),
            (ENV_SYNC_INTERVAL, "60"),
            (ENV_BIND_ADDR, "127.0.0.1:8899"),
            (ENV_CHANGE_POLICY, "all_fields"),
        ])
        .unwrap();

        assert_eq!(c.database_path, Some(PathBuf::from("/var/lib/xtrack/state.db")));
        assert_eq!(c.xtrack_url, "http://xtrack.local:9000/api");
        assert_eq!(c.sync_interval, Duration::from_secs(60));
        assert_eq!(c.bind_addr, "127.0.0.1:8899");
        assert_eq!(c.comparison_policy, ComparisonPolicy::AllFields);
    }

    #[test]
    fn test_database_url_shapes() {
        assert_eq!(database_path("sqlite:state.db"), Some(PathBuf::from("state.db")));
        assert_eq!(database_path("state.db"), Some(PathBuf::from("state.db")));
        assert_eq!(database_path("sqlite://"), None);
        assert_eq!(config(&[(ENV_DATABASE_URL, "  ")]).unwrap().database_path, None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(config(&[(ENV_SYNC_INTERVAL, "five")]).is_err());
        assert!(config(&[(ENV_SYNC_INTERVAL, "0")]).is_err());
        assert!(config(&[(ENV_CHANGE_POLICY, "nope")]).is_err());
    }
}
