use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    // External APIs
    pub polygon_api_key: Option<String>,
    pub polygon_rate_limit: usize, // requests per minute

    // Files
    pub sheets_dir: PathBuf,
    pub snapshot_cache_path: PathBuf,
    pub snapshot_max_age_hours: u64,

    // Scanning
    pub scan_concurrency: usize,
    pub fetch_timeout_secs: u64,

    // Logging
    pub log_json: bool,
}

impl TrackerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any key lookup, falling back to defaults for
    /// missing keys. Present but unparsable values are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            polygon_api_key: lookup("POLYGON_API_KEY").filter(|k| !k.trim().is_empty()),
            polygon_rate_limit: get("POLYGON_RATE_LIMIT", "500")
                .parse()
                .context("POLYGON_RATE_LIMIT must be a whole number")?,

            sheets_dir: PathBuf::from(get("SHEETS_DIR", "sheets")),
            snapshot_cache_path: PathBuf::from(get("SNAPSHOT_CACHE_PATH", "last_day.csv")),
            snapshot_max_age_hours: get("SNAPSHOT_MAX_AGE_HOURS", "12")
                .parse()
                .context("SNAPSHOT_MAX_AGE_HOURS must be a whole number")?,

            scan_concurrency: get("SCAN_CONCURRENCY", "8")
                .parse()
                .context("SCAN_CONCURRENCY must be a whole number")?,
            fetch_timeout_secs: get("FETCH_TIMEOUT_SECS", "30")
                .parse()
                .context("FETCH_TIMEOUT_SECS must be a whole number")?,

            log_json: get("LOG_JSON", "false")
                .parse()
                .context("LOG_JSON must be true or false")?,
        };

        Ok(config)
    }

    pub fn snapshot_max_age(&self) -> Duration {
        Duration::from_secs(self.snapshot_max_age_hours * 3600)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
