//! Import service configuration
//!
//! Resolution priority: environment (`MUZI_IMPORT_<FIELD>`) → TOML `[import]`
//! table → compiled defaults.

use muzi_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// LastFM-compatible API endpoint
pub const DEFAULT_LASTFM_BASE_URL: &str = "https://ws.audioscrobbler.com/2.0/";

/// Import pipeline tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Concurrent page fetchers for paginated sources
    pub workers: usize,
    /// Records requested per API page (discovery and every later page)
    pub page_size: u32,
    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
    /// Export events per batch (pre-filter)
    pub export_batch_size: usize,
    /// Buffered API events that trigger a flush
    pub api_flush_size: usize,
    /// Bound of the shared page result channel
    pub page_channel_capacity: usize,
    /// Minimum play time for export records (ms)
    pub min_play_ms: i64,
    /// Two listens of one track closer than this are the same listen (ms)
    pub duplicate_window_ms: i64,
    /// Per-file upload limit (bytes)
    pub max_upload_bytes: usize,
    /// Files per upload request
    pub max_upload_files: usize,
    /// Retry budget for "database is locked" during bulk writes (ms)
    pub max_lock_wait_ms: u64,
    /// How long a finished job stays subscribable (s)
    pub job_retention_secs: u64,
    pub lastfm_base_url: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            page_size: 100,
            request_timeout_secs: 30,
            export_batch_size: 1000,
            api_flush_size: 500,
            page_channel_capacity: 20,
            min_play_ms: 20_000,
            duplicate_window_ms: 20_000,
            max_upload_bytes: 50 * 1024 * 1024,
            max_upload_files: 30,
            max_lock_wait_ms: 5_000,
            job_retention_secs: 30,
            lastfm_base_url: DEFAULT_LASTFM_BASE_URL.to_string(),
        }
    }
}

impl ImportConfig {
    /// Build from an optional TOML `[import]` table, then apply environment
    /// overrides and validate
    pub fn resolve(table: Option<&toml::Table>) -> Result<Self> {
        let mut config = match table {
            Some(table) => toml::Value::Table(table.clone())
                .try_into::<ImportConfig>()
                .map_err(|e| Error::Config(format!("Invalid [import] section: {}", e)))?,
            None => ImportConfig::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MUZI_IMPORT_*` overrides from `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn set<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &str,
            target: &mut T,
        ) -> Result<()> {
            if let Some(raw) = lookup(name) {
                *target = raw
                    .trim()
                    .parse()
                    .map_err(|_| Error::Config(format!("{} has invalid value '{}'", name, raw)))?;
                info!("{} overridden from environment", name);
            }
            Ok(())
        }

        set(&lookup, "MUZI_IMPORT_WORKERS", &mut self.workers)?;
        set(&lookup, "MUZI_IMPORT_PAGE_SIZE", &mut self.page_size)?;
        set(&lookup, "MUZI_IMPORT_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs)?;
        set(&lookup, "MUZI_IMPORT_EXPORT_BATCH_SIZE", &mut self.export_batch_size)?;
        set(&lookup, "MUZI_IMPORT_API_FLUSH_SIZE", &mut self.api_flush_size)?;
        set(&lookup, "MUZI_IMPORT_PAGE_CHANNEL_CAPACITY", &mut self.page_channel_capacity)?;
        set(&lookup, "MUZI_IMPORT_MIN_PLAY_MS", &mut self.min_play_ms)?;
        set(&lookup, "MUZI_IMPORT_DUPLICATE_WINDOW_MS", &mut self.duplicate_window_ms)?;
        set(&lookup, "MUZI_IMPORT_MAX_UPLOAD_BYTES", &mut self.max_upload_bytes)?;
        set(&lookup, "MUZI_IMPORT_MAX_UPLOAD_FILES", &mut self.max_upload_files)?;
        set(&lookup, "MUZI_IMPORT_MAX_LOCK_WAIT_MS", &mut self.max_lock_wait_ms)?;
        set(&lookup, "MUZI_IMPORT_JOB_RETENTION_SECS", &mut self.job_retention_secs)?;

        if let Some(url) = lookup("MUZI_IMPORT_LASTFM_BASE_URL") {
            self.lastfm_base_url = url;
        }

        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("workers", self.workers as u64),
            ("page_size", self.page_size as u64),
            ("request_timeout_secs", self.request_timeout_secs),
            ("export_batch_size", self.export_batch_size as u64),
            ("api_flush_size", self.api_flush_size as u64),
            ("page_channel_capacity", self.page_channel_capacity as u64),
            ("max_upload_files", self.max_upload_files as u64),
            ("max_upload_bytes", self.max_upload_bytes as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("import.{} must be greater than 0", name)));
            }
        }
        if self.min_play_ms < 0 || self.duplicate_window_ms < 0 {
            return Err(Error::Config(
                "import.min_play_ms and import.duplicate_window_ms must not be negative".to_string(),
            ));
        }
        if self.lastfm_base_url.trim().is_empty() {
            return Err(Error::Config("import.lastfm_base_url must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub fn duplicate_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.duplicate_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ImportConfig::default();
        assert_eq!(config.workers, 10);
        assert_eq!(config.export_batch_size, 1000);
        assert_eq!(config.api_flush_size, 500);
        assert_eq!(config.min_play_ms, 20_000);
        assert_eq!(config.duplicate_window(), chrono::Duration::seconds(20));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_upload_bytes, 52_428_800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_table_keeps_other_defaults() {
        let table: toml::Table = toml::from_str("workers = 4\napi_flush_size = 50").unwrap();
        let config = ImportConfig::resolve(Some(&table)).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.api_flush_size, 50);
        assert_eq!(config.page_size, 100);
    }

    #[test]
    fn test_invalid_toml_type_is_config_error() {
        let table: toml::Table = toml::from_str("workers = \"many\"").unwrap();
        let err = ImportConfig::resolve(Some(&table)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("MUZI_IMPORT_WORKERS", "3"),
            ("MUZI_IMPORT_LASTFM_BASE_URL", "http://127.0.0.1:9000/"),
        ]
        .into_iter()
        .collect();

        let mut config = ImportConfig::default();
        config
            .apply_env_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.lastfm_base_url, "http://127.0.0.1:9000/");
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = ImportConfig::default();
        let err = config
            .apply_env_overrides(|name| {
                (name == "MUZI_IMPORT_PAGE_SIZE").then(|| "lots".to_string())
            })
            .unwrap_err();
        assert!(err.to_string().contains("MUZI_IMPORT_PAGE_SIZE"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = ImportConfig {
            workers: 0,
            ..ImportConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
