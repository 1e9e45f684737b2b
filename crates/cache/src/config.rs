//! Settings for the in-memory caching tier with precedence and validation
//!
//! Precedence, lowest to highest: built-in defaults, the `"cache"` object of
//! the user config file, then `CACHETIER_*` environment variables.

use cachetier_core::{
    Error, Result, ASSUMED_USED_HEAP_MB, CACHETIER_CACHE_RESERVED_MB_VAR,
    CACHETIER_FLUSH_TIMEOUT_MS_VAR, CACHETIER_LOCK_TIMEOUT_MS_VAR, CACHETIER_MAX_HEAP_MB_VAR,
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_FLUSH_TIMEOUT_MS, DEFAULT_LOCK_TIMEOUT_MS,
    DEFAULT_MAX_SIZING_RATIO, DEFAULT_MIN_SIZING_RATIO, DEFAULT_SIZE_GRANULARITY,
};
use cachetier_utils::RetryConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunables of the caching tier
#[derive(Debug, Clone, PartialEq)]
pub struct CacheTierSettings {
    /// Memory budget override in MB; detected from the machine when `None`
    pub max_heap_mb: Option<u64>,
    /// Memory assumed to be used by the process itself, in MB
    pub reserved_heap_mb: u64,
    /// Lower clamp of the sizing ratio
    pub min_ratio: f64,
    /// Upper clamp of the sizing ratio
    pub max_ratio: f64,
    /// Scaled sizes are rounded down to a multiple of this
    pub granularity: usize,
    /// Upper bound on waiting for the cross-process lock
    pub lock_timeout: Duration,
    /// Backoff between lock acquisition attempts
    pub lock_retry: RetryConfig,
    /// Upper bound on draining pending writes
    pub flush_timeout: Duration,
}

impl Default for CacheTierSettings {
    fn default() -> Self {
        Self {
            max_heap_mb: None,
            reserved_heap_mb: ASSUMED_USED_HEAP_MB,
            min_ratio: DEFAULT_MIN_SIZING_RATIO,
            max_ratio: DEFAULT_MAX_SIZING_RATIO,
            granularity: DEFAULT_SIZE_GRANULARITY,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            lock_retry: RetryConfig::default(),
            flush_timeout: Duration::from_millis(DEFAULT_FLUSH_TIMEOUT_MS),
        }
    }
}

impl CacheTierSettings {
    pub fn builder() -> CacheTierSettingsBuilder {
        CacheTierSettingsBuilder::new()
    }

    /// Reject settings the sizer and lock layer cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.granularity == 0 {
            return Err(Error::configuration("granularity must be greater than 0"));
        }
        if !(self.min_ratio > 0.0) {
            return Err(Error::configuration(format!(
                "min_ratio must be positive, got {}",
                self.min_ratio
            )));
        }
        if self.max_ratio < self.min_ratio {
            return Err(Error::configuration(format!(
                "max_ratio {} is below min_ratio {}",
                self.max_ratio, self.min_ratio
            )));
        }
        if self.lock_timeout.is_zero() {
            return Err(Error::configuration("lock_timeout must be non-zero"));
        }
        if self.flush_timeout.is_zero() {
            return Err(Error::configuration("flush_timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Builder for creating settings programmatically
#[derive(Debug, Default)]
pub struct CacheTierSettingsBuilder {
    settings: CacheTierSettings,
}

impl CacheTierSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_heap_mb(mut self, max_heap_mb: u64) -> Self {
        self.settings.max_heap_mb = Some(max_heap_mb);
        self
    }

    pub fn with_reserved_heap_mb(mut self, reserved_heap_mb: u64) -> Self {
        self.settings.reserved_heap_mb = reserved_heap_mb;
        self
    }

    pub fn with_ratio_bounds(mut self, min_ratio: f64, max_ratio: f64) -> Self {
        self.settings.min_ratio = min_ratio;
        self.settings.max_ratio = max_ratio;
        self
    }

    pub fn with_granularity(mut self, granularity: usize) -> Self {
        self.settings.granularity = granularity;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.settings.lock_timeout = timeout;
        self
    }

    pub fn with_lock_retry(mut self, retry: RetryConfig) -> Self {
        self.settings.lock_retry = retry;
        self
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.settings.flush_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<CacheTierSettings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

/// Shape of the `"cache"` object in the config file
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
struct FileSettings {
    max_heap_mb: Option<u64>,
    reserved_heap_mb: Option<u64>,
    min_ratio: Option<f64>,
    max_ratio: Option<f64>,
    granularity: Option<usize>,
    lock_timeout_ms: Option<u64>,
    flush_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    cache: FileSettings,
}

/// Settings loader that handles precedence
pub struct CacheTierSettingsLoader;

impl CacheTierSettingsLoader {
    /// Load settings with full precedence handling
    pub fn load() -> Result<CacheTierSettings> {
        let mut settings = CacheTierSettings::default();

        if let Some(path) = Self::config_file_path() {
            if path.exists() {
                Self::apply_file(&mut settings, &path)?;
            }
        }

        Self::apply_env(&mut settings)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply the `"cache"` object of a JSON config file
    pub fn apply_file(settings: &mut CacheTierSettings, path: &Path) -> Result<()> {
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::io(path, "read config file", e))?;
        let file: ConfigFile = serde_json::from_str(&content)?;
        let cache = file.cache;

        if cache.max_heap_mb.is_some() {
            settings.max_heap_mb = cache.max_heap_mb;
        }
        if let Some(reserved) = cache.reserved_heap_mb {
            settings.reserved_heap_mb = reserved;
        }
        if let Some(min_ratio) = cache.min_ratio {
            settings.min_ratio = min_ratio;
        }
        if let Some(max_ratio) = cache.max_ratio {
            settings.max_ratio = max_ratio;
        }
        if let Some(granularity) = cache.granularity {
            settings.granularity = granularity;
        }
        if let Some(ms) = cache.lock_timeout_ms {
            settings.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = cache.flush_timeout_ms {
            settings.flush_timeout = Duration::from_millis(ms);
        }

        tracing::debug!(path = %path.display(), "Loaded cache settings from config file");
        Ok(())
    }

    /// Override settings from `CACHETIER_*` environment variables
    pub fn apply_env(settings: &mut CacheTierSettings) -> Result<()> {
        if let Some(max_heap_mb) = Self::env_u64(CACHETIER_MAX_HEAP_MB_VAR)? {
            settings.max_heap_mb = Some(max_heap_mb);
        }
        if let Some(reserved) = Self::env_u64(CACHETIER_CACHE_RESERVED_MB_VAR)? {
            settings.reserved_heap_mb = reserved;
        }
        if let Some(ms) = Self::env_u64(CACHETIER_LOCK_TIMEOUT_MS_VAR)? {
            settings.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = Self::env_u64(CACHETIER_FLUSH_TIMEOUT_MS_VAR)? {
            settings.flush_timeout = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn env_u64(name: &str) -> Result<Option<u64>> {
        match std::env::var(name) {
            Ok(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
                Error::configuration(format!("{name} must be a non-negative integer, got '{raw}'"))
            }),
            Err(_) => Ok(None),
        }
    }

    /// Get the configuration file path
    pub fn config_file_path() -> Option<PathBuf> {
        let config_dir = match std::env::var_os("XDG_CONFIG_HOME") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()?,
        };

        Some(config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let settings = CacheTierSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.reserved_heap_mb, 150);
        assert_eq!(settings.granularity, 100);
    }

    #[test]
    fn test_builder_rejects_inverted_ratio_bounds() {
        let result = CacheTierSettings::builder()
            .with_ratio_bounds(2.0, 1.0)
            .build();
        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_builder_rejects_zero_granularity() {
        let result = CacheTierSettings::builder().with_granularity(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_file_settings_override_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "cache": { "max_heap_mb": 2048, "lock_timeout_ms": 250, "granularity": 10 } }"#,
        )
        .unwrap();

        let mut settings = CacheTierSettings::default();
        CacheTierSettingsLoader::apply_file(&mut settings, &path).unwrap();

        assert_eq!(settings.max_heap_mb, Some(2048));
        assert_eq!(settings.lock_timeout, Duration::from_millis(250));
        assert_eq!(settings.granularity, 10);
        assert_eq!(settings.reserved_heap_mb, 150);
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let mut settings = CacheTierSettings::default();
        let err = CacheTierSettingsLoader::apply_file(&mut settings, &path).unwrap_err();
        assert!(matches!(err, Error::Json { .. }));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var(CACHETIER_CACHE_RESERVED_MB_VAR, "300");
        std::env::set_var(CACHETIER_FLUSH_TIMEOUT_MS_VAR, "1500");

        let mut settings = CacheTierSettings::default();
        let result = CacheTierSettingsLoader::apply_env(&mut settings);

        std::env::remove_var(CACHETIER_CACHE_RESERVED_MB_VAR);
        std::env::remove_var(CACHETIER_FLUSH_TIMEOUT_MS_VAR);

        result.unwrap();
        assert_eq!(settings.reserved_heap_mb, 300);
        assert_eq!(settings.flush_timeout, Duration::from_millis(1500));
    }

    #[test]
    #[serial]
    fn test_env_rejects_garbage() {
        std::env::set_var(CACHETIER_LOCK_TIMEOUT_MS_VAR, "soon");

        let mut settings = CacheTierSettings::default();
        let result = CacheTierSettingsLoader::apply_env(&mut settings);

        std::env::remove_var(CACHETIER_LOCK_TIMEOUT_MS_VAR);
        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }

    #[test]
    #[serial]
    fn test_load_reads_xdg_config_home() {
        let temp_dir = TempDir::new().unwrap();
        let config_dir = temp_dir.path().join(CONFIG_DIR_NAME);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join(CONFIG_FILE_NAME),
            r#"{ "cache": { "reserved_heap_mb": 64 } }"#,
        )
        .unwrap();

        let previous = std::env::var_os("XDG_CONFIG_HOME");
        std::env::set_var("XDG_CONFIG_HOME", temp_dir.path());
        let result = CacheTierSettingsLoader::load();
        match previous {
            Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }

        assert_eq!(result.unwrap().reserved_heap_mb, 64);
    }
}
