/// Configuration loading from TOML file
use std::fmt;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use tracing::{info, warn};

use crate::error::{CacheError, Result};
use crate::types::{Config, SymbolAllowList};

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CacheError::ConfigError(format!("Failed to read config file: {}", e)))?;

    let mut config: Config = toml::from_str(&content)
        .map_err(|e| CacheError::ConfigError(format!("Failed to parse config: {}", e)))?;

    apply_env_overrides(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Where a loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// No file at the path; defaults plus environment overrides
    Defaults(PathBuf),
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Defaults(path) => write!(f, "defaults (no file at {})", path.display()),
        }
    }
}

/// Load `path` if it exists, otherwise start from defaults.
///
/// Does not log, so it can run before the subscriber is installed.
pub fn load_config_with_source<P: AsRef<Path>>(path: P) -> Result<(Config, ConfigSource)> {
    let path = path.as_ref();
    if path.exists() {
        return Ok((load_config(path)?, ConfigSource::File(path.to_path_buf())));
    }

    let mut config = Config::default();
    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok((config, ConfigSource::Defaults(path.to_path_buf())))
}

pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> Result<Config> {
    let (config, source) = load_config_with_source(path)?;
    match &source {
        ConfigSource::File(_) => info!("Configuration loaded from {}", source),
        ConfigSource::Defaults(_) => warn!("Configuration from {}", source),
    }
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(url) = std::env::var("UPSTREAM_BASE_URL") {
        config.upstream_base_url = url;
    }
    if let Ok(path) = std::env::var("DATABASE_PATH") {
        config.database_path = path;
    }
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.upstream_base_url.is_empty() {
        return Err(CacheError::ConfigError("upstream_base_url is empty".to_string()));
    }

    if config.upstream_batch_limit == 0 {
        return Err(CacheError::ConfigError("upstream_batch_limit must be > 0".to_string()));
    }

    if config.flush_batch_size == 0 {
        return Err(CacheError::ConfigError("flush_batch_size must be > 0".to_string()));
    }

    if SymbolAllowList::new(&config.allowed_symbols).is_empty() {
        return Err(CacheError::ConfigError("allowed_symbols is empty".to_string()));
    }

    config.chart_window()?;

    // Limit bounds
    if config.limit_min == 0 || config.limit_min > config.limit_max {
        return Err(CacheError::ConfigError(format!(
            "Invalid limit range: {}..={}",
            config.limit_min, config.limit_max
        )));
    }

    if config.default_limit < config.limit_min || config.default_limit > config.limit_max {
        return Err(CacheError::ConfigError(format!(
            "default_limit {} outside {}..={}",
            config.default_limit, config.limit_min, config.limit_max
        )));
    }

    if config.worker_count == 0 {
        return Err(CacheError::ConfigError("worker_count must be >= 1".to_string()));
    }

    config
        .display_timezone
        .parse::<Tz>()
        .map_err(|e| CacheError::ConfigError(format!("Invalid display_timezone: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "chart_window_days = 7\nallowed_symbols = [\"btcusdt\"]\ndisplay_timezone = \"Europe/Chisinau\""
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.chart_window_days, 7);
        assert_eq!(config.limit_max, 500);
        assert!(config.allow_list().parse("BTCUSDT").is_ok());
    }

    #[test]
    fn test_reports_config_source() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let (_, source) = load_config_with_source(file.path()).unwrap();
        assert_eq!(source, ConfigSource::File(file.path().to_path_buf()));

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("config.toml");
        let (config, source) = load_config_with_source(&missing).unwrap();
        assert_eq!(source, ConfigSource::Defaults(missing.clone()));
        assert_eq!(config.limit_max, 500);
        assert!(source.to_string().contains("no file at"));
    }

    #[test]
    fn test_rejects_inverted_limits() {
        let config = Config {
            limit_min: 600,
            ..Config::default()
        };
        assert!(matches!(
            validate_config(&config),
            Err(CacheError::ConfigError(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_chart_window() {
        let config = Config {
            chart_window_days: i64::MAX,
            ..Config::default()
        };
        assert!(matches!(
            validate_config(&config),
            Err(CacheError::ConfigError(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_timezone() {
        let config = Config {
            display_timezone: "Mars/Olympus".to_string(),
            ..Config::default()
        };
        assert!(validate_config(&config).is_err());
    }
}
