//! Configuration layer: typed settings with layered precedence (file → env).

use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheConfig, DEFAULT_NAMESPACE};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "fqc";
const ENV_PREFIX: &str = "FQC";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: CacheConfig,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Where to read settings from, beyond the implicit defaults.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Required file layered over `config/default` and `fqc`.
    pub config_file: Option<PathBuf>,
    /// Ignore `FQC__*` environment variables.
    pub skip_environment: bool,
}

/// Load settings using the configured precedence (file → explicit file → environment).
pub fn load(options: &LoadOptions) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = options.config_file.as_deref() {
        builder = builder.add_source(File::from(path).required(true));
    }

    if !options.skip_environment {
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));
    }

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

/// Load settings from a single file, ignoring environment variables.
pub fn load_file(path: &Path) -> Result<Settings, LoadError> {
    load(&LoadOptions {
        config_file: Some(path.to_path_buf()),
        skip_environment: true,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    cache: RawCacheSettings,
    logging: RawLoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    namespace: Option<String>,
    in_memory_capacity: Option<u64>,
    max_entry_bytes: Option<u64>,
    max_concurrent_writes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            cache: build_cache_settings(raw.cache)?,
            logging: build_logging_settings(raw.logging)?,
        })
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let namespace = match cache.namespace {
        Some(value) if value.trim().is_empty() => {
            return Err(LoadError::invalid(
                "cache.namespace",
                "must not be empty; entries would share keys with other store users",
            ));
        }
        Some(value) => value,
        None => DEFAULT_NAMESPACE.to_string(),
    };

    Ok(CacheConfig {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        namespace,
        in_memory_capacity: positive_usize(
            "cache.in_memory_capacity",
            cache.in_memory_capacity,
            defaults.in_memory_capacity,
        )?,
        max_entry_bytes: cache
            .max_entry_bytes
            .map(|value| positive_usize("cache.max_entry_bytes", Some(value), 0))
            .transpose()?,
        max_concurrent_writes: positive_usize(
            "cache.max_concurrent_writes",
            cache.max_concurrent_writes,
            defaults.max_concurrent_writes,
        )?,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn positive_usize(key: &'static str, value: Option<u64>, default: usize) -> Result<usize, LoadError> {
    let Some(value) = value else {
        return Ok(default);
    };
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    usize::try_from(value)
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))
}
