//! Configuration layer: typed settings with layered precedence (files → environment).

use std::{num::NonZeroUsize, path::Path, str::FromStr, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{
    DEFAULT_KEY_MEMO_CAPACITY, DEFAULT_MAX_TIMER_DELAY_SECS, InvalidationBehavior, RefetchPolicy,
    Retention,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "endpoint-cache";
const ENV_PREFIX: &str = "ENDPOINT_CACHE";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api: ApiSettings,
    pub logging: LoggingSettings,
}

/// Cache behavior shared by every endpoint unless overridden per endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiSettings {
    pub keep_unused_data_for: Retention,
    pub refetch_on_mount_or_arg_change: RefetchPolicy,
    pub refetch_on_focus: bool,
    pub refetch_on_reconnect: bool,
    pub invalidation_behavior: InvalidationBehavior,
    pub max_timer_delay: Duration,
    pub key_memo_capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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

/// Load settings using the configured precedence.
///
/// `config/default.*` and `endpoint-cache.*` are optional; `config_file` is
/// required when given. Environment variables such as
/// `ENDPOINT_CACHE__API__REFETCH_ON_FOCUS` win over every file.
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api: ApiSettings::default(),
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            keep_unused_data_for: Retention::default(),
            refetch_on_mount_or_arg_change: RefetchPolicy::Never,
            refetch_on_focus: false,
            refetch_on_reconnect: false,
            invalidation_behavior: InvalidationBehavior::Delayed,
            max_timer_delay: Duration::from_secs(DEFAULT_MAX_TIMER_DELAY_SECS),
            key_memo_capacity: NonZeroUsize::new(DEFAULT_KEY_MEMO_CAPACITY)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    api: RawApiSettings,
    logging: RawLoggingSettings,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { api, logging } = raw;

        let api = build_api_settings(api)?;
        let logging = build_logging_settings(logging)?;

        Ok(Self { api, logging })
    }
}

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let keep_unused_data_for = match api.keep_unused_data_for {
        Some(secs) if secs.is_nan() || secs < 0.0 => {
            return Err(LoadError::invalid(
                "api.keep_unused_data_for",
                "must be a non-negative number of seconds",
            ));
        }
        Some(secs) if secs.is_infinite() => Retention::Forever,
        Some(secs) => Retention::Seconds(secs),
        None => Retention::default(),
    };

    let refetch_on_mount_or_arg_change = match api.refetch_on_mount_or_arg_change {
        None | Some(RawRefetch::Flag(false)) => RefetchPolicy::Never,
        Some(RawRefetch::Flag(true)) => RefetchPolicy::Always,
        Some(RawRefetch::Seconds(secs)) => {
            let max_age = Duration::try_from_secs_f64(secs).map_err(|err| {
                LoadError::invalid("api.refetch_on_mount_or_arg_change", err.to_string())
            })?;
            RefetchPolicy::IfOlderThan(max_age)
        }
    };

    let invalidation_behavior = match api.invalidation_behavior.as_deref() {
        None | Some("delayed") => InvalidationBehavior::Delayed,
        Some("immediate") => InvalidationBehavior::Immediate,
        Some(other) => {
            return Err(LoadError::invalid(
                "api.invalidation_behavior",
                format!("expected `delayed` or `immediate`, got `{other}`"),
            ));
        }
    };

    let max_timer_delay_secs = api
        .max_timer_delay_seconds
        .unwrap_or(DEFAULT_MAX_TIMER_DELAY_SECS);
    if max_timer_delay_secs == 0 {
        return Err(LoadError::invalid(
            "api.max_timer_delay_seconds",
            "must be greater than zero",
        ));
    }

    let key_memo_capacity = non_zero_usize(
        api.key_memo_capacity.unwrap_or(DEFAULT_KEY_MEMO_CAPACITY as u64),
        "api.key_memo_capacity",
    )?;

    Ok(ApiSettings {
        keep_unused_data_for,
        refetch_on_mount_or_arg_change,
        refetch_on_focus: api.refetch_on_focus.unwrap_or(false),
        refetch_on_reconnect: api.refetch_on_reconnect.unwrap_or(false),
        invalidation_behavior,
        max_timer_delay: Duration::from_secs(max_timer_delay_secs),
        key_memo_capacity,
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

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiSettings {
    keep_unused_data_for: Option<f64>,
    refetch_on_mount_or_arg_change: Option<RawRefetch>,
    refetch_on_focus: Option<bool>,
    refetch_on_reconnect: Option<bool>,
    invalidation_behavior: Option<String>,
    max_timer_delay_seconds: Option<u64>,
    key_memo_capacity: Option<u64>,
}

/// `true`/`false`, or a maximum age in seconds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum RawRefetch {
    Flag(bool),
    Seconds(f64),
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests;
