use std::{collections::BTreeMap, time::Duration};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::PlacementKey;

pub use toml::de::Error as TomlError;

/// Upper bound of every configured duration
pub const MAX_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Lower bound of the rotation intervals, the progress advances every `interval / 100`
pub const MIN_ROTATION_INTERVAL: Duration = Duration::from_millis(100);

pub static PRODUCTION_CONFIG: Lazy<Config> = Lazy::new(|| {
    Config::try_toml(include_str!("../../docs/config/prod.toml"))
        .expect("Failed to parse prod.toml config file")
});

pub static DEVELOPMENT_CONFIG: Lazy<Config> = Lazy::new(|| {
    Config::try_toml(include_str!("../../docs/config/dev.toml"))
        .expect("Failed to parse dev.toml config file")
});

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "camelCase")]
/// The environment in which the application is running
/// Defaults to [`Environment::Development`]
pub enum Environment {
    /// Short TTLs and refresh periods, handy with a local ad service.
    Development,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Self::Development
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all(serialize = "SCREAMING_SNAKE_CASE"))]
pub struct Config {
    /// A cached placement older than this is stale.
    /// In milliseconds
    #[serde(with = "serde_millis")]
    pub cache_ttl: Duration,
    /// How often all configured placements are refreshed.
    /// In milliseconds
    #[serde(with = "serde_millis")]
    pub global_refresh_period: Duration,
    /// Upper bound for a single `fetch_ads` or `report_click` call.
    /// In milliseconds
    #[serde(with = "serde_millis")]
    pub fetch_timeout: Duration,
    /// Rotation interval for placements without their own `interval`.
    /// In milliseconds
    #[serde(with = "serde_millis")]
    pub default_interval: Duration,
    /// How often a mounted slot re-applies the eligibility filter
    /// to the cached ads when nothing new was fetched.
    /// In milliseconds
    #[serde(with = "serde_millis")]
    pub eligibility_recheck: Duration,
    /// When `true`, a manual selection pauses auto-rotation of the slot
    /// until it's resumed or a new eligible list arrives.
    ///
    /// default: `false`
    #[serde(default)]
    pub pause_on_manual_select: bool,
    /// The placements known to the application.
    /// These are the ones refreshed by the global refresh.
    #[serde(rename = "placement")]
    pub placements: BTreeMap<PlacementKey, PlacementConfig>,
}

/// Configured placement
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementConfig {
    /// Rotation interval of the slots showing this placement.
    /// In milliseconds
    #[serde(with = "serde_millis")]
    pub interval: Duration,
}

impl Config {
    /// Utility method that will deserialize a Toml file content into a [`Config`].
    ///
    /// Instead of relying on the `toml` crate directly, use this method instead.
    /// The parsed config is [validated](Config::validate).
    pub fn try_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;

        Ok(config)
    }

    /// Checks that every duration is within [`MAX_DURATION`],
    /// that the periods and the timeout are non-zero
    /// and that rotation intervals are at least [`MIN_ROTATION_INTERVAL`].
    ///
    /// `cache_ttl` may be zero, every placement is then stale as soon as any time passes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("global_refresh_period", self.global_refresh_period),
            ("fetch_timeout", self.fetch_timeout),
            ("eligibility_recheck", self.eligibility_recheck),
        ];
        let intervals = std::iter::once(("default_interval".to_string(), self.default_interval))
            .chain(self.placements.iter().map(|(placement, config)| {
                (format!("placement.{placement}.interval"), config.interval)
            }));

        check_max("cache_ttl", self.cache_ttl)?;

        for (field, duration) in non_zero {
            if duration.is_zero() {
                return Err(ConfigError::Invalid {
                    field: field.to_string(),
                    reason: "must be greater than 0".to_string(),
                });
            }
            check_max(field, duration)?;
        }

        for (field, interval) in intervals {
            if interval < MIN_ROTATION_INTERVAL {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be at least {MIN_ROTATION_INTERVAL:?}"),
                });
            }
            check_max(&field, interval)?;
        }

        Ok(())
    }

    /// The rotation interval for a placement,
    /// falls back to [`Config::default_interval`] for unknown placements.
    pub fn interval_for(&self, placement: &PlacementKey) -> Duration {
        self.placements
            .get(placement)
            .map(|placement| placement.interval)
            .unwrap_or(self.default_interval)
    }

    pub fn placement_keys(&self) -> Vec<PlacementKey> {
        self.placements.keys().cloned().collect()
    }
}

fn check_max(field: &str, duration: Duration) -> Result<(), ConfigError> {
    if duration > MAX_DURATION {
        return Err(ConfigError::Invalid {
            field: field.to_string(),
            reason: format!("must be at most {MAX_DURATION:?}"),
        });
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Toml parsing: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("File reading: {0}")]
    InvalidFile(#[from] std::io::Error),
    #[error("Invalid `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

/// If no `config_file` path is provided it will load the [`Environment`] configuration.
/// If `config_file` path is provided it will try to read and parse the file in Toml format.
pub fn configuration(
    environment: Environment,
    config_file: Option<&str>,
) -> Result<Config, ConfigError> {
    match config_file {
        Some(config_file) => {
            let content = std::fs::read_to_string(config_file)?;

            Config::try_toml(&content)
        }
        None => match environment {
            Environment::Production => Ok(PRODUCTION_CONFIG.clone()),
            Environment::Development => Ok(DEVELOPMENT_CONFIG.clone()),
        },
    }
}
