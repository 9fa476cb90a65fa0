//! Plot configuration
//!
//! Settings can come from a YAML file and from the command line. Values
//! given on the command line win.
//!
//! ```yaml
//! window: 500
//! labels: [mag, temp]
//! checksum: xor
//! discovery:
//!   observations: 200
//!   max_channels: 4
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use telemplot::record::DiscoveryPolicy;
use telemplot::Integrity;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid value for '{key}': {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    pub observations: Option<usize>,
    pub max_channels: Option<usize>,
    pub deadline_s: Option<f64>,
}

/// Everything `telem-plot` can be configured with besides the url.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlotConfig {
    /// Rows kept per channel.
    pub window: Option<usize>,
    /// Channels to plot. Discovered when absent.
    pub labels: Option<Vec<String>>,
    /// `none` or `xor`.
    pub checksum: Option<String>,
    pub fps: Option<u64>,
    pub discovery: DiscoveryConfig,
}

pub const DEFAULT_WINDOW: usize = 300;
pub const DEFAULT_FPS: u64 = 20;

impl PlotConfig {
    pub fn parse(yaml: &str) -> Result<PlotConfig, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<PlotConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        PlotConfig::parse(&content)
    }

    /// Fills every unset value in `self` from `base`.
    pub fn or(self, base: PlotConfig) -> PlotConfig {
        PlotConfig {
            window: self.window.or(base.window),
            labels: self.labels.or(base.labels),
            checksum: self.checksum.or(base.checksum),
            fps: self.fps.or(base.fps),
            discovery: DiscoveryConfig {
                observations: self.discovery.observations.or(base.discovery.observations),
                max_channels: self.discovery.max_channels.or(base.discovery.max_channels),
                deadline_s: self.discovery.deadline_s.or(base.discovery.deadline_s),
            },
        }
    }

    pub fn window(&self) -> usize {
        self.window.unwrap_or(DEFAULT_WINDOW).max(2)
    }

    pub fn fps(&self) -> u64 {
        self.fps.unwrap_or(DEFAULT_FPS).clamp(1, 120)
    }

    pub fn integrity(&self) -> Result<Integrity, ConfigError> {
        match &self.checksum {
            None => Ok(Integrity::default()),
            Some(name) => name.parse().map_err(|message| ConfigError::Invalid {
                key: "checksum",
                message,
            }),
        }
    }

    pub fn discovery_policy(&self) -> Result<DiscoveryPolicy, ConfigError> {
        let defaults = DiscoveryPolicy::default();
        let d = &self.discovery;
        let deadline = match d.deadline_s {
            None => defaults.deadline,
            Some(s) if s.is_finite() && s > 0.0 => Duration::from_secs_f64(s),
            Some(s) => {
                return Err(ConfigError::Invalid {
                    key: "discovery.deadline_s",
                    message: format!("{} is not a positive number of seconds", s),
                })
            }
        };
        let policy = DiscoveryPolicy {
            observations: d.observations.unwrap_or(defaults.observations),
            max_channels: d.max_channels.unwrap_or(defaults.max_channels),
            deadline,
        };
        if policy.observations == 0 {
            return Err(ConfigError::Invalid {
                key: "discovery.observations",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(policy)
    }

    /// Labels to use, if the user named any.
    pub fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref().filter(|l| !l.is_empty())
    }
}
