//! Configuration loading with Figment.
//!
//! Configuration is merged from:
//! 1. `config/default.toml` (or a file given explicitly)
//! 2. Environment variables prefixed with `PI_SCAN_`, using `__` between
//!    nested keys (e.g. `PI_SCAN_CONTROLLER__HOST=10.0.0.5`)
//!
//! Every section has defaults, so a missing file or a partial file is fine.
//!
//! # Example
//! ```no_run
//! use pi_scan::config::ScanConfig;
//!
//! let config = ScanConfig::load()?;
//! config.validate()?;
//! println!("Controller: {}:{}", config.controller.host, config.controller.port);
//! # Ok::<(), pi_scan::error::ScanError>(())
//! ```

use crate::error::{ScanError, ScanResult};
use crate::logging::{parse_log_level, OutputFormat};
use crate::params::{Axis, AxisAssignment, Limits, ScanParameters};
use crate::protocol::DEFAULT_PORT;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "PI_SCAN_";

/// Upper bound on a single socket read.
const MAX_READ_TIMEOUT_MS: u64 = 60_000;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub axes: AxisAssignment,
    /// Initial scan parameters
    #[serde(default)]
    pub scan: ScanParameters,
}

/// Application-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Connection to the motion controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Log commands instead of sending them
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Bound on a single socket read before it is retried
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Pause between setup and start
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dry_run: false,
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            settle_delay_ms: default_settle_delay(),
        }
    }
}

impl ControllerSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_read_timeout() -> u64 {
    1000
}

fn default_settle_delay() -> u64 {
    1000
}

impl ScanConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> ScanResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> ScanResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Semantic checks a well-formed file can still fail.
    pub fn validate(&self) -> ScanResult<()> {
        parse_log_level(&self.application.log_level).map_err(ScanError::Configuration)?;

        let controller = &self.controller;
        if controller.host.trim().is_empty() {
            return Err(ScanError::Configuration(
                "controller.host cannot be empty".to_string(),
            ));
        }
        if controller.port == 0 {
            return Err(ScanError::Configuration(
                "controller.port must be greater than 0".to_string(),
            ));
        }
        if !(1..=MAX_READ_TIMEOUT_MS).contains(&controller.read_timeout_ms) {
            return Err(ScanError::Configuration(format!(
                "controller.read_timeout_ms = {} is outside 1..={MAX_READ_TIMEOUT_MS}",
                controller.read_timeout_ms
            )));
        }
        if self.controller.connect_timeout_ms == 0 {
            return Err(ScanError::Configuration(
                "controller.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        for axis in Axis::ALL {
            let range = self.limits.range(axis);
            if !(range.min.is_finite() && range.max.is_finite() && range.min < range.max) {
                return Err(ScanError::Configuration(format!(
                    "limits.{axis}: min ({}) must be below max ({})",
                    range.min, range.max
                )));
            }
        }
        if self.limits.max_datapoints == 0 {
            return Err(ScanError::Configuration(
                "limits.max_datapoints must be greater than 0".to_string(),
            ));
        }

        let mut tables: Vec<u8> = Axis::ALL.iter().map(|&a| self.axes.channel(a).table).collect();
        let mut physical: Vec<u8> = Axis::ALL.iter().map(|&a| self.axes.channel(a).axis).collect();
        tables.sort_unstable();
        tables.dedup();
        physical.sort_unstable();
        physical.dedup();
        if tables.len() != 3 || physical.len() != 3 {
            return Err(ScanError::Configuration(
                "axes: every axis needs its own wavetable and physical axis".to_string(),
            ));
        }

        Ok(())
    }
}
