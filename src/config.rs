//! Configuration System using Figment
//!
//! Strongly-typed configuration for the acquisition service. Configuration is
//! loaded from:
//! 1. `config/acquisition.toml` (base configuration)
//! 2. Environment variables (prefixed with `SPECTROPOL_`, nested keys separated by `__`)
//!
//! Every section has defaults, so a missing file yields a usable configuration.
//!
//! # Example
//! ```no_run
//! use spectropol_daq::config::AcquisitionConfig;
//!
//! let config = AcquisitionConfig::load()?;
//! println!("Data root: {}", config.acquisition.data_root.display());
//! # Ok::<(), spectropol_daq::error::AcquisitionError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::acquisition::archive::ArchiveReopen;
use crate::error::{AcqResult, AcquisitionError};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/acquisition.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SPECTROPOL_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Scripted-run settings
    #[serde(default)]
    pub acquisition: RunSettings,
    /// Simulated rig parameters
    #[serde(default)]
    pub rig: RigSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "spectropol-daq".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Settings for scripted acquisition runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    /// Directory that relative archive paths in scripts are resolved against
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    /// Upper bound on the wait for each capture-complete signal
    #[serde(default = "default_capture_timeout")]
    pub capture_timeout_ms: u64,
    /// What to do with the data regions of an archive that already exists
    #[serde(default)]
    pub archive_reopen: ArchiveReopen,
}

impl RunSettings {
    /// Capture timeout as a `Duration`
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            capture_timeout_ms: default_capture_timeout(),
            archive_reopen: ArchiveReopen::default(),
        }
    }
}

/// Parameters of the simulated rig used by the CLI and tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigSettings {
    /// Sensor width in pixels
    pub sensor_width: u32,
    /// Sensor height in pixels
    pub sensor_height: u32,
    /// Lower bound of the tunable filter range (nm)
    pub wavelength_min_nm: f64,
    /// Upper bound of the tunable filter range (nm)
    pub wavelength_max_nm: f64,
    /// Sensor readout time added to each exposure
    pub readout_ms: u64,
    /// Rotator speed; 0 moves instantly
    pub rotator_speed_deg_per_sec: f64,
    /// Settling time after each rotator move
    pub settle_ms: u64,
}

impl Default for RigSettings {
    fn default() -> Self {
        Self {
            sensor_width: 640,
            sensor_height: 480,
            wavelength_min_nm: 420.0,
            wavelength_max_nm: 730.0,
            readout_ms: 33,
            rotator_speed_deg_per_sec: 90.0,
            settle_ms: 50,
        }
    }
}

// Default value functions
fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_capture_timeout() -> u64 {
    10_000
}

impl AcquisitionConfig {
    /// Load configuration from `config/acquisition.toml` and environment variables
    ///
    /// Environment variables override file values, e.g.
    /// `SPECTROPOL_ACQUISITION__CAPTURE_TIMEOUT_MS=2000`.
    pub fn load() -> AcqResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AcqResult<Self> {
        Self::figment(path.as_ref()).extract().map_err(Into::into)
    }

    /// The provider stack: defaults, then the TOML file, then the environment.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AcquisitionConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AcqResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(AcquisitionError::Config(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.acquisition.capture_timeout_ms == 0 {
            return Err(AcquisitionError::Config(
                "capture_timeout_ms must be greater than 0".to_string(),
            ));
        }

        let rig = &self.rig;
        if rig.sensor_width == 0 || rig.sensor_height == 0 {
            return Err(AcquisitionError::Config(format!(
                "Invalid sensor size {}x{}",
                rig.sensor_width, rig.sensor_height
            )));
        }
        if !(rig.wavelength_min_nm.is_finite()
            && rig.wavelength_max_nm.is_finite()
            && rig.wavelength_min_nm < rig.wavelength_max_nm)
        {
            return Err(AcquisitionError::Config(format!(
                "Invalid wavelength range [{}, {}] nm",
                rig.wavelength_min_nm, rig.wavelength_max_nm
            )));
        }
        if rig.rotator_speed_deg_per_sec < 0.0 {
            return Err(AcquisitionError::Config(
                "rotator_speed_deg_per_sec must not be negative".to_string(),
            ));
        }

        Ok(())
    }
}
