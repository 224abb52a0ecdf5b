//! Configuration management for CrabExposure
//!
//! Provides loading, saving and validation of the control, sampling and
//! scheduling parameters of the auto-exposure loop.

use crate::errors::ExposureError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoExposureConfig {
    pub control: ControlConfig,
    pub sampling: SamplingConfig,
    pub scheduler: SchedulerConfig,
}

/// Feedback loop parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Target APL on the 0-255 luma scale
    pub target_apl: f64,
    /// Half-width of the dead-band around the target
    pub min_apl_difference: f64,
    /// Minimum time between committed adjustments in milliseconds
    pub update_interval_ms: u64,
    /// Exposure time assumed before the device reports anything
    pub default_exposure_time: f64,
}

/// Luminance sampling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Random pixels drawn per estimate
    pub num_samples: usize,
    /// Side of the centered sampling square relative to the shorter frame edge
    pub window_ratio: f64,
    /// Grow the sample count with windows larger than 200x200
    pub scale_with_window: bool,
    /// Fixed RNG seed; makes estimates reproducible when set
    pub seed: Option<u64>,
}

/// Tick source parameters for hosts without a display refresh callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Period between ticks in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            target_apl: 100.0,
            min_apl_difference: 5.0,
            update_interval_ms: 200,
            default_exposure_time: 500.0,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            num_samples: crate::apl::DEFAULT_NUM_SAMPLES,
            window_ratio: crate::window::DEFAULT_WINDOW_RATIO,
            scale_with_window: false,
            seed: None,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
        }
    }
}

impl Default for AutoExposureConfig {
    fn default() -> Self {
        Self {
            control: ControlConfig::default(),
            sampling: SamplingConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl AutoExposureConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ExposureError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            ExposureError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let config: AutoExposureConfig = toml::from_str(&contents).map_err(|e| {
            ExposureError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate().map_err(ExposureError::ConfigError)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ExposureError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ExposureError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = self.to_toml()?;

        fs::write(path, toml_string).map_err(|e| {
            ExposureError::ConfigError(format!("Failed to write config file: {}", e))
        })?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Render as pretty TOML
    pub fn to_toml(&self) -> Result<String, ExposureError> {
        toml::to_string_pretty(self)
            .map_err(|e| ExposureError::ConfigError(format!("Failed to serialize config: {}", e)))
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabexposure.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.control.update_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.tick_interval_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        let control = &self.control;
        if !(control.target_apl > 0.0 && control.target_apl <= 255.0) {
            return Err("Target APL must be within (0, 255]".to_string());
        }
        if !(control.min_apl_difference >= 0.0 && control.min_apl_difference.is_finite()) {
            return Err("APL dead-band must be a finite non-negative value".to_string());
        }
        if control.update_interval_ms == 0 {
            return Err("Update interval must be at least 1 ms".to_string());
        }
        if !(control.default_exposure_time > 0.0 && control.default_exposure_time.is_finite()) {
            return Err("Default exposure time must be positive".to_string());
        }

        if self.sampling.num_samples == 0 {
            return Err("Sample count must be at least 1".to_string());
        }
        if !(self.sampling.window_ratio > 0.0 && self.sampling.window_ratio <= 1.0) {
            return Err("Window ratio must be within (0, 1]".to_string());
        }

        if self.scheduler.tick_interval_ms == 0 {
            return Err("Tick interval must be at least 1 ms".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AutoExposureConfig::default();
        assert_eq!(config.control.target_apl, 100.0);
        assert_eq!(config.control.min_apl_difference, 5.0);
        assert_eq!(config.update_interval(), Duration::from_millis(200));
        assert_eq!(config.control.default_exposure_time, 500.0);
        assert_eq!(config.sampling.num_samples, 1000);
        assert_eq!(config.sampling.window_ratio, 0.2);
        assert!(config.sampling.seed.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad = AutoExposureConfig::default();
        bad.control.target_apl = 0.0;
        assert!(bad.validate().is_err());

        let mut bad = AutoExposureConfig::default();
        bad.sampling.window_ratio = 1.5;
        assert!(bad.validate().is_err());

        let mut bad = AutoExposureConfig::default();
        bad.sampling.num_samples = 0;
        assert!(bad.validate().is_err());

        let mut bad = AutoExposureConfig::default();
        bad.control.min_apl_difference = f64::NAN;
        assert!(bad.validate().is_err());

        let mut bad = AutoExposureConfig::default();
        bad.scheduler.tick_interval_ms = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("nested").join("crabexposure.toml");

        let mut config = AutoExposureConfig::default();
        config.control.target_apl = 120.0;
        config.sampling.seed = Some(9);
        config.save_to_file(&config_path).unwrap();

        let loaded = AutoExposureConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("partial.toml");
        fs::write(&config_path, "[control]\ntarget_apl = 80.0\n").unwrap();

        let loaded = AutoExposureConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.control.target_apl, 80.0);
        assert_eq!(loaded.control.update_interval_ms, 200);
        assert_eq!(loaded.sampling.num_samples, 1000);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("bad.toml");
        fs::write(&config_path, "[sampling]\nwindow_ratio = 0.0\n").unwrap();

        let result = AutoExposureConfig::load_from_file(&config_path);
        assert!(matches!(result, Err(ExposureError::ConfigError(_))));
    }

    #[test]
    fn test_config_toml_format() {
        let toml_string = AutoExposureConfig::default().to_toml().unwrap();
        assert!(toml_string.contains("[control]"));
        assert!(toml_string.contains("[sampling]"));
        assert!(toml_string.contains("[scheduler]"));
        assert!(toml_string.contains("target_apl"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = AutoExposureConfig::load_from_file("nonexistent_crabexposure.toml");
        assert_eq!(result.unwrap(), AutoExposureConfig::default());
    }
}
