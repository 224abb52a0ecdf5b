use crate::config::{AutoExposureConfig, ControlConfig, SamplingConfig};
use std::sync::{Arc, RwLock};
use tauri::command;

lazy_static::lazy_static! {
    static ref GLOBAL_CONFIG: Arc<RwLock<AutoExposureConfig>> = Arc::new(RwLock::new(AutoExposureConfig::load_or_default()));
}

/// Snapshot of the configuration new sessions start with
pub fn current_config() -> Result<AutoExposureConfig, String> {
    let config = GLOBAL_CONFIG.read().map_err(|e| e.to_string())?;
    Ok(config.clone())
}

/// Get the current configuration
#[command]
pub async fn get_exposure_config() -> Result<AutoExposureConfig, String> {
    current_config()
}

/// Update configuration
#[command]
pub async fn update_exposure_config(new_config: AutoExposureConfig) -> Result<(), String> {
    new_config.validate()?;

    {
        let mut config = GLOBAL_CONFIG.write().map_err(|e| e.to_string())?;
        *config = new_config.clone();
    }

    new_config
        .save_to_file(AutoExposureConfig::default_path())
        .map_err(|e| e.to_string())?;

    Ok(())
}

/// Reset configuration to defaults
#[command]
pub async fn reset_exposure_config() -> Result<AutoExposureConfig, String> {
    let default_config = AutoExposureConfig::default();

    {
        let mut config = GLOBAL_CONFIG
            .write()
            .map_err(|e| format!("Failed to write config: {}", e))?;
        *config = default_config.clone();
    }

    default_config
        .save_to_file(AutoExposureConfig::default_path())
        .map_err(|e| e.to_string())?;

    Ok(default_config)
}

/// Get control loop configuration
#[command]
pub async fn get_control_config() -> Result<ControlConfig, String> {
    let config = GLOBAL_CONFIG.read().map_err(|e| e.to_string())?;
    Ok(config.control.clone())
}

/// Get sampling configuration
#[command]
pub async fn get_sampling_config() -> Result<SamplingConfig, String> {
    let config = GLOBAL_CONFIG.read().map_err(|e| e.to_string())?;
    Ok(config.sampling.clone())
}
