//! CrabExposure: closed-loop auto exposure for live cameras in Tauri applications
//!
//! This crate keeps a camera's picture brightness near a target by sampling
//! the live feed and steering the device's manual exposure time.
//!
//! # Features
//! - Centered-window, random-sample Average Picture Level estimation
//! - Proportional exposure control with dead-band and rate limiting
//! - Single-flight, non-blocking device applies on a tokio loop
//! - Native camera support through nokhwa
//! - Offline simulation for tests and tuning
//!
//! # Usage
//! Add this to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! crabexposure = "0.1"
//! tauri = { version = "2.0", features = ["protocol-asset"] }
//! ```
//!
//! Then in your Tauri app:
//! ```rust,ignore
//! use crabexposure;
//!
//! fn main() {
//!     tauri::Builder::default()
//!         .plugin(crabexposure::init())
//!         .run(tauri::generate_context!())
//!         .expect("error while running tauri application");
//! }
//! ```
//!
//! Or drive the loop directly:
//! ```rust,ignore
//! let camera = crabexposure::platform::NokhwaCamera::open("0")?;
//! camera.start_stream()?;
//! let handle = crabexposure::AutoExposure::new(Default::default())
//!     .start(std::sync::Arc::new(camera.clone()), Box::new(camera));
//! // ...
//! handle.stop().await?;
//! ```
pub mod apl;
pub mod commands;
pub mod config;
pub mod controller;
pub mod device;
pub mod errors;
pub mod events;
pub mod invariants;
pub mod platform;
pub mod scheduler;
pub mod types;
pub mod window;

// Testing utilities - simulated camera and synthetic frames for offline testing
pub mod testing;

// Re-exports for convenience
pub use apl::AplEstimator;
pub use config::AutoExposureConfig;
pub use controller::{ControlState, ControllerStatus, ExposureController};
pub use device::{DeviceAdapter, FrameSource};
pub use errors::ExposureError;
pub use events::ControllerEvent;
pub use scheduler::{
    AutoExposure, AutoExposureHandle, HostTicker, IntervalTicker, TickSource, TickTrigger,
};
pub use types::{
    ConstraintRequest, ExposureCapabilities, ExposureMode, PixelBuffer, SamplingWindow,
};
pub use window::{CenteredSquare, WindowSelector};

use tauri::{
    plugin::{Builder, TauriPlugin},
    Runtime,
};

/// Initialize the CrabExposure plugin with all commands
pub fn init<R: Runtime>() -> TauriPlugin<R> {
    Builder::new("crabexposure")
        .invoke_handler(tauri::generate_handler![
            // Configuration commands
            commands::config::get_exposure_config,
            commands::config::update_exposure_config,
            commands::config::reset_exposure_config,
            commands::config::get_control_config,
            commands::config::get_sampling_config,
            // Analysis commands
            commands::analysis::compute_sampling_window,
            commands::analysis::estimate_frame_apl,
            // Session commands
            commands::session::list_exposure_devices,
            commands::session::start_auto_exposure,
            commands::session::stop_auto_exposure,
            commands::session::get_auto_exposure_status,
            commands::session::poll_auto_exposure_event,
            commands::session::list_auto_exposure_sessions,
        ])
        .build()
}

/// Initialize logging for the exposure controller
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabexposure=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "crabexposure");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
        assert!(std::env::var("RUST_LOG").is_ok());
    }
}
