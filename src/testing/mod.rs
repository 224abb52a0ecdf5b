//! Testing utilities for CrabExposure
//!
//! Provides a simulated camera and synthetic frames for exercising the
//! control loop offline.

pub mod simulated;
pub mod synthetic_data;

pub use simulated::{AppliedConstraint, SimulatedCamera};
pub use synthetic_data::{
    fixed_exposure_capabilities, synthetic_rgba_frame, uvc_webcam_capabilities,
};
