//! Native capture device integration
//!
//! Adapts cameras opened through nokhwa to the [`DeviceAdapter`] and
//! [`FrameSource`] interfaces the control loop consumes.
//!
//! [`DeviceAdapter`]: crate::device::DeviceAdapter
//! [`FrameSource`]: crate::device::FrameSource

pub mod nokhwa_camera;

pub use nokhwa_camera::{
    capabilities_from_range, list_devices, DeviceSummary, ExposureRange, NokhwaCamera,
};
