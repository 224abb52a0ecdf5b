//! Core data types shared across the exposure control loop.

use serde::{Deserialize, Serialize};

/// Bytes per pixel in RGBA buffers handed to the estimator
pub const RGBA_CHANNELS: usize = 4;

/// Pixel-space rectangle sampled each tick.
///
/// Recomputed from the current frame dimensions on every tick and never
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SamplingWindow {
    pub start_x: u32,
    pub start_y: u32,
    pub width: u32,
    pub height: u32,
}

impl SamplingWindow {
    pub fn new(start_x: u32, start_y: u32, width: u32, height: u32) -> Self {
        Self {
            start_x,
            start_y,
            width,
            height,
        }
    }

    /// Window covering nothing; callers skip sampling for it
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// True when the window lies entirely inside a `frame_width` x `frame_height` frame
    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        let right = u64::from(self.start_x) + u64::from(self.width);
        let bottom = u64::from(self.start_y) + u64::from(self.height);
        right <= u64::from(frame_width) && bottom <= u64::from(frame_height)
    }
}

/// Exposure mode a device can be switched into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExposureMode {
    /// Exposure time set explicitly by the controller
    Manual,
    /// Device computes exposure on its own
    Continuous,
}

impl ExposureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExposureMode::Manual => "manual",
            ExposureMode::Continuous => "continuous",
        }
    }
}

/// Read-only snapshot of what a device reports about exposure control.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExposureCapabilities {
    pub min_time: Option<f64>,
    pub max_time: Option<f64>,
    pub step_time: Option<f64>,
    /// Exposure time the device holds when queried
    #[serde(default)]
    pub current_time: Option<f64>,
    pub supported_modes: Vec<ExposureMode>,
}

impl ExposureCapabilities {
    /// Capabilities of a device with a manual exposure range
    pub fn manual_range(min_time: f64, max_time: f64) -> Self {
        Self {
            min_time: Some(min_time),
            max_time: Some(max_time),
            step_time: None,
            current_time: None,
            supported_modes: vec![ExposureMode::Manual, ExposureMode::Continuous],
        }
    }

    /// Capabilities of a device with no exposure control at all
    pub fn unsupported() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, step_time: f64) -> Self {
        self.step_time = Some(step_time);
        self
    }

    pub fn with_current(mut self, current_time: f64) -> Self {
        self.current_time = Some(current_time);
        self
    }

    pub fn with_modes(mut self, modes: Vec<ExposureMode>) -> Self {
        self.supported_modes = modes;
        self
    }

    pub fn supports_mode(&self, mode: ExposureMode) -> bool {
        self.supported_modes.contains(&mode)
    }

    /// Bounds of the exposure range when both ends are reported
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match (self.min_time, self.max_time) {
            (Some(min), Some(max)) if min <= max => Some((min, max)),
            _ => None,
        }
    }

    /// Manual control needs both range bounds and a manual mode
    pub fn supports_manual_control(&self) -> bool {
        self.bounds().is_some() && self.supports_mode(ExposureMode::Manual)
    }

    /// Clamp an exposure time into the reported range.
    ///
    /// Returns the value unchanged when bounds are missing.
    pub fn clamp(&self, value: f64) -> f64 {
        match self.bounds() {
            Some((min, max)) => value.clamp(min, max),
            None => value,
        }
    }

    /// Clamp, then snap to the nearest value the device can hold.
    ///
    /// Steps are counted from `min_time`. A snap past `max_time` falls back one
    /// step so the result stays in range.
    pub fn quantize(&self, value: f64) -> f64 {
        let clamped = self.clamp(value);
        match (self.bounds(), self.step_time) {
            (Some((min, max)), Some(step)) if step > 0.0 && step.is_finite() => {
                let snapped = min + ((clamped - min) / step).round() * step;
                if snapped > max {
                    (snapped - step).max(min)
                } else {
                    snapped
                }
            }
            _ => clamped,
        }
    }

    /// Exposure to start from: the device's own value if reported, else `fallback`
    pub fn starting_exposure(&self, fallback: f64) -> f64 {
        let value = self
            .current_time
            .filter(|current| current.is_finite())
            .unwrap_or(fallback);
        self.quantize(value)
    }
}

/// Constraint change issued to a device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConstraintRequest {
    Mode(ExposureMode),
    ExposureTime(f64),
}

/// RGBA pixel buffer filled by a frame source, 4 bytes per pixel in R,G,B,A order.
#[derive(Debug, Clone, Default)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let mut buffer = Self::default();
        buffer.resize(width, height);
        buffer
    }

    /// Wrap existing RGBA bytes
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// Reshape for a new region, reusing the allocation
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.data
            .resize(width as usize * height as usize * RGBA_CHANNELS, 0);
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_fits_within() {
        let window = SamplingWindow::new(10, 10, 20, 20);
        assert!(window.fits_within(30, 30));
        assert!(!window.fits_within(29, 30));
        assert!(!window.is_empty());
        assert_eq!(window.area(), 400);
        assert!(SamplingWindow::empty().is_empty());
    }

    #[test]
    fn test_capabilities_manual_control() {
        let caps = ExposureCapabilities::manual_range(50.0, 10000.0);
        assert!(caps.supports_manual_control());
        assert_eq!(caps.clamp(20000.0), 10000.0);
        assert_eq!(caps.clamp(1.0), 50.0);

        let no_manual = caps.clone().with_modes(vec![ExposureMode::Continuous]);
        assert!(!no_manual.supports_manual_control());

        assert!(!ExposureCapabilities::unsupported().supports_manual_control());
    }

    #[test]
    fn test_inverted_bounds_are_not_a_range() {
        let caps = ExposureCapabilities {
            min_time: Some(100.0),
            max_time: Some(10.0),
            step_time: None,
            current_time: None,
            supported_modes: vec![ExposureMode::Manual],
        };
        assert!(caps.bounds().is_none());
        assert!(!caps.supports_manual_control());
    }

    #[test]
    fn test_quantize_snaps_to_step() {
        let caps = ExposureCapabilities::manual_range(3.0, 2047.0).with_step(2.0);
        assert_eq!(caps.quantize(1249.6), 1249.0);
        assert_eq!(caps.quantize(1250.1), 1251.0);
        assert_eq!(caps.quantize(-5.0), 3.0);
        // 2047 is on the grid, 2046.9 rounds to it
        assert_eq!(caps.quantize(2046.9), 2047.0);

        let off_grid = ExposureCapabilities::manual_range(0.0, 10.0).with_step(4.0);
        assert_eq!(off_grid.quantize(10.0), 8.0);

        let no_step = ExposureCapabilities::manual_range(1.0, 100.0);
        assert_eq!(no_step.quantize(42.42), 42.42);
    }

    #[test]
    fn test_starting_exposure_prefers_device_value() {
        let caps = ExposureCapabilities::manual_range(3.0, 2047.0).with_step(1.0);
        assert_eq!(caps.starting_exposure(500.0), 500.0);
        assert_eq!(caps.clone().with_current(156.0).starting_exposure(500.0), 156.0);
        assert_eq!(caps.with_current(9000.0).starting_exposure(500.0), 2047.0);
    }

    #[test]
    fn test_pixel_buffer_resize() {
        let mut buffer = PixelBuffer::new(4, 2);
        assert_eq!(buffer.data.len(), 32);
        buffer.resize(2, 2);
        assert_eq!(buffer.data.len(), 16);
        assert_eq!(buffer.pixel_count(), 4);
    }
}
