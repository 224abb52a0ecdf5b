//! Synthetic frames and device presets
//!
//! Frames and capability snapshots that look like what real UVC webcams
//! report, so the control loop can be exercised without hardware.

use crate::types::{ExposureCapabilities, ExposureMode, PixelBuffer};

/// Create an RGBA frame whose mean luma is close to `level`.
///
/// A diagonal ripple of +/- `texture` is laid over the level so that random
/// sampling sees real variance; `texture = 0` gives a uniform gray frame.
pub fn synthetic_rgba_frame(width: u32, height: u32, level: u8, texture: u8) -> PixelBuffer {
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let value = ripple(level, texture, x, y);
            data.extend_from_slice(&[value, value, value, 255]);
        }
    }
    PixelBuffer::from_rgba(width, height, data)
}

/// Gray value of the synthetic pattern at one pixel
pub(crate) fn ripple(level: u8, texture: u8, x: u32, y: u32) -> u8 {
    if texture == 0 {
        return level;
    }
    // Symmetric triangle wave over a 4-pixel diagonal period: -t, 0, +t, 0
    let offset = match (x + y) % 4 {
        0 => -i16::from(texture),
        2 => i16::from(texture),
        _ => 0,
    };
    (i16::from(level) + offset).clamp(0, 255) as u8
}

/// Exposure range typical of UVC webcams (`exposure_absolute`, 100us units)
pub fn uvc_webcam_capabilities() -> ExposureCapabilities {
    ExposureCapabilities::manual_range(3.0, 2047.0)
        .with_step(1.0)
        .with_modes(vec![ExposureMode::Manual, ExposureMode::Continuous])
}

/// Device with a fixed, auto-only exposure
pub fn fixed_exposure_capabilities() -> ExposureCapabilities {
    ExposureCapabilities::unsupported().with_modes(vec![ExposureMode::Continuous])
}
