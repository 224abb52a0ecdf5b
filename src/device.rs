//! Collaborator interfaces for the control loop
//!
//! The controller never talks to hardware directly. A [`DeviceAdapter`] reports
//! exposure capabilities and applies constraint changes; a [`FrameSource`]
//! exposes the current frame and copies regions of it out as RGBA.

use crate::errors::ExposureError;
use crate::types::{ConstraintRequest, ExposureCapabilities, PixelBuffer, SamplingWindow};
use async_trait::async_trait;

/// Capture device exposure control.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Identifier used in logs and events
    fn device_id(&self) -> String;

    /// Snapshot of the exposure controls the device supports.
    ///
    /// Devices that cannot be queried report [`ExposureCapabilities::unsupported`].
    fn capabilities(&self) -> ExposureCapabilities;

    /// Apply a mode or exposure-time change.
    ///
    /// Completion may take an arbitrary time; callers must not assume it has
    /// taken effect until the future resolves.
    async fn apply_constraints(&self, request: ConstraintRequest) -> Result<(), ExposureError>;
}

/// Source of frames to sample.
pub trait FrameSource: Send {
    /// Current frame dimensions, `(0, 0)` before the first frame
    fn dimensions(&self) -> (u32, u32);

    /// Whether enough data has been decoded to sample
    fn is_ready(&self) -> bool;

    /// Copy `window` of the current frame into `buffer` as RGBA.
    ///
    /// On success the buffer is resized to the window.
    fn read_region(
        &mut self,
        window: &SamplingWindow,
        buffer: &mut PixelBuffer,
    ) -> Result<(), ExposureError>;
}

/// Copy a window out of a packed RGB or RGBA frame into an RGBA buffer.
///
/// Shared by frame sources that keep whole frames in memory.
pub fn copy_region(
    frame: &[u8],
    frame_width: u32,
    frame_height: u32,
    channels: usize,
    window: &SamplingWindow,
    buffer: &mut PixelBuffer,
) -> Result<(), ExposureError> {
    if window.is_empty() || frame_width == 0 || frame_height == 0 {
        return Err(ExposureError::DegenerateFrame {
            width: window.width,
            height: window.height,
        });
    }
    if !window.fits_within(frame_width, frame_height) {
        return Err(ExposureError::CaptureError(format!(
            "window {:?} outside {}x{} frame",
            window, frame_width, frame_height
        )));
    }
    if !(channels == 3 || channels == 4) {
        return Err(ExposureError::CaptureError(format!(
            "unsupported channel count {}",
            channels
        )));
    }
    let stride = frame_width as usize * channels;
    if frame.len() < stride * frame_height as usize {
        return Err(ExposureError::CaptureError(format!(
            "frame holds {} bytes, expected {}",
            frame.len(),
            stride * frame_height as usize
        )));
    }

    buffer.resize(window.width, window.height);
    let mut out = 0;
    for row in window.start_y..window.start_y + window.height {
        let row_start = row as usize * stride + window.start_x as usize * channels;
        let row_pixels = &frame[row_start..row_start + window.width as usize * channels];
        for pixel in row_pixels.chunks_exact(channels) {
            buffer.data[out] = pixel[0];
            buffer.data[out + 1] = pixel[1];
            buffer.data[out + 2] = pixel[2];
            buffer.data[out + 3] = if channels == 4 { pixel[3] } else { 255 };
            out += 4;
        }
    }
    Ok(())
}
