//! Closed-loop camera simulation
//!
//! [`SimulatedCamera`] plays both collaborator roles: it is a
//! [`DeviceAdapter`] that records every constraint it receives, and a
//! [`FrameSource`] whose picture brightness follows the exposure time the
//! controller has set. Clones share state, so one clone can be handed to the
//! loop as the device, another as the frame source, and a third kept by the
//! test for inspection.

use crate::device::{DeviceAdapter, FrameSource};
use crate::errors::ExposureError;
use crate::testing::synthetic_data::ripple;
use crate::types::{
    ConstraintRequest, ExposureCapabilities, ExposureMode, PixelBuffer, SamplingWindow,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// One constraint the device received
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedConstraint {
    pub request: ConstraintRequest,
    /// When the apply completed
    pub at: Instant,
    pub succeeded: bool,
}

#[derive(Debug)]
struct SimState {
    capabilities: ExposureCapabilities,
    mode: ExposureMode,
    exposure_time: f64,
    /// Luma gained per unit of exposure time
    scene_gain: f64,
    texture: u8,
    width: u32,
    height: u32,
    ready: bool,
    apply_latency: Duration,
    failures_remaining: usize,
    reject_modes: bool,
    stalled: bool,
    active_applies: usize,
    peak_applies: usize,
    history: Vec<AppliedConstraint>,
}

/// Simulated capture device and frame source
#[derive(Debug, Clone)]
pub struct SimulatedCamera {
    id: String,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedCamera {
    pub fn new(capabilities: ExposureCapabilities) -> Self {
        let exposure_time = capabilities.clamp(500.0);
        Self {
            id: "simulated".to_string(),
            state: Arc::new(Mutex::new(SimState {
                capabilities,
                mode: ExposureMode::Continuous,
                exposure_time,
                scene_gain: 0.08,
                texture: 0,
                width: 640,
                height: 480,
                ready: true,
                apply_latency: Duration::ZERO,
                failures_remaining: 0,
                reject_modes: false,
                stalled: false,
                active_applies: 0,
                peak_applies: 0,
                history: Vec::new(),
            })),
        }
    }

    pub fn with_manual_range(min_time: f64, max_time: f64) -> Self {
        Self::new(ExposureCapabilities::manual_range(min_time, max_time))
    }

    pub fn without_exposure_control() -> Self {
        Self::new(ExposureCapabilities::unsupported())
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_scene_gain(&self, gain: f64) {
        self.lock().scene_gain = gain;
    }

    pub fn set_texture(&self, texture: u8) {
        self.lock().texture = texture;
    }

    pub fn set_dimensions(&self, width: u32, height: u32) {
        let mut state = self.lock();
        state.width = width;
        state.height = height;
    }

    pub fn set_ready(&self, ready: bool) {
        self.lock().ready = ready;
    }

    pub fn set_apply_latency(&self, latency: Duration) {
        self.lock().apply_latency = latency;
    }

    /// Fail the next `count` exposure-time applies
    pub fn fail_next_applies(&self, count: usize) {
        self.lock().failures_remaining = count;
    }

    /// Reject every mode change
    pub fn reject_mode_changes(&self, reject: bool) {
        self.lock().reject_modes = reject;
    }

    /// Make applies that start from now on never complete
    pub fn stall_applies(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    /// Most applies that were ever running at the same time
    pub fn peak_concurrent_applies(&self) -> usize {
        self.lock().peak_applies
    }

    pub fn exposure_time(&self) -> f64 {
        self.lock().exposure_time
    }

    pub fn mode(&self) -> ExposureMode {
        self.lock().mode
    }

    /// Brightness the scene currently renders at
    pub fn scene_level(&self) -> f64 {
        let state = self.lock();
        (state.exposure_time * state.scene_gain).clamp(0.0, 255.0)
    }

    pub fn history(&self) -> Vec<AppliedConstraint> {
        self.lock().history.clone()
    }

    /// Exposure-time applies only, in completion order
    pub fn exposure_applies(&self) -> Vec<AppliedConstraint> {
        self.lock()
            .history
            .iter()
            .filter(|applied| matches!(applied.request, ConstraintRequest::ExposureTime(_)))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DeviceAdapter for SimulatedCamera {
    fn device_id(&self) -> String {
        self.id.clone()
    }

    fn capabilities(&self) -> ExposureCapabilities {
        self.lock().capabilities.clone()
    }

    async fn apply_constraints(&self, request: ConstraintRequest) -> Result<(), ExposureError> {
        let (latency, stalled) = {
            let mut state = self.lock();
            state.active_applies += 1;
            state.peak_applies = state.peak_applies.max(state.active_applies);
            (state.apply_latency, state.stalled)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        state.active_applies -= 1;
        let result = match request {
            ConstraintRequest::Mode(mode) => {
                if state.reject_modes || !state.capabilities.supports_mode(mode) {
                    Err(ExposureError::ApplyFailure(format!(
                        "mode {} not accepted",
                        mode.as_str()
                    )))
                } else {
                    state.mode = mode;
                    Ok(())
                }
            }
            ConstraintRequest::ExposureTime(value) => {
                if state.failures_remaining > 0 {
                    state.failures_remaining -= 1;
                    Err(ExposureError::ApplyFailure("device busy".to_string()))
                } else if state.mode != ExposureMode::Manual {
                    Err(ExposureError::ApplyFailure(
                        "exposure time requires manual mode".to_string(),
                    ))
                } else {
                    match state.capabilities.bounds() {
                        Some((min, max)) if value >= min && value <= max => {
                            state.exposure_time = value;
                            Ok(())
                        }
                        _ => Err(ExposureError::ApplyFailure(format!(
                            "exposure time {} out of range",
                            value
                        ))),
                    }
                }
            }
        };

        state.history.push(AppliedConstraint {
            request,
            at: Instant::now(),
            succeeded: result.is_ok(),
        });
        result
    }
}

impl FrameSource for SimulatedCamera {
    fn dimensions(&self) -> (u32, u32) {
        let state = self.lock();
        (state.width, state.height)
    }

    fn is_ready(&self) -> bool {
        self.lock().ready
    }

    fn read_region(
        &mut self,
        window: &SamplingWindow,
        buffer: &mut PixelBuffer,
    ) -> Result<(), ExposureError> {
        let state = self.lock();
        if window.is_empty() || state.width == 0 || state.height == 0 {
            return Err(ExposureError::DegenerateFrame {
                width: state.width,
                height: state.height,
            });
        }
        if !window.fits_within(state.width, state.height) {
            return Err(ExposureError::CaptureError(
                "window outside simulated frame".to_string(),
            ));
        }

        let level = (state.exposure_time * state.scene_gain)
            .clamp(0.0, 255.0)
            .round() as u8;
        let texture = state.texture;
        drop(state);

        buffer.resize(window.width, window.height);
        let mut out = 0;
        for y in window.start_y..window.start_y + window.height {
            for x in window.start_x..window.start_x + window.width {
                let value = ripple(level, texture, x, y);
                buffer.data[out..out + 4].copy_from_slice(&[value, value, value, 255]);
                out += 4;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apl::mean_luma;

    #[tokio::test]
    async fn test_exposure_requires_manual_mode() {
        let camera = SimulatedCamera::with_manual_range(50.0, 10000.0);
        let result = camera
            .apply_constraints(ConstraintRequest::ExposureTime(800.0))
            .await;
        assert!(result.is_err());

        camera
            .apply_constraints(ConstraintRequest::Mode(ExposureMode::Manual))
            .await
            .unwrap();
        camera
            .apply_constraints(ConstraintRequest::ExposureTime(800.0))
            .await
            .unwrap();
        assert_eq!(camera.exposure_time(), 800.0);
        assert_eq!(camera.history().len(), 3);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let camera = SimulatedCamera::with_manual_range(50.0, 10000.0);
        camera
            .apply_constraints(ConstraintRequest::Mode(ExposureMode::Manual))
            .await
            .unwrap();
        camera.fail_next_applies(1);
        assert!(camera
            .apply_constraints(ConstraintRequest::ExposureTime(900.0))
            .await
            .is_err());
        assert!(camera
            .apply_constraints(ConstraintRequest::ExposureTime(900.0))
            .await
            .is_ok());
        let applies = camera.exposure_applies();
        assert_eq!(applies.len(), 2);
        assert!(!applies[0].succeeded);
        assert!(applies[1].succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_applies_are_counted() {
        let camera = SimulatedCamera::with_manual_range(50.0, 10000.0);
        camera.set_apply_latency(Duration::from_millis(100));
        let (first, second) = tokio::join!(
            camera.apply_constraints(ConstraintRequest::Mode(ExposureMode::Manual)),
            camera.apply_constraints(ConstraintRequest::Mode(ExposureMode::Manual)),
        );
        assert!(first.is_ok() && second.is_ok());
        assert_eq!(camera.peak_concurrent_applies(), 2);
    }

    #[test]
    fn test_frame_brightness_follows_exposure() {
        let mut camera = SimulatedCamera::with_manual_range(50.0, 10000.0);
        let mut buffer = PixelBuffer::default();
        camera
            .read_region(&SamplingWindow::new(0, 0, 8, 8), &mut buffer)
            .unwrap();
        // 500 * 0.08
        assert!((mean_luma(&buffer.data, 8, 8) - 40.0).abs() < 1e-9);
        assert_eq!(camera.scene_level(), 40.0);
    }
}
