use crate::device::{copy_region, DeviceAdapter, FrameSource};
use crate::errors::ExposureError;
use crate::types::{
    ConstraintRequest, ExposureCapabilities, ExposureMode, PixelBuffer, SamplingWindow,
};
use async_trait::async_trait;
use nokhwa::{
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraIndex, ControlValueDescription, ControlValueSetter, KnownCameraControl,
        RequestedFormat, RequestedFormatType,
    },
    CallbackCamera,
};
use std::sync::{Arc, Mutex};

/// V4L2 `exposure_auto` menu control
const V4L2_CID_EXPOSURE_AUTO: u128 = 0x009a_0901;
const V4L2_EXPOSURE_MANUAL: i64 = 1;
const V4L2_EXPOSURE_APERTURE_PRIORITY: i64 = 3;

/// Basic information about an attached camera
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceSummary {
    pub id: String,
    pub name: String,
}

/// List cameras visible to the native backend
pub fn list_devices() -> Result<Vec<DeviceSummary>, ExposureError> {
    let cameras = query(ApiBackend::Auto).map_err(|e| {
        ExposureError::InitializationError(format!("Failed to query cameras: {}", e))
    })?;

    Ok(cameras
        .into_iter()
        .map(|info| DeviceSummary {
            id: info.index().to_string(),
            name: info.human_name(),
        })
        .collect())
}

/// Exposure control range as the backend reports it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    /// Value the control held when queried
    pub current: f64,
}

/// Map an exposure control range onto capabilities.
///
/// A device reporting a range is assumed to accept manual values; continuous
/// mode is always offered so detach can try to hand control back.
pub fn capabilities_from_range(range: Option<ExposureRange>) -> ExposureCapabilities {
    match range {
        Some(range) if range.min <= range.max => {
            let mut caps = ExposureCapabilities::manual_range(range.min, range.max);
            if range.step > 0.0 {
                caps = caps.with_step(range.step);
            }
            if range.current.is_finite() {
                caps = caps.with_current(range.current);
            }
            caps
        }
        _ => ExposureCapabilities::unsupported().with_modes(vec![ExposureMode::Continuous]),
    }
}

fn exposure_range(description: &ControlValueDescription) -> Option<ExposureRange> {
    match description {
        ControlValueDescription::IntegerRange {
            min,
            max,
            value,
            step,
            ..
        } => Some(ExposureRange {
            min: *min as f64,
            max: *max as f64,
            step: *step as f64,
            current: *value as f64,
        }),
        ControlValueDescription::FloatRange {
            min,
            max,
            value,
            step,
            ..
        } => Some(ExposureRange {
            min: *min,
            max: *max,
            step: *step,
            current: *value,
        }),
        _ => None,
    }
}

/// Control id and value that carry a constraint to the device
fn control_for(request: ConstraintRequest) -> (KnownCameraControl, ControlValueSetter) {
    match request {
        ConstraintRequest::Mode(ExposureMode::Manual) => (
            KnownCameraControl::Other(V4L2_CID_EXPOSURE_AUTO),
            ControlValueSetter::Integer(V4L2_EXPOSURE_MANUAL),
        ),
        ConstraintRequest::Mode(ExposureMode::Continuous) => (
            KnownCameraControl::Other(V4L2_CID_EXPOSURE_AUTO),
            ControlValueSetter::Integer(V4L2_EXPOSURE_APERTURE_PRIORITY),
        ),
        ConstraintRequest::ExposureTime(value) => (
            KnownCameraControl::Exposure,
            ControlValueSetter::Integer(value.round() as i64),
        ),
    }
}

struct LatestFrame {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
}

/// Camera driven through nokhwa.
///
/// Frames arrive on nokhwa's callback thread and are decoded to RGB; the
/// most recent one is kept for sampling. Clones share the device.
#[derive(Clone)]
pub struct NokhwaCamera {
    device_id: String,
    camera: Arc<Mutex<CallbackCamera>>,
    latest: Arc<Mutex<Option<LatestFrame>>>,
}

impl NokhwaCamera {
    /// Open a camera by its backend index
    pub fn open(device_id: &str) -> Result<Self, ExposureError> {
        let device_index = device_id
            .parse::<u32>()
            .map_err(|_| ExposureError::InitializationError("Invalid device ID".to_string()))?;

        let requested_format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::None);

        let latest: Arc<Mutex<Option<LatestFrame>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&latest);

        let camera = CallbackCamera::new(
            CameraIndex::Index(device_index),
            requested_format,
            move |buffer: nokhwa::Buffer| match buffer.decode_image::<RgbFormat>() {
                Ok(image) => {
                    let frame = LatestFrame {
                        width: image.width(),
                        height: image.height(),
                        rgb: image.into_raw(),
                    };
                    if let Ok(mut slot) = slot.lock() {
                        *slot = Some(frame);
                    }
                }
                Err(e) => log::debug!("Dropping undecodable frame: {}", e),
            },
        )
        .map_err(|e| {
            ExposureError::InitializationError(format!("Failed to initialize camera: {}", e))
        })?;

        Ok(Self {
            device_id: device_id.to_string(),
            camera: Arc::new(Mutex::new(camera)),
            latest,
        })
    }

    /// Start camera stream
    pub fn start_stream(&self) -> Result<(), ExposureError> {
        let mut camera = self
            .camera
            .lock()
            .map_err(|_| ExposureError::InitializationError("Failed to lock camera".to_string()))?;

        camera.open_stream().map_err(|e| {
            ExposureError::InitializationError(format!("Failed to start stream: {}", e))
        })
    }

    /// Stop camera stream
    pub fn stop_stream(&self) -> Result<(), ExposureError> {
        let mut camera = self
            .camera
            .lock()
            .map_err(|_| ExposureError::InitializationError("Failed to lock camera".to_string()))?;

        camera.stop_stream().map_err(|e| {
            ExposureError::InitializationError(format!("Failed to stop stream: {}", e))
        })
    }

    fn apply_blocking(&self, request: ConstraintRequest) -> Result<(), ExposureError> {
        let (control, value) = control_for(request);
        let mut camera = self
            .camera
            .lock()
            .map_err(|_| ExposureError::ApplyFailure("Failed to lock camera".to_string()))?;

        camera.set_camera_control(control, value).map_err(|e| {
            ExposureError::ApplyFailure(format!("Failed to apply {:?}: {}", request, e))
        })
    }
}

#[async_trait]
impl DeviceAdapter for NokhwaCamera {
    fn device_id(&self) -> String {
        self.device_id.clone()
    }

    fn capabilities(&self) -> ExposureCapabilities {
        let camera = match self.camera.lock() {
            Ok(camera) => camera,
            Err(_) => return capabilities_from_range(None),
        };

        match camera.camera_control(KnownCameraControl::Exposure) {
            Ok(control) => capabilities_from_range(exposure_range(control.description())),
            Err(e) => {
                log::info!("Camera {} reports no exposure control: {}", self.device_id, e);
                capabilities_from_range(None)
            }
        }
    }

    async fn apply_constraints(&self, request: ConstraintRequest) -> Result<(), ExposureError> {
        // Control writes are blocking ioctls
        let camera = self.clone();
        tokio::task::spawn_blocking(move || camera.apply_blocking(request))
            .await
            .map_err(|e| ExposureError::ApplyFailure(format!("Apply task failed: {}", e)))?
    }
}

impl FrameSource for NokhwaCamera {
    fn dimensions(&self) -> (u32, u32) {
        self.latest
            .lock()
            .ok()
            .and_then(|latest| latest.as_ref().map(|f| (f.width, f.height)))
            .unwrap_or((0, 0))
    }

    fn is_ready(&self) -> bool {
        self.latest
            .lock()
            .map(|latest| latest.is_some())
            .unwrap_or(false)
    }

    fn read_region(
        &mut self,
        window: &SamplingWindow,
        buffer: &mut PixelBuffer,
    ) -> Result<(), ExposureError> {
        let latest = self
            .latest
            .lock()
            .map_err(|_| ExposureError::CaptureError("Failed to lock frame".to_string()))?;

        match latest.as_ref() {
            Some(frame) => copy_region(&frame.rgb, frame.width, frame.height, 3, window, buffer),
            None => Err(ExposureError::DegenerateFrame {
                width: 0,
                height: 0,
            }),
        }
    }
}

// Stream is stopped once the last clone goes away
impl Drop for NokhwaCamera {
    fn drop(&mut self) {
        if Arc::strong_count(&self.camera) == 1 {
            if let Ok(mut camera) = self.camera.lock() {
                let _ = camera.stop_stream();
            }
        }
    }
}

// nokhwa's camera handle is only touched behind the mutex
unsafe impl Send for NokhwaCamera {}
unsafe impl Sync for NokhwaCamera {}
