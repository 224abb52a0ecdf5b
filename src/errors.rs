use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExposureError {
    /// Device has no manual exposure control; terminal for the attachment.
    #[error("Unsupported device error: {0}")]
    UnsupportedDevice(String),
    #[error("Apply failure error: {0}")]
    ApplyFailure(String),
    #[error("Degenerate frame error: {width}x{height}")]
    DegenerateFrame { width: u32, height: u32 },
    #[error("Capture error: {0}")]
    CaptureError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Initialization error: {0}")]
    InitializationError(String),
}

impl ExposureError {
    /// Whether the next eligible tick is expected to recover from this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExposureError::ApplyFailure(_) | ExposureError::CaptureError(_)
        )
    }
}
