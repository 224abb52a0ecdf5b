//! Side channel for controller reports
//!
//! Nothing inside the control loop propagates errors to the host. Attach
//! results, adjustments and failures are logged and mirrored as
//! [`ControllerEvent`]s on a bounded channel. A host that stops draining it
//! loses events once [`EVENT_QUEUE_CAPACITY`] are pending; the log still has
//! them.

use crate::types::ExposureCapabilities;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Events held for the host before new ones are dropped
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Event emitted by a running auto-exposure session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    /// Device accepted manual exposure control
    Attached { capabilities: ExposureCapabilities },
    /// Device cannot be controlled; the session runs as pass-through
    Unsupported { reason: String },
    AdjustmentIssued { from: f64, to: f64, apl: f64 },
    Adjusted { exposure_time: f64 },
    ApplyFailed { reason: String },
    /// Automatic exposure could not be restored on stop
    RestoreFailed { reason: String },
    Stopped,
}

impl ControllerEvent {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ControllerEvent::Unsupported { .. }
                | ControllerEvent::ApplyFailed { .. }
                | ControllerEvent::RestoreFailed { .. }
        )
    }
}

/// Sending half used by the loop; a dropped receiver is not an error
#[derive(Debug, Clone)]
pub struct EventReporter {
    sender: mpsc::Sender<ControllerEvent>,
}

impl EventReporter {
    pub fn channel() -> (Self, mpsc::Receiver<ControllerEvent>) {
        Self::with_capacity(EVENT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<ControllerEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub fn report(&self, event: ControllerEvent) {
        match &event {
            ControllerEvent::Unsupported { reason } => {
                log::warn!("Exposure control unsupported: {}", reason)
            }
            ControllerEvent::ApplyFailed { reason } => {
                log::warn!("Exposure apply failed: {}", reason)
            }
            ControllerEvent::RestoreFailed { reason } => {
                log::warn!("Failed to restore automatic exposure: {}", reason)
            }
            ControllerEvent::Attached { capabilities } => {
                log::info!("Exposure control attached: {:?}", capabilities)
            }
            ControllerEvent::Stopped => log::info!("Auto-exposure stopped"),
            other => log::debug!("{:?}", other),
        }
        match self.sender.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(dropped)) => {
                log::trace!("Event queue full, dropping {:?}", dropped)
            }
        }
    }
}
