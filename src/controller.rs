//! Exposure control state machine
//!
//! The controller alternates between `Idle` and `Adjusting`. Each tick it is
//! handed the latest APL and decides, through a series of gates, whether the
//! device exposure should change:
//!
//! 1. the device must have accepted manual control at attach time;
//! 2. no adjustment may be in flight and the last committed adjustment must be
//!    older than the update interval;
//! 3. the APL must fall outside the dead-band around the target;
//! 4. the proportional correction, clamped to the device range, must actually
//!    differ from the current exposure.
//!
//! The correction is `current * target / apl`, a plain proportional law with no
//! integral or derivative term. Stability comes from the dead-band and the
//! update interval.
//!
//! Decisions and completions are pure functions over [`ControlState`];
//! [`ExposureController`] owns the state and threads it through them.

use crate::assert_invariant;
use crate::config::AutoExposureConfig;
use crate::errors::ExposureError;
use crate::types::{ConstraintRequest, ExposureCapabilities, ExposureMode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

const BOUNDS_INVARIANT: &str = "Exposure time stays within device bounds";
const SINGLE_FLIGHT_INVARIANT: &str = "At most one adjustment is in flight";

/// Controller phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControlPhase {
    Idle,
    Adjusting,
}

/// Mutable state carried across ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlState {
    /// Set once per attach when the device accepted manual exposure
    pub control_allowed: bool,
    /// Logical mutex over the single in-flight device call
    pub adjusting: bool,
    pub current_exposure_time: f64,
    /// Time of the last successfully applied adjustment
    pub last_update: Option<Instant>,
}

impl ControlState {
    pub fn new(default_exposure_time: f64) -> Self {
        Self {
            control_allowed: false,
            adjusting: false,
            current_exposure_time: default_exposure_time,
            last_update: None,
        }
    }

    pub fn phase(&self) -> ControlPhase {
        if self.adjusting {
            ControlPhase::Adjusting
        } else {
            ControlPhase::Idle
        }
    }
}

/// Tunables consumed by the decision function
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlSettings {
    pub target_apl: f64,
    pub min_apl_difference: f64,
    pub update_interval: Duration,
    pub default_exposure_time: f64,
}

impl ControlSettings {
    pub fn from_config(config: &AutoExposureConfig) -> Self {
        Self {
            target_apl: config.control.target_apl,
            min_apl_difference: config.control.min_apl_difference,
            update_interval: config.update_interval(),
            default_exposure_time: config.control.default_exposure_time,
        }
    }

    /// True when `apl` lies strictly inside the dead-band
    pub fn within_target(&self, apl: f64) -> bool {
        (apl - self.target_apl).abs() < self.min_apl_difference
    }
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self::from_config(&AutoExposureConfig::default())
    }
}

/// Why a tick produced no device call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// Device does not accept manual exposure
    ControlDisabled,
    /// An adjustment is still in flight
    Busy,
    /// The last adjustment is younger than the update interval
    RateLimited,
    /// APL is inside the dead-band
    WithinTarget,
    /// Clamped exposure equals the current one
    NoChange,
    /// APL was not a finite number
    InvalidApl,
}

/// Exposure change to send to the device
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdjustmentRequest {
    pub from: f64,
    pub to: f64,
    pub apl: f64,
}

impl AdjustmentRequest {
    pub fn constraint(&self) -> ConstraintRequest {
        ConstraintRequest::ExposureTime(self.to)
    }
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Decision {
    Skip(SkipReason),
    Adjust(AdjustmentRequest),
}

/// Completion of an in-flight adjustment
#[derive(Debug, Clone, PartialEq)]
pub enum AdjustmentOutcome {
    Applied { exposure_time: f64 },
    Failed { reason: String },
}

impl AdjustmentOutcome {
    pub fn from_result(request: &AdjustmentRequest, result: Result<(), ExposureError>) -> Self {
        match result {
            Ok(()) => AdjustmentOutcome::Applied {
                exposure_time: request.to,
            },
            Err(e) => AdjustmentOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }
}

/// Staleness and eligibility gates that decide whether sampling is worth doing.
pub fn gate(state: &ControlState, settings: &ControlSettings, now: Instant) -> Option<SkipReason> {
    if !state.control_allowed {
        return Some(SkipReason::ControlDisabled);
    }
    if state.adjusting {
        return Some(SkipReason::Busy);
    }
    if let Some(last) = state.last_update {
        if now.saturating_duration_since(last) <= settings.update_interval {
            return Some(SkipReason::RateLimited);
        }
    }
    None
}

/// Decide what to do with a freshly estimated APL.
///
/// Pure: neither the state nor the capabilities are modified.
pub fn decide(
    state: &ControlState,
    settings: &ControlSettings,
    capabilities: Option<&ExposureCapabilities>,
    now: Instant,
    apl: f64,
) -> Decision {
    if let Some(reason) = gate(state, settings, now) {
        return Decision::Skip(reason);
    }
    let Some(capabilities) = capabilities.filter(|c| c.bounds().is_some()) else {
        return Decision::Skip(SkipReason::ControlDisabled);
    };
    if !apl.is_finite() || apl < 0.0 {
        return Decision::Skip(SkipReason::InvalidApl);
    }
    if settings.within_target(apl) {
        return Decision::Skip(SkipReason::WithinTarget);
    }

    let current = state.current_exposure_time;
    let raw = if apl > 0.0 {
        current * (settings.target_apl / apl)
    } else {
        // Black frame: open up as far as the device allows
        f64::INFINITY
    };
    // Compare against what the device can actually hold
    let to = capabilities.quantize(raw);

    if to == current {
        return Decision::Skip(SkipReason::NoChange);
    }

    Decision::Adjust(AdjustmentRequest {
        from: current,
        to,
        apl,
    })
}

/// Fold an adjustment completion into the state.
///
/// Success commits the applied exposure and stamps `now`; failure leaves the
/// exposure and timestamp untouched. Both release the in-flight flag.
pub fn complete_adjustment(
    state: ControlState,
    outcome: &AdjustmentOutcome,
    now: Instant,
) -> ControlState {
    match outcome {
        AdjustmentOutcome::Applied { exposure_time } => ControlState {
            adjusting: false,
            current_exposure_time: *exposure_time,
            last_update: Some(now),
            ..state
        },
        AdjustmentOutcome::Failed { .. } => ControlState {
            adjusting: false,
            ..state
        },
    }
}

/// Serializable view of the controller for hosts
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub phase: ControlPhase,
    pub control_allowed: bool,
    pub current_exposure_time: f64,
    pub target_apl: f64,
    pub last_apl: Option<f64>,
    pub adjustments_committed: u64,
    pub adjustments_failed: u64,
    pub last_adjusted_at: Option<DateTime<Utc>>,
    pub capabilities: Option<ExposureCapabilities>,
}

/// Owner of [`ControlState`] for one device attachment.
#[derive(Debug, Clone)]
pub struct ExposureController {
    settings: ControlSettings,
    capabilities: Option<ExposureCapabilities>,
    state: ControlState,
    in_flight: Option<AdjustmentRequest>,
    last_apl: Option<f64>,
    committed: u64,
    failed: u64,
    last_adjusted_at: Option<DateTime<Utc>>,
}

impl ExposureController {
    pub fn new(settings: ControlSettings) -> Self {
        Self {
            state: ControlState::new(settings.default_exposure_time),
            settings,
            capabilities: None,
            in_flight: None,
            last_apl: None,
            committed: 0,
            failed: 0,
            last_adjusted_at: None,
        }
    }

    pub fn from_config(config: &AutoExposureConfig) -> Self {
        Self::new(ControlSettings::from_config(config))
    }

    pub fn settings(&self) -> &ControlSettings {
        &self.settings
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    pub fn capabilities(&self) -> Option<&ExposureCapabilities> {
        self.capabilities.as_ref()
    }

    pub fn phase(&self) -> ControlPhase {
        self.state.phase()
    }

    pub fn control_allowed(&self) -> bool {
        self.state.control_allowed
    }

    pub fn current_exposure_time(&self) -> f64 {
        self.state.current_exposure_time
    }

    /// Adjustment currently awaiting completion
    pub fn in_flight(&self) -> Option<&AdjustmentRequest> {
        self.in_flight.as_ref()
    }

    /// First half of attaching: validate capabilities and produce the mode switch.
    ///
    /// Unsupported devices leave control disabled for this attachment.
    pub fn attach(
        &mut self,
        capabilities: ExposureCapabilities,
    ) -> Result<ConstraintRequest, ExposureError> {
        self.state.control_allowed = false;

        if !capabilities.supports_manual_control() {
            let reason = if capabilities.bounds().is_none() {
                "device reports no exposure time range"
            } else {
                "device has no manual exposure mode"
            };
            self.capabilities = Some(capabilities);
            return Err(ExposureError::UnsupportedDevice(reason.to_string()));
        }

        self.state.current_exposure_time =
            capabilities.starting_exposure(self.settings.default_exposure_time);
        self.capabilities = Some(capabilities);
        Ok(ConstraintRequest::Mode(ExposureMode::Manual))
    }

    /// Second half of attaching: record whether the manual mode switch went through.
    pub fn confirm_attach(&mut self, result: Result<(), ExposureError>) -> Result<(), ExposureError> {
        match result {
            Ok(()) if self.capabilities.as_ref().is_some_and(|c| c.supports_manual_control()) => {
                self.state.control_allowed = true;
                log::info!(
                    "Manual exposure enabled, starting at {}",
                    self.state.current_exposure_time
                );
                Ok(())
            }
            Ok(()) => Err(ExposureError::UnsupportedDevice(
                "attach confirmed without manual capabilities".to_string(),
            )),
            Err(e) => {
                self.state.control_allowed = false;
                Err(ExposureError::UnsupportedDevice(format!(
                    "failed to enter manual exposure mode: {}",
                    e
                )))
            }
        }
    }

    /// Whether a tick at `now` should bother sampling
    pub fn should_sample(&self, now: Instant) -> bool {
        gate(&self.state, &self.settings, now).is_none()
    }

    /// Evaluate an APL and, when an adjustment is due, enter `Adjusting`.
    pub fn tick(&mut self, now: Instant, apl: f64) -> Decision {
        let decision = decide(
            &self.state,
            &self.settings,
            self.capabilities.as_ref(),
            now,
            apl,
        );

        if apl.is_finite() {
            self.last_apl = Some(apl);
        }

        if let Decision::Adjust(request) = decision {
            assert_invariant!(
                !self.state.adjusting && self.in_flight.is_none(),
                SINGLE_FLIGHT_INVARIANT,
                "controller::tick"
            );
            self.state.adjusting = true;
            self.in_flight = Some(request);
            log::debug!(
                "APL {:.1} vs target {:.1}: exposure {} -> {}",
                apl,
                self.settings.target_apl,
                request.from,
                request.to
            );
        }

        decision
    }

    /// Apply the completion of the in-flight adjustment.
    ///
    /// Completions that arrive with nothing in flight are ignored.
    pub fn complete(&mut self, outcome: AdjustmentOutcome, now: Instant) {
        if self.in_flight.take().is_none() {
            log::debug!("Ignoring adjustment completion with nothing in flight");
            return;
        }

        let outcome = match outcome {
            AdjustmentOutcome::Applied { exposure_time } => AdjustmentOutcome::Applied {
                exposure_time: self
                    .capabilities
                    .as_ref()
                    .map(|c| c.clamp(exposure_time))
                    .unwrap_or(exposure_time),
            },
            failed => failed,
        };

        self.state = complete_adjustment(self.state, &outcome, now);

        match &outcome {
            AdjustmentOutcome::Applied { exposure_time } => {
                self.committed += 1;
                self.last_adjusted_at = Some(Utc::now());
                log::debug!("Exposure time committed at {}", exposure_time);
            }
            AdjustmentOutcome::Failed { reason } => {
                self.failed += 1;
                log::warn!("Exposure adjustment failed: {}", reason);
            }
        }

        if let Some((min, max)) = self.capabilities.as_ref().and_then(|c| c.bounds()) {
            let exposure = self.state.current_exposure_time;
            assert_invariant!(
                exposure >= min && exposure <= max,
                BOUNDS_INVARIANT,
                "controller::complete"
            );
        }
    }

    /// Release manual control, returning the restore request if one is owed.
    pub fn detach(&mut self) -> Option<ConstraintRequest> {
        if !self.state.control_allowed {
            return None;
        }
        self.state.control_allowed = false;
        Some(ConstraintRequest::Mode(ExposureMode::Continuous))
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            phase: self.phase(),
            control_allowed: self.state.control_allowed,
            current_exposure_time: self.state.current_exposure_time,
            target_apl: self.settings.target_apl,
            last_apl: self.last_apl,
            adjustments_committed: self.committed,
            adjustments_failed: self.failed,
            last_adjusted_at: self.last_adjusted_at,
            capabilities: self.capabilities.clone(),
        }
    }
}
