//! Tick-driven auto-exposure loop
//!
//! One sampling attempt per tick. A tick is a cheap no-op unless the
//! controller's gates pass and the frame source has a frame; only then is the
//! window extracted, the APL estimated and the controller consulted.
//!
//! Device applies run as separate tasks so ticks keep flowing while the device
//! works. Their results come back over a channel and are folded into the
//! controller on the loop task, which is the only place controller state is
//! touched. Cancelling the loop stops future ticks immediately. An apply that
//! is already running is never aborted: stopping waits for it and folds its
//! result in before the restore is sent, so the device sees one call at a time.
//! Only the attach-time mode switch is abandoned on cancel.

use crate::apl::{scaled_sample_count, AplEstimator};
use crate::config::AutoExposureConfig;
use crate::controller::{AdjustmentOutcome, ControllerStatus, Decision, ExposureController};
use crate::device::{DeviceAdapter, FrameSource};
use crate::errors::ExposureError;
use crate::events::{ControllerEvent, EventReporter};
use crate::types::PixelBuffer;
use crate::window::{select_checked, CenteredSquare, WindowSelector};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Periodic wake-up for the loop.
#[async_trait]
pub trait TickSource: Send {
    /// Wait for the next tick; `false` once the source has ended
    async fn tick(&mut self) -> bool;
}

/// Fixed-period ticks for hosts without a display refresh callback
pub struct IntervalTicker {
    interval: tokio::time::Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        // A slow tick must not be followed by a burst of catch-up ticks
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl TickSource for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Ticks pushed by the host, e.g. from a vsync or animation-frame callback
pub struct HostTicker {
    receiver: mpsc::Receiver<()>,
}

/// Host side of a [`HostTicker`]
#[derive(Debug, Clone)]
pub struct TickTrigger {
    sender: mpsc::Sender<()>,
}

impl TickTrigger {
    /// Request a tick. Ticks requested while one is pending are coalesced.
    pub fn notify(&self) {
        let _ = self.sender.try_send(());
    }
}

impl HostTicker {
    pub fn channel() -> (TickTrigger, HostTicker) {
        let (sender, receiver) = mpsc::channel(1);
        (TickTrigger { sender }, HostTicker { receiver })
    }
}

#[async_trait]
impl TickSource for HostTicker {
    async fn tick(&mut self) -> bool {
        self.receiver.recv().await.is_some()
    }
}

/// Builder for an auto-exposure session
pub struct AutoExposure {
    config: AutoExposureConfig,
    selector: Box<dyn WindowSelector>,
    estimator: AplEstimator,
}

impl AutoExposure {
    pub fn new(config: AutoExposureConfig) -> Self {
        Self {
            selector: Box::new(CenteredSquare::new(config.sampling.window_ratio)),
            estimator: AplEstimator::from_seed(config.sampling.seed),
            config,
        }
    }

    /// Replace the default centered-square window
    pub fn with_window_selector<S>(mut self, selector: S) -> Self
    where
        S: WindowSelector + 'static,
    {
        self.selector = Box::new(selector);
        self
    }

    pub fn config(&self) -> &AutoExposureConfig {
        &self.config
    }

    /// Spawn the loop on the current tokio runtime, ticking at the configured period
    pub fn start(
        self,
        device: Arc<dyn DeviceAdapter>,
        frames: Box<dyn FrameSource>,
    ) -> AutoExposureHandle {
        let ticks = Box::new(IntervalTicker::new(self.config.tick_interval()));
        self.start_with_ticks(device, frames, ticks)
    }

    /// Spawn the loop driven by a caller-supplied tick source
    pub fn start_with_ticks(
        self,
        device: Arc<dyn DeviceAdapter>,
        frames: Box<dyn FrameSource>,
        ticks: Box<dyn TickSource>,
    ) -> AutoExposureHandle {
        let controller = ExposureController::from_config(&self.config);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(controller.status());
        let (reporter, events) = EventReporter::channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        log::info!("Starting auto-exposure for device {}", device.device_id());

        let session = Session {
            controller,
            device,
            frames,
            selector: self.selector,
            estimator: self.estimator,
            buffer: PixelBuffer::default(),
            num_samples: self.config.sampling.num_samples,
            scale_samples: self.config.sampling.scale_with_window,
            reporter,
            status: status_tx,
            done_tx,
            pending: None,
        };

        let task = tokio::spawn(session.run(ticks, cancel_rx, done_rx));

        AutoExposureHandle {
            cancel: cancel_tx,
            status: status_rx,
            events: Mutex::new(events),
            task: Some(task),
        }
    }
}

/// Running session owned by the host
pub struct AutoExposureHandle {
    cancel: watch::Sender<bool>,
    status: watch::Receiver<ControllerStatus>,
    events: Mutex<mpsc::Receiver<ControllerEvent>>,
    task: Option<JoinHandle<()>>,
}

impl AutoExposureHandle {
    /// Latest controller snapshot
    pub fn status(&self) -> ControllerStatus {
        self.status.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop scheduling ticks without waiting for the loop to wind down
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Cancel and wait for the loop to restore automatic exposure and exit.
    pub async fn stop(mut self) -> Result<ControllerStatus, ExposureError> {
        self.cancel();
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| {
                ExposureError::InitializationError(format!("Auto-exposure task failed: {}", e))
            })?;
        }
        Ok(self.status())
    }

    /// Get next event (non-blocking)
    pub async fn poll_event(&self) -> Option<ControllerEvent> {
        self.events.lock().await.try_recv().ok()
    }

    /// Wait for next event; `None` once the session has ended and drained
    pub async fn wait_for_event(&self) -> Option<ControllerEvent> {
        self.events.lock().await.recv().await
    }
}

impl Drop for AutoExposureHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct Session {
    controller: ExposureController,
    device: Arc<dyn DeviceAdapter>,
    frames: Box<dyn FrameSource>,
    selector: Box<dyn WindowSelector>,
    estimator: AplEstimator,
    buffer: PixelBuffer,
    num_samples: usize,
    scale_samples: bool,
    reporter: EventReporter,
    status: watch::Sender<ControllerStatus>,
    done_tx: mpsc::UnboundedSender<AdjustmentOutcome>,
    /// Task running the in-flight exposure apply
    pending: Option<JoinHandle<()>>,
}

/// Resolves once cancellation is requested or the handle is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

impl Session {
    async fn run(
        mut self,
        mut ticks: Box<dyn TickSource>,
        mut cancel: watch::Receiver<bool>,
        mut done_rx: mpsc::UnboundedReceiver<AdjustmentOutcome>,
    ) {
        let attached = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => false,
            _ = self.attach() => true,
        };
        if !attached {
            log::warn!(
                "Stopped while device {} was entering manual exposure",
                self.device.device_id()
            );
        }

        if attached && !*cancel.borrow() {
            loop {
                tokio::select! {
                    biased;
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            break;
                        }
                    }
                    Some(outcome) = done_rx.recv() => self.on_complete(outcome),
                    alive = ticks.tick() => {
                        if !alive {
                            log::info!("Tick source ended");
                            break;
                        }
                        self.on_tick();
                    }
                }
            }
        }

        self.detach(&mut done_rx).await;
    }

    async fn attach(&mut self) {
        let capabilities = self.device.capabilities();
        let result = match self.controller.attach(capabilities.clone()) {
            Ok(mode) => {
                let applied = self.device.apply_constraints(mode).await;
                self.controller.confirm_attach(applied)
            }
            Err(e) => Err(e),
        };

        // Status first, so a host reacting to the event sees the new phase
        self.publish();
        match result {
            Ok(()) => self.reporter.report(ControllerEvent::Attached { capabilities }),
            Err(e) => self.reporter.report(ControllerEvent::Unsupported {
                reason: e.to_string(),
            }),
        }
    }

    async fn detach(&mut self, done_rx: &mut mpsc::UnboundedReceiver<AdjustmentOutcome>) {
        if let Some(task) = self.pending.take() {
            log::debug!("Waiting for in-flight exposure apply before restoring");
            if let Err(e) = task.await {
                log::warn!("Exposure apply task failed: {}", e);
            }
        }
        while let Ok(outcome) = done_rx.try_recv() {
            self.on_complete(outcome);
        }

        if let Some(restore) = self.controller.detach() {
            if let Err(e) = self.device.apply_constraints(restore).await {
                self.reporter.report(ControllerEvent::RestoreFailed {
                    reason: e.to_string(),
                });
            }
        }
        self.publish();
        self.reporter.report(ControllerEvent::Stopped);
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        if !self.controller.should_sample(now) || !self.frames.is_ready() {
            return;
        }

        let (width, height) = self.frames.dimensions();
        let window = select_checked(self.selector.as_ref(), width, height);
        if window.is_empty() {
            return;
        }

        match self.frames.read_region(&window, &mut self.buffer) {
            Ok(()) => {}
            Err(ExposureError::DegenerateFrame { .. }) => return,
            Err(e) => {
                log::debug!("Skipping tick, region read failed: {}", e);
                return;
            }
        }

        let samples = if self.scale_samples {
            scaled_sample_count(window.area(), self.num_samples)
        } else {
            self.num_samples
        };
        let apl = self.estimator.estimate(
            &self.buffer.data,
            self.buffer.width,
            self.buffer.height,
            samples,
        );

        match self.controller.tick(now, apl) {
            Decision::Adjust(request) => {
                self.reporter.report(ControllerEvent::AdjustmentIssued {
                    from: request.from,
                    to: request.to,
                    apl: request.apl,
                });

                let device = Arc::clone(&self.device);
                let done = self.done_tx.clone();
                self.pending = Some(tokio::spawn(async move {
                    let result = device.apply_constraints(request.constraint()).await;
                    let _ = done.send(AdjustmentOutcome::from_result(&request, result));
                }));
            }
            Decision::Skip(reason) => {
                log::trace!("APL {:.1}, no adjustment: {:?}", apl, reason);
            }
        }
        self.publish();
    }

    fn on_complete(&mut self, outcome: AdjustmentOutcome) {
        let event = match &outcome {
            AdjustmentOutcome::Applied { exposure_time } => ControllerEvent::Adjusted {
                exposure_time: *exposure_time,
            },
            AdjustmentOutcome::Failed { reason } => ControllerEvent::ApplyFailed {
                reason: reason.clone(),
            },
        };
        self.pending = None;
        self.controller.complete(outcome, Instant::now());
        self.publish();
        self.reporter.report(event);
    }

    fn publish(&self) {
        let _ = self.status.send(self.controller.status());
    }
}
