//! Closed-loop tests: scheduler, controller and simulated camera together.
//!
//! All tests run on paused tokio time, so update intervals and device
//! latency elapse instantly and deterministically.

use crabexposure::config::AutoExposureConfig;
use crabexposure::events::ControllerEvent;
use crabexposure::scheduler::{AutoExposure, AutoExposureHandle, HostTicker};
use crabexposure::testing::SimulatedCamera;
use crabexposure::types::{ConstraintRequest, ExposureMode, SamplingWindow};
use std::sync::Arc;
use std::time::Duration;

/// Gray levels go through BT.709 weights, so expect a few ulps of drift
fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {}, got {}",
        expected,
        actual
    );
}

fn seeded_config() -> AutoExposureConfig {
    let mut config = AutoExposureConfig::default();
    config.sampling.seed = Some(7);
    config
}

fn start(camera: &SimulatedCamera, config: AutoExposureConfig) -> AutoExposureHandle {
    AutoExposure::new(config).start(Arc::new(camera.clone()), Box::new(camera.clone()))
}

/// Collect events until one matches `stop_at`, giving up after `limit` events
async fn events_until<F>(handle: &AutoExposureHandle, limit: usize, stop_at: F) -> Vec<ControllerEvent>
where
    F: Fn(&ControllerEvent) -> bool,
{
    let mut seen = Vec::new();
    while seen.len() < limit {
        match handle.wait_for_event().await {
            Some(event) => {
                let done = stop_at(&event);
                seen.push(event);
                if done {
                    break;
                }
            }
            None => break,
        }
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn test_converges_to_target() {
    // 500 * 0.08 = 40, target 100 -> 1250 renders at exactly 100
    let camera = SimulatedCamera::with_manual_range(50.0, 10000.0);
    let handle = start(&camera, seeded_config());

    let events = events_until(&handle, 10, |e| matches!(e, ControllerEvent::Adjusted { .. })).await;
    assert!(matches!(events[0], ControllerEvent::Attached { .. }));
    let (from, to, apl) = events
        .iter()
        .find_map(|e| match e {
            ControllerEvent::AdjustmentIssued { from, to, apl } => Some((*from, *to, *apl)),
            _ => None,
        })
        .expect("an adjustment should be issued");
    assert_eq!(from, 500.0);
    assert_close(to, 1250.0);
    assert_close(apl, 40.0);

    tokio::time::sleep(Duration::from_secs(2)).await;

    let status = handle.stop().await.unwrap();
    assert_close(status.current_exposure_time, 1250.0);
    assert_eq!(status.adjustments_committed, 1);
    assert_close(camera.exposure_time(), 1250.0);
    assert_eq!(camera.exposure_applies().len(), 1);
    assert_eq!(camera.mode(), ExposureMode::Continuous);
}

#[tokio::test(start_paused = true)]
async fn test_saturates_at_device_maximum() {
    // Wants 1250 but the device tops out at 1000; afterwards 80 APL has no headroom
    let camera = SimulatedCamera::with_manual_range(50.0, 1000.0);
    let handle = start(&camera, seeded_config());

    tokio::time::sleep(Duration::from_secs(2)).await;

    let status = handle.stop().await.unwrap();
    assert_eq!(status.current_exposure_time, 1000.0);
    assert_eq!(camera.exposure_applies().len(), 1);
    assert_close(status.last_apl.unwrap_or_default(), 80.0);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_device_is_pass_through() {
    let camera = SimulatedCamera::without_exposure_control();
    let handle = start(&camera, seeded_config());

    let first = handle.wait_for_event().await;
    assert!(matches!(first, Some(ControllerEvent::Unsupported { .. })));

    tokio::time::sleep(Duration::from_secs(1)).await;
    let status = handle.stop().await.unwrap();

    assert!(!status.control_allowed);
    assert!(camera.history().is_empty());
    assert_eq!(camera.mode(), ExposureMode::Continuous);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_manual_mode_disables_control() {
    let camera = SimulatedCamera::with_manual_range(50.0, 10000.0);
    camera.reject_mode_changes(true);
    let handle = start(&camera, seeded_config());

    let first = handle.wait_for_event().await;
    assert!(matches!(first, Some(ControllerEvent::Unsupported { .. })));

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.stop().await.unwrap();
    assert!(camera.exposure_applies().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_apply_is_retried() {
    let camera = SimulatedCamera::with_manual_range(50.0, 10000.0);
    camera.fail_next_applies(1);
    let handle = start(&camera, seeded_config());

    let events = events_until(&handle, 10, |e| matches!(e, ControllerEvent::Adjusted { .. })).await;
    let failed = events
        .iter()
        .position(|e| matches!(e, ControllerEvent::ApplyFailed { .. }))
        .expect("first apply should fail");
    let adjusted = events
        .iter()
        .position(|e| matches!(e, ControllerEvent::Adjusted { .. }))
        .expect("retry should succeed");
    assert!(failed < adjusted);

    let status = handle.stop().await.unwrap();
    assert_eq!(status.adjustments_failed, 1);
    assert_eq!(status.adjustments_committed, 1);
    assert_close(status.current_exposure_time, 1250.0);

    let applies = camera.exposure_applies();
    assert_eq!(applies.len(), 2);
    assert!(!applies[0].succeeded);
    assert!(applies[1].succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_scene_change_respects_update_interval() {
    // 500 * 0.04 = 20 -> 2500 renders at 100
    let camera = SimulatedCamera::with_manual_range(50.0, 10000.0);
    camera.set_scene_gain(0.04);
    let handle = start(&camera, seeded_config());

    events_until(&handle, 10, |e| matches!(e, ControllerEvent::Adjusted { .. })).await;
    assert_close(camera.exposure_time(), 2500.0);

    // Scene brightens right after the commit: 2500 * 0.05 = 125 -> 2000
    camera.set_scene_gain(0.05);
    events_until(&handle, 10, |e| matches!(e, ControllerEvent::Adjusted { .. })).await;
    assert_close(camera.exposure_time(), 2000.0);

    let applies = camera.exposure_applies();
    assert_eq!(applies.len(), 2);
    assert!(applies[1].at - applies[0].at > Duration::from_millis(200));

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_slow_device_keeps_single_flight() {
    let camera = SimulatedCamera::with_manual_range(50.0, 10000.0);
    camera.set_apply_latency(Duration::from_millis(500));
    let handle = start(&camera, seeded_config());

    let events = events_until(&handle, 20, |e| matches!(e, ControllerEvent::Adjusted { .. })).await;
    let issued = events
        .iter()
        .filter(|e| matches!(e, ControllerEvent::AdjustmentIssued { .. }))
        .count();
    assert_eq!(issued, 1);
    assert_eq!(handle.status().adjustments_committed, 1);

    handle.stop().await.unwrap();
    assert_eq!(camera.exposure_applies().len(), 1);
    assert_eq!(camera.peak_concurrent_applies(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_adjustment_restores_auto_exposure() {
    let camera = SimulatedCamera::with_manual_range(50.0, 10000.0);
    camera.set_apply_latency(Duration::from_secs(1));
    let handle = start(&camera, seeded_config());

    events_until(&handle, 10, |e| {
        matches!(e, ControllerEvent::AdjustmentIssued { .. })
    })
    .await;

    let status = handle.stop().await.unwrap();
    // Stop waits for the in-flight apply and commits it before restoring
    assert_eq!(status.adjustments_committed, 1);
    assert!(!status.control_allowed);
    assert_close(camera.exposure_time(), 1250.0);
    assert_eq!(camera.mode(), ExposureMode::Continuous);

    // The restore never overlaps the exposure write
    assert_eq!(camera.peak_concurrent_applies(), 1);
    let last = camera.history().pop().unwrap();
    assert_eq!(last.request, ConstraintRequest::Mode(ExposureMode::Continuous));
    assert!(last.succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_attach_hangs() {
    let camera = SimulatedCamera::with_manual_range(50.0, 10000.0);
    camera.stall_applies(true);
    let handle = start(&camera, seeded_config());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = tokio::time::timeout(Duration::from_secs(5), handle.stop())
        .await
        .expect("stop must not wait on a hung mode switch")
        .unwrap();
    assert!(!status.control_allowed);
    // Control was never granted, so no restore is sent
    assert!(camera.history().is_empty());
    assert_eq!(camera.peak_concurrent_applies(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_restore_is_reported() {
    let camera = SimulatedCamera::with_manual_range(50.0, 10000.0);
    let handle = start(&camera, seeded_config());

    events_until(&handle, 10, |e| matches!(e, ControllerEvent::Adjusted { .. })).await;
    camera.reject_mode_changes(true);
    handle.cancel();

    let events = events_until(&handle, 10, |e| matches!(e, ControllerEvent::Stopped)).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, ControllerEvent::RestoreFailed { .. })));
    assert_eq!(events.last(), Some(&ControllerEvent::Stopped));
    assert_eq!(camera.mode(), ExposureMode::Manual);
}

#[tokio::test(start_paused = true)]
async fn test_frames_not_ready_skip_sampling() {
    let camera = SimulatedCamera::with_manual_range(50.0, 10000.0);
    camera.set_ready(false);
    let handle = start(&camera, seeded_config());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(camera.exposure_applies().is_empty());
    assert_eq!(handle.status().last_apl, None);

    camera.set_ready(true);
    events_until(&handle, 10, |e| matches!(e, ControllerEvent::Adjusted { .. })).await;
    assert_close(camera.exposure_time(), 1250.0);

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_tiny_frames_are_skipped() {
    // Window side on a 2x2 frame rounds to 0
    let camera = SimulatedCamera::with_manual_range(50.0, 10000.0);
    camera.set_dimensions(2, 2);
    let handle = start(&camera, seeded_config());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(camera.exposure_applies().is_empty());

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_host_ticks_drive_sampling() {
    let camera = SimulatedCamera::with_manual_range(50.0, 10000.0);
    let (trigger, ticker) = HostTicker::channel();
    let handle = AutoExposure::new(seeded_config()).start_with_ticks(
        Arc::new(camera.clone()),
        Box::new(camera.clone()),
        Box::new(ticker),
    );

    // No ticks, no sampling
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(camera.exposure_applies().is_empty());

    trigger.notify();
    events_until(&handle, 10, |e| matches!(e, ControllerEvent::Adjusted { .. })).await;
    assert_close(camera.exposure_time(), 1250.0);

    // Dropping the host side ends the session
    drop(trigger);
    let events = events_until(&handle, 10, |e| matches!(e, ControllerEvent::Stopped)).await;
    assert_eq!(events.last(), Some(&ControllerEvent::Stopped));
    assert_eq!(camera.mode(), ExposureMode::Continuous);
}

#[tokio::test(start_paused = true)]
async fn test_custom_window_selector() {
    // Right-half window instead of the centered square
    let camera = SimulatedCamera::with_manual_range(50.0, 10000.0);
    let handle = AutoExposure::new(seeded_config())
        .with_window_selector(|width: u32, height: u32| {
            SamplingWindow::new(width / 2, 0, width / 2, height)
        })
        .start(Arc::new(camera.clone()), Box::new(camera.clone()));

    events_until(&handle, 10, |e| matches!(e, ControllerEvent::Adjusted { .. })).await;
    handle.stop().await.unwrap();
    assert_close(camera.exposure_time(), 1250.0);
}

#[tokio::test(start_paused = true)]
async fn test_independent_sessions() {
    let cameras: Vec<SimulatedCamera> = [0.04, 0.08]
        .iter()
        .map(|gain| {
            let camera = SimulatedCamera::with_manual_range(50.0, 10000.0);
            camera.set_scene_gain(*gain);
            camera
        })
        .collect();
    let handles: Vec<AutoExposureHandle> = cameras
        .iter()
        .map(|camera| start(camera, seeded_config()))
        .collect();

    tokio::time::sleep(Duration::from_secs(2)).await;

    let statuses = futures::future::join_all(handles.into_iter().map(|h| h.stop())).await;
    for status in statuses {
        tokio_test::assert_ok!(&status);
    }
    assert_close(cameras[0].exposure_time(), 2500.0);
    assert_close(cameras[1].exposure_time(), 1250.0);
}
