use crate::commands::config::current_config;
use crate::config::AutoExposureConfig;
use crate::controller::ControllerStatus;
use crate::device::{DeviceAdapter, FrameSource};
use crate::events::ControllerEvent;
use crate::platform::{list_devices, DeviceSummary, NokhwaCamera};
use crate::scheduler::{AutoExposure, AutoExposureHandle};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tauri::command;
use tokio::sync::RwLock;

lazy_static::lazy_static! {
    static ref SESSION_REGISTRY: Arc<RwLock<HashMap<String, AutoExposureHandle>>> = Arc::new(RwLock::new(HashMap::new()));
}

/// Session state reported to the frontend
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub running: bool,
    pub status: ControllerStatus,
}

/// Start a loop over an already-opened device and track it in the registry
pub async fn start_session(
    device: Arc<dyn DeviceAdapter>,
    frames: Box<dyn FrameSource>,
    config: AutoExposureConfig,
) -> String {
    let handle = AutoExposure::new(config).start(device, frames);
    let session_id = uuid::Uuid::new_v4().to_string();

    let mut registry = SESSION_REGISTRY.write().await;
    registry.insert(session_id.clone(), handle);
    log::info!("Registered auto-exposure session {}", session_id);

    session_id
}

/// List cameras that can be put under auto-exposure control
#[command]
pub async fn list_exposure_devices() -> Result<Vec<DeviceSummary>, String> {
    list_devices().map_err(|e| e.to_string())
}

/// Open a camera and start controlling its exposure
#[command]
pub async fn start_auto_exposure(device_id: String) -> Result<String, String> {
    let config = current_config()?;
    config.validate()?;

    let camera = NokhwaCamera::open(&device_id).map_err(|e| e.to_string())?;
    camera.start_stream().map_err(|e| e.to_string())?;

    let frames: Box<dyn FrameSource> = Box::new(camera.clone());
    Ok(start_session(Arc::new(camera), frames, config).await)
}

/// Stop a session, restoring automatic exposure on its device
#[command]
pub async fn stop_auto_exposure(session_id: String) -> Result<ControllerStatus, String> {
    let handle = {
        let mut registry = SESSION_REGISTRY.write().await;
        registry
            .remove(&session_id)
            .ok_or_else(|| format!("Unknown auto-exposure session: {}", session_id))?
    };

    let status = handle.stop().await.map_err(|e| e.to_string())?;
    log::info!("Stopped auto-exposure session {}", session_id);
    Ok(status)
}

/// Get controller status for a session
#[command]
pub async fn get_auto_exposure_status(session_id: String) -> Result<SessionStatus, String> {
    let registry = SESSION_REGISTRY.read().await;
    let handle = registry
        .get(&session_id)
        .ok_or_else(|| format!("Unknown auto-exposure session: {}", session_id))?;

    Ok(SessionStatus {
        session_id,
        running: handle.is_running(),
        status: handle.status(),
    })
}

/// Poll for controller events (non-blocking)
#[command]
pub async fn poll_auto_exposure_event(
    session_id: String,
) -> Result<Option<ControllerEvent>, String> {
    let registry = SESSION_REGISTRY.read().await;
    let handle = registry
        .get(&session_id)
        .ok_or_else(|| format!("Unknown auto-exposure session: {}", session_id))?;

    Ok(handle.poll_event().await)
}

/// Ids of all tracked sessions
#[command]
pub async fn list_auto_exposure_sessions() -> Result<Vec<String>, String> {
    let registry = SESSION_REGISTRY.read().await;
    Ok(registry.keys().cloned().collect())
}
