use tauri::{AppHandle, State};

use crate::modules::app_state::AppState;
use crate::modules::location_session::{DeliveryCompletion, SessionSnapshot, TrackingInfo};
use crate::modules::position::Position;
use crate::modules::provider::PermissionState;
use crate::modules::task_store::{TaskEvent, TaskRecord};
use crate::modules::utils::{self, send_log, LocationConfig};

#[tauri::command]
pub async fn mount_location_screen(
    task_id: Option<String>,
    state: State<'_, AppState>,
    app: AppHandle,
) -> Result<SessionSnapshot, String> {
    let session = state.mount_screen(app.clone(), task_id.clone()).await;
    if let Some(task_id) = task_id {
        state.tasks.record(TaskEvent::Started { task_id }).await;
    }
    send_log(&app, "info", "Location screen mounted");
    Ok(session.snapshot())
}

#[tauri::command]
pub async fn unmount_location_screen(state: State<'_, AppState>, app: AppHandle) -> Result<(), String> {
    if state.unmount_screen().await {
        send_log(&app, "info", "Location screen unmounted");
    }
    Ok(())
}

#[tauri::command]
pub async fn get_location_state(state: State<'_, AppState>) -> Result<SessionSnapshot, String> {
    Ok(state.session().await?.snapshot())
}

#[tauri::command]
pub async fn request_location_permission(
    state: State<'_, AppState>,
    app: AppHandle,
) -> Result<PermissionState, String> {
    let session = state.session().await?;
    session.request_permission().await.map_err(|e| {
        send_log(&app, "warn", &format!("Location permission failed: {}", e));
        e.to_string()
    })
}

#[tauri::command]
pub async fn refresh_location(state: State<'_, AppState>) -> Result<Position, String> {
    let session = state.session().await?;
    session.refresh().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn start_tracking(state: State<'_, AppState>, app: AppHandle) -> Result<TrackingInfo, String> {
    let session = state.session().await?;
    let info = session.start_tracking().await.map_err(|e| e.to_string())?;
    send_log(&app, "info", &format!("Tracking active on {}", info.subscription_id));
    Ok(info)
}

#[tauri::command]
pub async fn stop_tracking(state: State<'_, AppState>) -> Result<(), String> {
    state.session().await?.stop_tracking();
    Ok(())
}

#[tauri::command]
pub async fn complete_delivery(
    state: State<'_, AppState>,
    app: AppHandle,
) -> Result<DeliveryCompletion, String> {
    let session = state.session().await?;
    let completion = session.complete_task().map_err(|e| e.to_string())?;

    match state.mounted_task().await {
        Some(task_id) => {
            state.tasks.record_completion(&task_id, &completion).await;
            send_log(&app, "info", &format!("Delivery {} completed", task_id));
        }
        None => send_log(&app, "warn", "Delivery completed without a task attached"),
    }
    Ok(completion)
}

#[tauri::command]
pub async fn dismiss_location_notice(state: State<'_, AppState>) -> Result<(), String> {
    state.session().await?.dismiss_notice();
    Ok(())
}

#[tauri::command]
pub async fn record_task_event(event: TaskEvent, state: State<'_, AppState>) -> Result<(), String> {
    state.tasks.record(event).await;
    Ok(())
}

#[tauri::command]
pub async fn get_task_history(task_id: String, state: State<'_, AppState>) -> Result<Vec<TaskRecord>, String> {
    Ok(state.tasks.history(&task_id).await)
}

#[tauri::command]
pub async fn load_location_config(state: State<'_, AppState>) -> Result<LocationConfig, String> {
    Ok(state.config.lock().await.clone())
}

/// Saved settings apply to the next mounted screen.
#[tauri::command]
pub async fn save_location_config(
    config: LocationConfig,
    state: State<'_, AppState>,
    app: AppHandle,
) -> Result<(), String> {
    utils::save_location_config(&config).map_err(|e| format!("{:#}", e))?;
    *state.config.lock().await = config;
    send_log(&app, "info", "Location config saved");
    Ok(())
}

#[tauri::command]
pub async fn simulate_device_fix(
    latitude: f64,
    longitude: f64,
    state: State<'_, AppState>,
    app: AppHandle,
) -> Result<usize, String> {
    let delivered = state.device.emit(latitude, longitude);
    send_log(
        &app,
        "debug",
        &format!("Simulated fix ({:.5}, {:.5}) sent to {} watcher(s)", latitude, longitude, delivered),
    );
    Ok(delivered)
}

#[tauri::command]
pub async fn set_simulated_permissions(
    service_enabled: bool,
    foreground: bool,
    background: bool,
    state: State<'_, AppState>,
) -> Result<(), String> {
    state.device.set_service_enabled(service_enabled);
    state.device.set_permission_answers(foreground, background);
    Ok(())
}
