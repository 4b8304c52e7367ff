// Module declarations
pub mod modules;

pub use modules::{
    address::{format_address, AddressComponents, ADDRESS_UNAVAILABLE, UNKNOWN_LOCATION},
    clock::Clock,
    errors::{ErrorKind, GeocodeError, LocationError, ProviderError, SessionError},
    geocoder::{NominatimGeocoder, StaticGeocoder},
    location_session::{
        DeliveryCompletion, LocationSession, SessionPhase, SessionSnapshot, TrackingInfo,
        BACKGROUND_NOTICE,
    },
    position::{Position, PositionId, Reading},
    provider::{
        Accuracy, FixRequest, Geocoder, LocationProvider, PermissionState, SubscriptionHandle,
        SubscriptionId, WatchRequest, WatchSubscription,
    },
    simulated_device::SimulatedDevice,
    task_store::{TaskEvent, TaskRecord, TaskStore},
    utils::{format_elapsed, GeocoderConfig, LocationConfig},
};

#[cfg(feature = "shell")]
pub use shell::run;

#[cfg(feature = "shell")]
mod shell {
    use crate::modules::{app_state::AppState, tauri_commands::*, utils::{format_elapsed, send_log}};

    use tauri::{Emitter, Manager};
    use tokio::time::{interval, MissedTickBehavior};

    #[cfg_attr(mobile, tauri::mobile_entry_point)]
    pub fn run() {
        tauri::Builder::default()
            .plugin(tauri_plugin_log::Builder::new()
                .target(tauri_plugin_log::Target::new(
                    tauri_plugin_log::TargetKind::Stdout,
                ))
                .build())
            .manage(AppState::new())
            .invoke_handler(tauri::generate_handler![
                mount_location_screen,
                unmount_location_screen,
                get_location_state,
                request_location_permission,
                refresh_location,
                start_tracking,
                stop_tracking,
                complete_delivery,
                dismiss_location_notice,
                record_task_event,
                get_task_history,
                load_location_config,
                save_location_config,
                simulate_device_fix,
                set_simulated_permissions,
            ])
            .setup(|app| {
                let app_handle = app.handle();
                setup_elapsed_ticker(app_handle.clone());
                send_log(app_handle, "info", "Courier Companion initialized");
                Ok(())
            })
            .run(tauri::generate_context!())
            .expect("error while running tauri application");
    }

    /// Pushes the elapsed tracking time to the webview once per second
    /// while a screen is tracking.
    fn setup_elapsed_ticker(app: tauri::AppHandle) {
        tauri::async_runtime::spawn(async move {
            let mut timer = interval(std::time::Duration::from_secs(1));
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                timer.tick().await;

                let state = app.state::<AppState>();
                let Ok(session) = state.session().await else {
                    continue;
                };
                if let Some(elapsed) = session.elapsed_tracking_time() {
                    let payload = serde_json::json!({
                        "seconds": elapsed.num_seconds(),
                        "formatted": format_elapsed(elapsed),
                    });
                    if let Err(e) = app.emit("tracking_elapsed", &payload) {
                        log::error!("Failed to emit tracking time: {}", e);
                    }
                }
            }
        });
    }
}
