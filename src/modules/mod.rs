// Module declarations
pub mod address;
pub mod clock;
pub mod debounce;
pub mod errors;
pub mod geo;
pub mod geocoder;
pub mod location_session;
pub mod position;
pub mod provider;
pub mod simulated_device;
pub mod task_store;
pub mod utils;

#[cfg(feature = "shell")]
pub mod app_state;
#[cfg(feature = "shell")]
pub mod tauri_commands;
