use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tauri::{AppHandle, Emitter};

use crate::modules::clock::Clock;
use crate::modules::geocoder::{NominatimGeocoder, StaticGeocoder};
use crate::modules::location_session::LocationSession;
use crate::modules::provider::Geocoder;
use crate::modules::simulated_device::SimulatedDevice;
use crate::modules::task_store::TaskStore;
use crate::modules::utils::{load_location_config, LocationConfig};

/// The mounted location screen: its session and the task forwarding
/// session snapshots to the webview.
pub struct MountedScreen {
    pub task_id: Option<String>,
    pub session: Arc<LocationSession>,
    forwarder: JoinHandle<()>,
}

impl Drop for MountedScreen {
    fn drop(&mut self) {
        self.session.unmount();
        self.forwarder.abort();
    }
}

pub struct AppState {
    pub clock: Clock,
    pub device: Arc<SimulatedDevice>,
    pub config: Arc<Mutex<LocationConfig>>,
    pub screen: Arc<Mutex<Option<MountedScreen>>>,
    pub tasks: TaskStore,
}

impl AppState {
    pub fn new() -> Self {
        let config = load_location_config().unwrap_or_else(|e| {
            log::warn!("Using default location config: {:#}", e);
            LocationConfig::default()
        });

        let clock = Clock::new();
        let device = Arc::new(SimulatedDevice::new(clock));
        // Mock state: the courier starts at the depot.
        device.set_fix(40.7128, -74.0060, Some(12.0));

        Self {
            clock,
            device,
            config: Arc::new(Mutex::new(config)),
            screen: Arc::new(Mutex::new(None)),
            tasks: TaskStore::new(),
        }
    }

    fn geocoder(config: &LocationConfig) -> Arc<dyn Geocoder> {
        if !config.geocoder.enabled {
            return Arc::new(StaticGeocoder::default());
        }
        match NominatimGeocoder::new(&config.geocoder) {
            Ok(geocoder) => Arc::new(geocoder),
            Err(e) => {
                log::warn!("Geocoder unavailable, addresses will not resolve: {}", e);
                Arc::new(StaticGeocoder::default())
            }
        }
    }

    /// Mounts a fresh location screen, replacing (and tearing down) any
    /// previously mounted one.
    pub async fn mount_screen(&self, app: AppHandle, task_id: Option<String>) -> Arc<LocationSession> {
        let config = self.config.lock().await.clone();
        let session = Arc::new(LocationSession::with_clock(
            self.device.clone(),
            Self::geocoder(&config),
            config,
            self.clock,
        ));

        let mut snapshots = session.subscribe();
        let forwarder = tokio::spawn(async move {
            while snapshots.changed().await.is_ok() {
                let snapshot = snapshots.borrow_and_update().clone();
                if let Err(e) = app.emit("location_state", &snapshot) {
                    log::error!("Failed to emit location state: {}", e);
                }
            }
        });

        let mut screen = self.screen.lock().await;
        *screen = Some(MountedScreen {
            task_id,
            session: session.clone(),
            forwarder,
        });
        session
    }

    pub async fn unmount_screen(&self) -> bool {
        self.screen.lock().await.take().is_some()
    }

    pub async fn session(&self) -> Result<Arc<LocationSession>, String> {
        self.screen
            .lock()
            .await
            .as_ref()
            .map(|screen| screen.session.clone())
            .ok_or_else(|| "Location screen is not mounted".to_string())
    }

    pub async fn mounted_task(&self) -> Option<String> {
        self.screen.lock().await.as_ref().and_then(|screen| screen.task_id.clone())
    }
}
