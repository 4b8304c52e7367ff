use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::modules::clock::Clock;
use crate::modules::errors::ProviderError;
use crate::modules::position::Reading;
use crate::modules::provider::{
    FixRequest, LocationProvider, PermissionState, SubscriptionHandle, SubscriptionId,
    WatchRequest, WatchSubscription,
};

/// In-memory device location provider.
///
/// Backs the app when no platform sensor is wired in, and doubles as the
/// device fake in tests: it counts sensor activations and watch releases.
pub struct SimulatedDevice {
    clock: Clock,
    state: Arc<Mutex<DeviceState>>,
    sensor_requests: AtomicU64,
    permission_prompts: AtomicU64,
    releases: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy)]
struct DeviceFix {
    latitude: f64,
    longitude: f64,
    accuracy: Option<f64>,
}

struct DeviceState {
    service_enabled: bool,
    foreground_answer: PermissionState,
    background_answer: PermissionState,
    fix: Option<DeviceFix>,
    last_known: Option<Reading>,
    stall_fixes: bool,
    watchers: HashMap<SubscriptionId, UnboundedSender<Reading>>,
    next_subscription: u64,
}

fn lock(state: &Mutex<DeviceState>) -> MutexGuard<'_, DeviceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedDevice {
    /// Location services on, both permissions granted, no satellite fix yet.
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(DeviceState {
                service_enabled: true,
                foreground_answer: PermissionState::Granted,
                background_answer: PermissionState::Granted,
                fix: None,
                last_known: None,
                stall_fixes: false,
                watchers: HashMap::new(),
                next_subscription: 0,
            })),
            sensor_requests: AtomicU64::new(0),
            permission_prompts: AtomicU64::new(0),
            releases: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_service_enabled(&self, enabled: bool) {
        lock(&self.state).service_enabled = enabled;
    }

    /// Answers the next permission prompts will give.
    pub fn set_permission_answers(&self, foreground: bool, background: bool) {
        let mut state = lock(&self.state);
        state.foreground_answer = grant(foreground);
        state.background_answer = grant(background);
    }

    /// Places the device at a coordinate without notifying watchers.
    pub fn set_fix(&self, latitude: f64, longitude: f64, accuracy: Option<f64>) {
        lock(&self.state).fix = Some(DeviceFix {
            latitude,
            longitude,
            accuracy,
        });
    }

    /// Simulates losing the satellite fix. Cached readings are kept.
    pub fn clear_fix(&self) {
        lock(&self.state).fix = None;
    }

    /// One-shot requests that need the sensor never complete while stalled.
    pub fn set_stall_fixes(&self, stall: bool) {
        lock(&self.state).stall_fixes = stall;
    }

    /// Moves the device and delivers the reading to every live watcher.
    /// Returns the number of watchers that received it.
    pub fn emit(&self, latitude: f64, longitude: f64) -> usize {
        let reading = Reading::new(latitude, longitude, self.clock.now());
        let mut state = lock(&self.state);
        state.fix = Some(DeviceFix {
            latitude,
            longitude,
            accuracy: None,
        });
        state.last_known = Some(reading);
        state.watchers.retain(|_, tx| !tx.is_closed());
        state
            .watchers
            .values()
            .filter(|tx| tx.send(reading).is_ok())
            .count()
    }

    pub fn sensor_requests(&self) -> u64 {
        self.sensor_requests.load(Ordering::SeqCst)
    }

    pub fn permission_prompts(&self) -> u64 {
        self.permission_prompts.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn live_watchers(&self) -> usize {
        lock(&self.state).watchers.len()
    }

    fn cached_reading(&self, max_age: std::time::Duration) -> Option<Reading> {
        let state = lock(&self.state);
        let reading = state.last_known?;
        let max_age = Duration::from_std(max_age).ok()?;
        (self.clock.now() - reading.captured_at < max_age).then_some(reading)
    }
}

fn grant(granted: bool) -> PermissionState {
    if granted {
        PermissionState::Granted
    } else {
        PermissionState::Denied
    }
}

#[async_trait]
impl LocationProvider for SimulatedDevice {
    async fn is_service_enabled(&self) -> Result<bool, ProviderError> {
        Ok(lock(&self.state).service_enabled)
    }

    async fn request_foreground_permission(&self) -> Result<PermissionState, ProviderError> {
        self.permission_prompts.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.state).foreground_answer)
    }

    async fn request_background_permission(&self) -> Result<PermissionState, ProviderError> {
        self.permission_prompts.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.state).background_answer)
    }

    async fn current_position(&self, request: FixRequest) -> Result<Reading, ProviderError> {
        let stall = {
            let state = lock(&self.state);
            if !state.service_enabled {
                return Err(ProviderError::ServiceDisabled);
            }
            if state.foreground_answer != PermissionState::Granted {
                return Err(ProviderError::NotAuthorized("foreground"));
            }
            state.stall_fixes
        };

        if let Some(cached) = self.cached_reading(request.max_cache_age) {
            return Ok(cached);
        }

        self.sensor_requests.fetch_add(1, Ordering::SeqCst);
        if stall {
            std::future::pending::<()>().await;
        }

        let mut state = lock(&self.state);
        let fix = state.fix.ok_or(ProviderError::NoFix)?;
        let mut reading = Reading::new(fix.latitude, fix.longitude, self.clock.now());
        reading.accuracy = fix.accuracy;
        state.last_known = Some(reading);
        Ok(reading)
    }

    async fn watch_position(&self, _request: WatchRequest) -> Result<WatchSubscription, ProviderError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = lock(&self.state);
            if !state.service_enabled {
                return Err(ProviderError::ServiceDisabled);
            }
            state.next_subscription += 1;
            let id = SubscriptionId(state.next_subscription);
            state.watchers.insert(id, tx);
            id
        };

        let state = Arc::downgrade(&self.state);
        let releases = self.releases.clone();
        let handle = SubscriptionHandle::new(id, move |id| {
            releases.fetch_add(1, Ordering::SeqCst);
            if let Some(state) = state.upgrade() {
                lock(&state).watchers.remove(&id);
            }
        });

        Ok(WatchSubscription {
            handle,
            readings: rx,
        })
    }
}
