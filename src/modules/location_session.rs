use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::modules::address::address_label;
use crate::modules::clock::Clock;
use crate::modules::debounce::Debouncer;
use crate::modules::errors::{ErrorKind, LocationError, ProviderError, SessionError};
use crate::modules::geo::EmissionGate;
use crate::modules::position::{Position, PositionId, Reading};
use crate::modules::provider::{
    FixRequest, Geocoder, LocationProvider, PermissionState, SubscriptionHandle, SubscriptionId,
    WatchRequest,
};
use crate::modules::utils::LocationConfig;

pub const BACKGROUND_NOTICE: &str =
    "Background location is off. Tracking continues only while the app is open.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    RequestingPermission,
    PermissionDenied,
    ServiceDisabled,
    Ready,
    Tracking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingInfo {
    pub subscription_id: SubscriptionId,
    pub started_at: DateTime<Utc>,
}

/// Everything the location screen renders. Published on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub revision: u64,
    pub phase: SessionPhase,
    pub current_position: Option<Position>,
    pub foreground_permission: PermissionState,
    pub background_permission: PermissionState,
    pub is_loading: bool,
    pub last_error: Option<SessionError>,
    pub tracking: Option<TrackingInfo>,
    pub notice: Option<String>,
}

impl SessionSnapshot {
    pub fn tracking_active(&self) -> bool {
        self.tracking.is_some()
    }
}

/// Result of a successful `complete_task`, handed on to the task store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryCompletion {
    pub position: Position,
    pub completed_at: DateTime<Utc>,
    pub tracked_for_secs: Option<i64>,
}

/// An open watch. Dropping it stops the reading pump and releases the
/// provider registration.
struct TrackingSession {
    handle: SubscriptionHandle,
    pump: JoinHandle<()>,
    started_at: DateTime<Utc>,
}

impl TrackingSession {
    fn info(&self) -> TrackingInfo {
        TrackingInfo {
            subscription_id: self.handle.id(),
            started_at: self.started_at,
        }
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

struct SessionState {
    revision: u64,
    phase: SessionPhase,
    foreground: PermissionState,
    background: PermissionState,
    loading: u32,
    last_error: Option<SessionError>,
    current: Option<Position>,
    next_position_id: u64,
    tracking: Option<TrackingSession>,
    geocode: Debouncer,
    notice: Option<String>,
    detached: bool,
}

impl SessionState {
    fn new(config: &LocationConfig) -> Self {
        Self {
            revision: 0,
            phase: SessionPhase::Idle,
            foreground: PermissionState::Unrequested,
            background: PermissionState::Unrequested,
            loading: 0,
            last_error: None,
            current: None,
            next_position_id: 0,
            tracking: None,
            geocode: Debouncer::new(config.geocode_debounce()),
            notice: None,
            detached: false,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            revision: self.revision,
            phase: self.phase,
            current_position: self.current.clone(),
            foreground_permission: self.foreground,
            background_permission: self.background,
            is_loading: self.loading > 0,
            last_error: self.last_error.clone(),
            tracking: self.tracking.as_ref().map(TrackingSession::info),
            notice: self.notice.clone(),
        }
    }

    /// Phase to return to once a transient operation finishes.
    fn settled_phase(&self) -> SessionPhase {
        if self.tracking.is_some() {
            SessionPhase::Tracking
        } else if self.foreground == PermissionState::Granted {
            SessionPhase::Ready
        } else {
            self.phase
        }
    }

    fn record_error(&mut self, err: &LocationError) {
        self.last_error = Some(SessionError::from(err));
    }

    fn clear_fix_errors(&mut self) {
        if matches!(
            self.last_error.as_ref().map(|e| e.kind),
            Some(ErrorKind::FixUnavailable | ErrorKind::NoFixYet)
        ) {
            self.last_error = None;
        }
    }

    /// Supersedes the current position. The previous address is carried
    /// over until the debounced lookup for the new reading completes.
    ///
    /// Returns `None` when the reading was captured before the current
    /// position; the current position is kept.
    fn accept(&mut self, reading: &Reading) -> Result<Option<Position>, ProviderError> {
        if let Some(current) = &self.current {
            if reading.captured_at < current.captured_at {
                return Ok(None);
            }
        }
        let carried = self.current.as_ref().and_then(|p| p.resolved_address.clone());
        let id = PositionId(self.next_position_id + 1);
        let position = Position::from_reading(id, reading, carried)?;
        self.next_position_id = id.0;
        self.current = Some(position.clone());
        Ok(Some(position))
    }

    /// Patches the address only if `target` is still the current position.
    fn attach_address(&mut self, target: PositionId, label: String) -> bool {
        match self.current.as_mut() {
            Some(current) if current.id == target => {
                current.resolved_address = Some(label);
                true
            }
            _ => {
                log::debug!("Discarding address for superseded position {:?}", target);
                false
            }
        }
    }
}

struct Inner {
    provider: Arc<dyn LocationProvider>,
    geocoder: Arc<dyn Geocoder>,
    config: LocationConfig,
    clock: Clock,
    state: Mutex<SessionState>,
    snapshots: watch::Sender<SessionSnapshot>,
    start_gate: tokio::sync::Mutex<()>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        let state = self.lock();
        f(&state)
    }

    /// Applies `f` and publishes a snapshot. Returns `None` once the
    /// session is detached, in which case nothing is touched.
    fn mutate<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> Option<R> {
        let mut state = self.lock();
        if state.detached {
            return None;
        }
        let out = f(&mut *state);
        state.revision += 1;
        self.snapshots.send_replace(state.snapshot());
        Some(out)
    }

    fn schedule_geocode(self: &Arc<Self>, position: &Position) {
        let session = Arc::downgrade(self);
        let geocoder = self.geocoder.clone();
        let (target, latitude, longitude) = (position.id, position.latitude, position.longitude);

        let mut state = self.lock();
        if state.detached {
            return;
        }
        state.geocode.schedule(async move {
            let label = address_label(geocoder.reverse_geocode(latitude, longitude).await);
            if let Some(inner) = session.upgrade() {
                inner.mutate(|s| s.attach_address(target, label));
            }
        });
    }
}

/// Keeps the loading flag raised while alive.
struct LoadingGuard<'a> {
    inner: &'a Inner,
}

impl<'a> LoadingGuard<'a> {
    fn enter(inner: &'a Inner, phase: Option<SessionPhase>) -> Result<Self, LocationError> {
        inner
            .mutate(|s| {
                s.loading += 1;
                if let Some(phase) = phase {
                    if s.tracking.is_none() {
                        s.phase = phase;
                    }
                }
            })
            .ok_or(LocationError::Detached)?;
        Ok(Self { inner })
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.inner.mutate(|s| s.loading = s.loading.saturating_sub(1));
    }
}

async fn pump_readings(
    session: Weak<Inner>,
    mut readings: UnboundedReceiver<Reading>,
    mut gate: EmissionGate,
) {
    while let Some(reading) = readings.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        if let Err(e) = reading.validate() {
            log::warn!("Dropping watch reading: {}", e);
            continue;
        }
        if !gate.admit(&reading) {
            log::debug!(
                "Watch reading at ({:.5}, {:.5}) held back by interval/displacement gate",
                reading.latitude,
                reading.longitude
            );
            continue;
        }

        let accepted = inner.mutate(|s| {
            let accepted = s.accept(&reading);
            if matches!(accepted, Ok(Some(_))) {
                s.clear_fix_errors();
            }
            accepted
        });
        match accepted {
            Some(Ok(Some(position))) => {
                log::debug!(
                    "Position {:?} updated from watch: ({:.5}, {:.5})",
                    position.id,
                    position.latitude,
                    position.longitude
                );
                inner.schedule_geocode(&position);
            }
            Some(Ok(None)) => log::debug!("Dropping watch reading older than the current position"),
            Some(Err(e)) => log::warn!("Dropping watch reading: {}", e),
            None => break,
        }
    }
    log::debug!("Watch reading stream closed");
}

/// Location tracking for one screen instance.
///
/// Owns the permission state, the current position, at most one watch
/// subscription and at most one pending address lookup. Dropping the
/// session (or calling [`LocationSession::unmount`]) releases the watch and
/// cancels the lookup; nothing is mutated afterwards.
pub struct LocationSession {
    inner: Arc<Inner>,
}

impl LocationSession {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        geocoder: Arc<dyn Geocoder>,
        config: LocationConfig,
    ) -> Self {
        Self::with_clock(provider, geocoder, config, Clock::new())
    }

    pub fn with_clock(
        provider: Arc<dyn LocationProvider>,
        geocoder: Arc<dyn Geocoder>,
        config: LocationConfig,
        clock: Clock,
    ) -> Self {
        let state = SessionState::new(&config);
        let (snapshots, _) = watch::channel(state.snapshot());
        Self {
            inner: Arc::new(Inner {
                provider,
                geocoder,
                config,
                clock,
                state: Mutex::new(state),
                snapshots,
                start_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.read(SessionState::snapshot)
    }

    pub fn current_position(&self) -> Option<Position> {
        self.inner.read(|s| s.current.clone())
    }

    pub fn tracking_active(&self) -> bool {
        self.inner.read(|s| s.tracking.is_some())
    }

    pub fn is_mounted(&self) -> bool {
        !self.inner.read(|s| s.detached)
    }

    /// Time since tracking started, or `None` when not tracking.
    pub fn elapsed_tracking_time(&self) -> Option<chrono::Duration> {
        let started_at = self.inner.read(|s| s.tracking.as_ref().map(|t| t.started_at))?;
        Some(self.inner.clock.now() - started_at)
    }

    /// Checks the location service, asks for foreground access and, once
    /// granted, fetches a first fix. A failing fix is recorded in
    /// `last_error` but does not fail the permission request.
    pub async fn request_permission(&self) -> Result<PermissionState, LocationError> {
        let _loading = LoadingGuard::enter(&self.inner, Some(SessionPhase::RequestingPermission))?;

        let outcome = self.acquire_foreground().await;
        self.inner
            .mutate(|s| match &outcome {
                Ok(()) => {
                    s.foreground = PermissionState::Granted;
                    s.last_error = None;
                    s.phase = s.settled_phase();
                }
                Err(err) => {
                    if *err == LocationError::PermissionDenied {
                        s.foreground = PermissionState::Denied;
                    }
                    if s.tracking.is_none() {
                        s.phase = match err {
                            LocationError::ServiceDisabled => SessionPhase::ServiceDisabled,
                            _ => SessionPhase::PermissionDenied,
                        };
                    }
                    s.record_error(err);
                }
            })
            .ok_or(LocationError::Detached)?;
        outcome?;

        log::info!("Foreground location permission granted");
        if let Err(e) = self.get_current_position().await {
            log::warn!("Initial position fix failed: {}", e);
        }
        Ok(PermissionState::Granted)
    }

    async fn acquire_foreground(&self) -> Result<(), LocationError> {
        match self.inner.provider.is_service_enabled().await {
            Ok(true) => {}
            Ok(false) => {
                log::warn!("Location services are disabled");
                return Err(LocationError::ServiceDisabled);
            }
            Err(e) => {
                log::warn!("Could not query location services: {}", e);
                return Err(LocationError::ServiceDisabled);
            }
        }

        match self.inner.provider.request_foreground_permission().await {
            Ok(PermissionState::Granted) => Ok(()),
            Ok(state) => {
                log::warn!("Foreground location permission not granted: {:?}", state);
                Err(LocationError::PermissionDenied)
            }
            Err(e) => {
                log::warn!("Foreground location permission request failed: {}", e);
                Err(LocationError::PermissionDenied)
            }
        }
    }

    /// One-shot high-accuracy fix. A failure keeps the previous position.
    pub async fn get_current_position(&self) -> Result<Position, LocationError> {
        if self.inner.read(|s| s.foreground) != PermissionState::Granted {
            let err = LocationError::PermissionDenied;
            self.inner.mutate(|s| s.record_error(&err));
            return Err(err);
        }

        let _loading = LoadingGuard::enter(&self.inner, None)?;
        let config = &self.inner.config;
        let request = FixRequest {
            accuracy: config.accuracy,
            max_cache_age: config.max_cache_age(),
        };

        let reading = match tokio::time::timeout(
            config.fix_timeout(),
            self.inner.provider.current_position(request),
        )
        .await
        {
            Ok(reading) => reading,
            Err(_) => Err(ProviderError::Timeout(config.fix_timeout_ms)),
        };

        let accepted = self
            .inner
            .mutate(|s| {
                match reading.and_then(|r| s.accept(&r)) {
                    Ok(Some(position)) => {
                        s.clear_fix_errors();
                        Ok(Some(position))
                    }
                    Ok(None) => {
                        log::debug!("Position fix is older than the current position, keeping current");
                        s.clear_fix_errors();
                        Ok(None)
                    }
                    Err(e) => {
                        log::warn!("Position fix failed: {}", e);
                        let err = LocationError::FixUnavailable;
                        s.record_error(&err);
                        Err(err)
                    }
                }
            })
            .ok_or(LocationError::Detached)?;

        match accepted? {
            Some(position) => {
                self.inner.schedule_geocode(&position);
                Ok(position)
            }
            None => self.current_position().ok_or(LocationError::FixUnavailable),
        }
    }

    /// Retry affordance. Re-fetches the position when permission is in
    /// place, otherwise re-runs the permission flow.
    pub async fn refresh(&self) -> Result<Position, LocationError> {
        match self.inner.read(|s| s.phase) {
            SessionPhase::Ready | SessionPhase::Tracking => self.get_current_position().await,
            _ => {
                self.request_permission().await?;
                self.current_position().ok_or(LocationError::FixUnavailable)
            }
        }
    }

    /// Opens the continuous watch. Calling it while tracking returns the
    /// existing subscription unchanged.
    pub async fn start_tracking(&self) -> Result<TrackingInfo, LocationError> {
        let _serial = self.inner.start_gate.lock().await;

        if let Some(info) = self.inner.read(|s| s.tracking.as_ref().map(TrackingSession::info)) {
            log::debug!("Tracking already active on {}", info.subscription_id);
            return Ok(info);
        }

        if self.inner.read(|s| s.foreground) != PermissionState::Granted {
            self.request_permission().await?;
        }
        self.request_background().await;

        let config = &self.inner.config;
        let request = WatchRequest {
            accuracy: config.accuracy,
            min_interval: config.watch_min_interval(),
            min_displacement_m: config.watch_min_displacement_m,
        };
        let subscription = match self.inner.provider.watch_position(request).await {
            Ok(subscription) => subscription,
            Err(e) => {
                log::warn!("Could not open location watch: {}", e);
                let err = LocationError::FixUnavailable;
                self.inner.mutate(|s| s.record_error(&err));
                return Err(err);
            }
        };

        let (handle, readings) = subscription.into_parts();
        let gate = EmissionGate::new(config.watch_min_interval(), config.watch_min_displacement_m);
        let pump = tokio::spawn(pump_readings(Arc::downgrade(&self.inner), readings, gate));
        let tracking = TrackingSession {
            handle,
            pump,
            started_at: self.inner.clock.now(),
        };
        let info = tracking.info();

        self.inner
            .mutate(move |s| {
                s.tracking = Some(tracking);
                s.phase = SessionPhase::Tracking;
            })
            .ok_or(LocationError::Detached)?;

        log::info!("Started location tracking on {}", info.subscription_id);
        Ok(info)
    }

    async fn request_background(&self) {
        let granted = match self.inner.provider.request_background_permission().await {
            Ok(PermissionState::Granted) => true,
            Ok(state) => {
                log::warn!(
                    "Background location not granted ({:?}); tracking in foreground-only mode",
                    state
                );
                false
            }
            Err(e) => {
                log::warn!(
                    "Background location request failed: {}; tracking in foreground-only mode",
                    e
                );
                false
            }
        };

        self.inner.mutate(|s| {
            if granted {
                s.background = PermissionState::Granted;
                s.notice = None;
            } else {
                s.background = PermissionState::Denied;
                s.notice = Some(BACKGROUND_NOTICE.to_string());
            }
        });
    }

    /// Releases the watch and cancels any pending address lookup.
    /// Safe to call repeatedly or when not tracking.
    pub fn stop_tracking(&self) {
        let stopped = self
            .inner
            .mutate(|s| {
                s.geocode.cancel();
                let tracking = s.tracking.take();
                s.phase = s.settled_phase();
                tracking
            })
            .flatten();

        if let Some(tracking) = stopped {
            let info = tracking.info();
            drop(tracking);
            log::info!(
                "Stopped location tracking on {} after {}s",
                info.subscription_id,
                (self.inner.clock.now() - info.started_at).num_seconds()
            );
        }
    }

    /// Finishes the delivery at the current position. Stops tracking and
    /// returns the completion for the task store; persists nothing.
    pub fn complete_task(&self) -> Result<DeliveryCompletion, LocationError> {
        let (detached, position, started_at) = self.inner.read(|s| {
            (
                s.detached,
                s.current.clone(),
                s.tracking.as_ref().map(|t| t.started_at),
            )
        });
        if detached {
            return Err(LocationError::Detached);
        }

        let Some(position) = position else {
            let err = LocationError::NoFixYet;
            log::warn!("Delivery completion refused: no position fix yet");
            self.inner.mutate(|s| s.record_error(&err));
            return Err(err);
        };

        let completed_at = self.inner.clock.now();
        self.stop_tracking();
        log::info!(
            "Delivery completed at ({:.5}, {:.5})",
            position.latitude,
            position.longitude
        );

        Ok(DeliveryCompletion {
            position,
            completed_at,
            tracked_for_secs: started_at.map(|started| (completed_at - started).num_seconds()),
        })
    }

    pub fn dismiss_notice(&self) {
        self.inner.mutate(|s| s.notice = None);
    }

    /// Tears the session down: releases the watch, cancels the pending
    /// lookup and detaches, so late completions are ignored.
    pub fn unmount(&self) {
        let tracking = {
            let mut state = self.inner.lock();
            if state.detached {
                return;
            }
            state.detached = true;
            state.geocode.cancel();
            state.tracking.take()
        };

        if let Some(tracking) = tracking {
            log::info!("Releasing {} on unmount", tracking.info().subscription_id);
        }
        log::debug!("Location session unmounted");
    }
}

impl Drop for LocationSession {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::geocoder::StaticGeocoder;
    use crate::modules::simulated_device::SimulatedDevice;

    fn reading(lat: f64, lon: f64) -> Reading {
        Reading::new(lat, lon, Utc::now())
    }

    #[test]
    fn accept_supersedes_and_carries_address() {
        let mut state = SessionState::new(&LocationConfig::default());
        let first = state.accept(&reading(40.0, -73.0)).unwrap().unwrap();
        assert_eq!(first.id, PositionId(1));
        assert!(state.attach_address(first.id, "Main St, Springfield".to_string()));

        let second = state.accept(&reading(40.001, -73.001)).unwrap().unwrap();
        assert_eq!(second.id, PositionId(2));
        assert_eq!(second.resolved_address.as_deref(), Some("Main St, Springfield"));
    }

    #[test]
    fn stale_address_is_discarded() {
        let mut state = SessionState::new(&LocationConfig::default());
        let first = state.accept(&reading(40.0, -73.0)).unwrap().unwrap();
        let second = state.accept(&reading(40.001, -73.001)).unwrap().unwrap();

        assert!(!state.attach_address(first.id, "Old Rd".to_string()));
        let current = state.current.as_ref().unwrap();
        assert_eq!(current.id, second.id);
        assert_eq!(current.latitude, 40.001);
        assert_eq!(current.resolved_address, None);
    }

    #[test]
    fn older_reading_keeps_current_position() {
        let mut state = SessionState::new(&LocationConfig::default());
        let now = Utc::now();
        let current = state
            .accept(&Reading::new(40.0, -73.0, now))
            .unwrap()
            .unwrap();

        let late = Reading::new(10.0, -70.0, now - chrono::Duration::seconds(3));
        assert_eq!(state.accept(&late), Ok(None));
        assert_eq!(state.current.as_ref(), Some(&current));
        assert_eq!(state.next_position_id, 1);
    }

    #[test]
    fn invalid_reading_keeps_previous_position() {
        let mut state = SessionState::new(&LocationConfig::default());
        state.accept(&reading(40.0, -73.0)).unwrap();
        assert!(state.accept(&reading(123.0, -73.0)).is_err());
        assert_eq!(state.current.as_ref().unwrap().id, PositionId(1));
        assert_eq!(state.next_position_id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loading_flag_is_lowered_after_failure() {
        let device = Arc::new(SimulatedDevice::new(Clock::new()));
        let session = LocationSession::new(
            device.clone(),
            Arc::new(StaticGeocoder::default()),
            LocationConfig::default(),
        );

        assert_eq!(session.request_permission().await, Ok(PermissionState::Granted));
        let snapshot = session.snapshot();
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.phase, SessionPhase::Ready);
        assert_eq!(
            snapshot.last_error.map(|e| e.kind),
            Some(ErrorKind::FixUnavailable)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_fix_times_out() {
        let device = Arc::new(SimulatedDevice::new(Clock::new()));
        device.set_fix(40.0, -73.0, None);
        device.set_stall_fixes(true);
        let config = LocationConfig {
            fix_timeout_ms: 2000,
            ..Default::default()
        };
        let session = LocationSession::new(device.clone(), Arc::new(StaticGeocoder::default()), config);

        session.request_permission().await.unwrap();
        let snapshot = session.snapshot();
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.current_position, None);
        assert_eq!(
            snapshot.last_error.map(|e| e.kind),
            Some(ErrorKind::FixUnavailable)
        );
    }

    #[tokio::test]
    async fn detached_session_rejects_commands() {
        let device = Arc::new(SimulatedDevice::new(Clock::new()));
        let session = LocationSession::new(
            device.clone(),
            Arc::new(StaticGeocoder::default()),
            LocationConfig::default(),
        );
        session.unmount();
        assert!(!session.is_mounted());
        assert_eq!(session.request_permission().await, Err(LocationError::Detached));
        assert_eq!(session.complete_task(), Err(LocationError::Detached));
        assert_eq!(device.permission_prompts(), 0);
    }
}
