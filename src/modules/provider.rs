use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::modules::address::AddressComponents;
use crate::modules::errors::{GeocodeError, ProviderError};
use crate::modules::position::Reading;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accuracy {
    Lowest,
    Low,
    Balanced,
    #[default]
    High,
    Highest,
}

/// Authorization state for one permission scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    #[default]
    Unrequested,
    Denied,
    Granted,
}

/// Options for a one-shot fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixRequest {
    pub accuracy: Accuracy,
    /// A cached fix younger than this may be returned without waking the sensor.
    pub max_cache_age: Duration,
}

/// Options for a continuous watch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchRequest {
    pub accuracy: Accuracy,
    pub min_interval: Duration,
    pub min_displacement_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

type Release = Box<dyn FnOnce(SubscriptionId) + Send + Sync>;

/// Exclusive ownership of a provider watch registration.
///
/// The registration is released exactly once: on `release()` or on drop,
/// whichever comes first.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    release: Option<Release>,
}

impl SubscriptionHandle {
    pub fn new<F>(id: SubscriptionId, release: F) -> Self
    where
        F: FnOnce(SubscriptionId) + Send + Sync + 'static,
    {
        Self {
            id,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// A live watch: the ownership handle plus the stream of raw readings,
/// delivered in provider emission order.
#[derive(Debug)]
pub struct WatchSubscription {
    pub handle: SubscriptionHandle,
    pub readings: UnboundedReceiver<Reading>,
}

impl WatchSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.handle.id()
    }

    pub fn into_parts(self) -> (SubscriptionHandle, UnboundedReceiver<Reading>) {
        (self.handle, self.readings)
    }
}

/// Device location capability.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn is_service_enabled(&self) -> Result<bool, ProviderError>;

    async fn request_foreground_permission(&self) -> Result<PermissionState, ProviderError>;

    async fn request_background_permission(&self) -> Result<PermissionState, ProviderError>;

    async fn current_position(&self, request: FixRequest) -> Result<Reading, ProviderError>;

    async fn watch_position(&self, request: WatchRequest) -> Result<WatchSubscription, ProviderError>;
}

/// Reverse geocoding capability.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse_geocode(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<AddressComponents>, GeocodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn handle_releases_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = releases.clone();
        let handle = SubscriptionHandle::new(SubscriptionId(7), move |id| {
            assert_eq!(id, SubscriptionId(7));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.release();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_handle_releases() {
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = releases.clone();
        {
            let _handle = SubscriptionHandle::new(SubscriptionId(1), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_id_display() {
        assert_eq!(SubscriptionId(12).to_string(), "watch-12");
    }
}
