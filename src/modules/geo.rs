use chrono::{DateTime, Duration, Utc};

use crate::modules::position::Reading;

const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance in meters.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Filters a raw watch stream down to the readings the session accepts.
///
/// A reading passes when it is the first one, or when both the elapsed time
/// AND the distance since the last passed reading reach their minimums.
#[derive(Debug, Clone)]
pub struct EmissionGate {
    min_interval: Duration,
    min_displacement_m: f64,
    last: Option<(DateTime<Utc>, f64, f64)>,
}

impl EmissionGate {
    pub fn new(min_interval: std::time::Duration, min_displacement_m: f64) -> Self {
        Self {
            min_interval: Duration::from_std(min_interval).unwrap_or_else(|_| Duration::zero()),
            min_displacement_m,
            last: None,
        }
    }

    pub fn admit(&mut self, reading: &Reading) -> bool {
        if let Some((at, lat, lon)) = self.last {
            let elapsed = reading.captured_at - at;
            if elapsed < self.min_interval {
                return false;
            }
            if haversine_m(lat, lon, reading.latitude, reading.longitude) < self.min_displacement_m {
                return false;
            }
        }
        self.last = Some((reading.captured_at, reading.latitude, reading.longitude));
        true
    }
}
