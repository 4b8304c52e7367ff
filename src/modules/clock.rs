use chrono::{DateTime, Duration, Utc};
use tokio::time::Instant;

/// Wall clock anchored on the tokio clock.
///
/// Timestamps advance with `tokio::time::Instant`, so a paused runtime
/// drives capture times, cache ages and elapsed tracking time together.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    wall_origin: DateTime<Utc>,
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(wall_origin: DateTime<Utc>) -> Self {
        Self {
            wall_origin,
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.wall_origin + Duration::from_std(self.origin.elapsed()).unwrap_or_else(|_| Duration::zero())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
