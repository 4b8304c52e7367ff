use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::modules::errors::ProviderError;

/// Identity of a `Position` within one session. Strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionId(pub u64);

/// A raw fix as delivered by a location provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl Reading {
    pub fn new(latitude: f64, longitude: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            captured_at,
        }
    }

    pub fn with_accuracy(mut self, meters: f64) -> Self {
        self.accuracy = Some(meters);
        self
    }

    pub fn validate(&self) -> Result<(), ProviderError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ProviderError::InvalidReading(format!(
                "latitude {} out of range",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ProviderError::InvalidReading(format!(
                "longitude {} out of range",
                self.longitude
            )));
        }
        if let Some(accuracy) = self.accuracy {
            if !accuracy.is_finite() || accuracy < 0.0 {
                return Err(ProviderError::InvalidReading(format!(
                    "accuracy {} must be a non-negative number of meters",
                    accuracy
                )));
            }
        }
        Ok(())
    }
}

/// Current position shown on the location screen.
///
/// A new `Position` supersedes the previous one; only `resolved_address`
/// is ever patched after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: PositionId,
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
    pub horizontal_accuracy: Option<f64>,
    pub resolved_address: Option<String>,
}

impl Position {
    pub fn from_reading(
        id: PositionId,
        reading: &Reading,
        resolved_address: Option<String>,
    ) -> Result<Self, ProviderError> {
        reading.validate()?;
        Ok(Self {
            id,
            latitude: reading.latitude,
            longitude: reading.longitude,
            captured_at: reading.captured_at,
            horizontal_accuracy: reading.accuracy,
            resolved_address,
        })
    }
}
