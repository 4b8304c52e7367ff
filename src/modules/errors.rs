use serde::{Deserialize, Serialize};

/// Kind of a hard location error, as observed by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ServiceDisabled,
    PermissionDenied,
    FixUnavailable,
    NoFixYet,
    Detached,
}

/// Errors surfaced by `LocationSession` commands.
///
/// The `Display` text is the user-facing message rendered next to the
/// retry control.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("Location services are turned off. Please enable location services and try again.")]
    ServiceDisabled,

    #[error("Location permission was denied. Allow location access to continue.")]
    PermissionDenied,

    #[error("Unable to get your current location. Please check your GPS signal and try again.")]
    FixUnavailable,

    #[error("Your location is not available yet. Enable location before completing this delivery.")]
    NoFixYet,

    #[error("The location screen is no longer active.")]
    Detached,
}

impl LocationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LocationError::ServiceDisabled => ErrorKind::ServiceDisabled,
            LocationError::PermissionDenied => ErrorKind::PermissionDenied,
            LocationError::FixUnavailable => ErrorKind::FixUnavailable,
            LocationError::NoFixYet => ErrorKind::NoFixYet,
            LocationError::Detached => ErrorKind::Detached,
        }
    }
}

/// Serializable form of the last hard error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&LocationError> for SessionError {
    fn from(err: &LocationError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Failure reported by a device location provider.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("location service is disabled")]
    ServiceDisabled,

    #[error("{0} location access is not authorized")]
    NotAuthorized(&'static str),

    #[error("no position fix available")]
    NoFix,

    #[error("timed out after {0}ms waiting for a position fix")]
    Timeout(u64),

    #[error("invalid reading: {0}")]
    InvalidReading(String),

    #[error("location provider failure: {0}")]
    Platform(String),
}

/// Reverse-geocoding failure. Never escalated to the session error state.
#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("geocoder request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid geocoder url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("geocoder returned status {0}")]
    Status(u16),

    #[error("geocoder failure: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_error_carries_kind_and_user_message() {
        let err = SessionError::from(&LocationError::ServiceDisabled);
        assert_eq!(err.kind, ErrorKind::ServiceDisabled);
        assert!(err.message.contains("enable location services"));

        let err = SessionError::from(&LocationError::FixUnavailable);
        assert!(err.message.contains("GPS signal"));
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::NoFixYet).unwrap();
        assert_eq!(json, "\"no_fix_yet\"");
    }
}
