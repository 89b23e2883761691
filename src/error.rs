//! Error types for Beacon voice sessions

use thiserror::Error;

use crate::track::TrackSource;

/// Result type alias for Beacon voice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a voice session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Credential fetch or transport-open failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Session is already connecting or connected
    #[error("session already active")]
    AlreadyActive,

    /// Connect attempt was superseded by a disconnect
    #[error("connect attempt {0} cancelled")]
    Cancelled(u64),

    /// Track change outlived the session it started in
    #[error("{0} change interrupted by session end")]
    Interrupted(TrackSource),

    /// Microphone permission denied, device busy or missing
    #[error("{track} device error: {message}")]
    DeviceAcquisition {
        /// Track source the device backs
        track: TrackSource,
        /// Reason reported by the platform or transport
        message: String,
    },

    /// Preference store failure
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Failure inside a `Transport` implementation
    #[error("transport error: {0}")]
    Transport(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build a device acquisition error for the given source
    pub fn device(track: TrackSource, message: impl Into<String>) -> Self {
        Self::DeviceAcquisition {
            track,
            message: message.into(),
        }
    }

    /// Callback payload for device acquisition failures
    #[must_use]
    pub fn device_error(&self) -> Option<DeviceError> {
        match self {
            Self::DeviceAcquisition { track, message } => {
                Some(DeviceError::new(*track, message.clone()))
            }
            _ => None,
        }
    }

    /// Whether the host should present this error to the user
    ///
    /// Persistence failures are absorbed inside the controller and never
    /// reach this point in practice.
    #[must_use]
    pub const fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Http(_) | Self::DeviceAcquisition { .. }
        )
    }
}

/// Device failure payload handed to `on_device_error` callbacks
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeviceError {
    /// Track source that failed
    pub source: TrackSource,
    /// Human readable failure reason
    pub error: String,
}

impl DeviceError {
    /// Create a device error payload
    pub fn new(source: TrackSource, error: impl Into<String>) -> Self {
        Self {
            source,
            error: error.into(),
        }
    }
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source, self.error)
    }
}
