//! Real-time transport seam
//!
//! The media connection itself is an external service. The controller only
//! needs to open and close a session, publish the microphone, and hear
//! back about agent state, permissions and disconnects.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use url::Url;
use uuid::Uuid;

use crate::agent_state::AgentState;
use crate::error::DeviceError;
use crate::permissions::ParticipantPermissions;
use crate::track::LocalAudioTrack;
use crate::{Error, Result};

/// Server URL and participant token for one connect attempt
pub struct Credentials {
    server_url: Url,
    participant_token: SecretString,
}

impl Credentials {
    /// Validate and wrap connection credentials
    ///
    /// # Errors
    ///
    /// Returns error if the URL does not parse, uses an unsupported scheme,
    /// or the token is empty
    pub fn new(server_url: &str, participant_token: impl Into<String>) -> Result<Self> {
        let server_url = Url::parse(server_url)
            .map_err(|e| Error::Connection(format!("invalid server url: {e}")))?;

        if !matches!(server_url.scheme(), "ws" | "wss" | "http" | "https") {
            return Err(Error::Connection(format!(
                "unsupported server url scheme: {}",
                server_url.scheme()
            )));
        }

        let participant_token: String = participant_token.into();
        if participant_token.trim().is_empty() {
            return Err(Error::Connection("empty participant token".to_string()));
        }

        Ok(Self {
            server_url,
            participant_token: SecretString::from(participant_token),
        })
    }

    /// Server to connect to
    #[must_use]
    pub const fn server_url(&self) -> &Url {
        &self.server_url
    }

    /// Participant access token
    #[must_use]
    pub fn participant_token(&self) -> &str {
        self.participant_token.expose_secret()
    }
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self {
            server_url: self.server_url.clone(),
            participant_token: SecretString::from(self.participant_token().to_string()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("server_url", &self.server_url.as_str())
            .field("participant_token", &"[REDACTED]")
            .finish()
    }
}

/// One session opened by a [`Transport`]
///
/// Closing takes the handle, so a session opened by a superseded connect
/// can be released without touching a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(Uuid);

impl SessionHandle {
    /// Fresh handle for a newly opened session
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Unique id of the session
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notifications pushed by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Remote agent reported a new state
    AgentStateChanged(AgentState),
    /// Server updated the local participant's permissions
    PermissionsChanged(Option<ParticipantPermissions>),
    /// Connection was lost or closed by the server
    Disconnected {
        /// Reason given by the transport, if any
        reason: Option<String>,
    },
    /// A media device failed while the session was running
    MediaDeviceFailure(DeviceError),
}

/// Real-time media connection to the agent
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session with the given credentials
    ///
    /// # Errors
    ///
    /// Returns error if the server cannot be reached or rejects the token
    async fn open_session(&self, credentials: &Credentials) -> Result<SessionHandle>;

    /// Close a session and release its media
    ///
    /// # Errors
    ///
    /// Returns error if teardown fails
    async fn close_session(&self, session: &SessionHandle) -> Result<()>;

    /// Acquire the input device and publish it as the microphone track
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceAcquisition`] if the device is missing, busy or
    /// access was denied
    async fn publish_audio_track(&self, device_id: Option<&str>) -> Result<LocalAudioTrack>;

    /// Stop publishing a microphone track
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the unpublish
    async fn unpublish_audio_track(&self, track: &LocalAudioTrack) -> Result<()>;

    /// Toggle the transport's noise filter, if it has one
    ///
    /// # Errors
    ///
    /// Returns error if the filter cannot be changed
    async fn set_noise_filter(&self, enabled: bool) -> Result<()> {
        tracing::trace!(enabled, "transport has no noise filter");
        Ok(())
    }
}
