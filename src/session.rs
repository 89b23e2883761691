//! Session connection lifecycle
//!
//! Idle → Connecting → Connected → Disconnected. Every connect attempt gets
//! an id; a connect that resolves after its attempt was superseded (by a
//! disconnect or a newer attempt) closes the session it opened and never
//! reports Connected.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use uuid::Uuid;

use crate::broker::{ConnectionBroker, ConnectionDetails, ConnectionRequest};
use crate::error::DeviceError;
use crate::observer::{Observable, Subscribers, Subscription};
use crate::transport::{Credentials, SessionHandle, Transport};
use crate::{Error, Result};

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Nothing requested yet
    #[default]
    Idle,
    /// Fetching credentials or opening the transport
    Connecting,
    /// Transport open
    Connected,
    /// Session ended or failed
    Disconnected,
}

impl SessionStatus {
    /// Connecting or connected
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Why a session entered `Disconnected`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The user left
    UserInitiated,
    /// The transport dropped the connection
    Transport(Option<String>),
    /// Connecting failed
    ConnectFailed(String),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserInitiated => write!(f, "user left"),
            Self::Transport(Some(reason)) => write!(f, "connection lost: {reason}"),
            Self::Transport(None) => write!(f, "connection lost"),
            Self::ConnectFailed(reason) => write!(f, "connect failed: {reason}"),
        }
    }
}

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A connect attempt failed
    ConnectionFailed {
        /// Attempt id
        attempt: u64,
        /// Failure reason
        reason: String,
    },
    /// A media device failed while connecting
    MediaDeviceFailure(DeviceError),
    /// The session entered `Disconnected`
    Disconnected {
        /// Why
        reason: DisconnectReason,
    },
}

#[derive(Debug, Default)]
struct SessionState {
    status: SessionStatus,
    credentials: Option<Credentials>,
    attempt: u64,
    handle: Option<SessionHandle>,
}

/// Owns the real-time connection
///
/// Clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<SessionState>>,
    status: Observable<SessionStatus>,
    events: Subscribers<SessionEvent>,
}

impl SessionManager {
    /// Create an idle session over `transport`
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: Arc::new(Mutex::new(SessionState::default())),
            status: Observable::new(SessionStatus::Idle),
            events: Subscribers::new(),
        }
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    /// Credentials of the current session, if any
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        self.lock().credentials.clone()
    }

    /// Id of the latest connect attempt (0 before the first)
    #[must_use]
    pub fn attempt(&self) -> u64 {
        self.lock().attempt
    }

    /// Id of the transport session while connected
    #[must_use]
    pub fn session_id(&self) -> Option<Uuid> {
        self.lock().handle.map(|handle| handle.id())
    }

    /// Whether the session is connected
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status() == SessionStatus::Connected
    }

    /// Subscribe to status changes, starting with the current status
    pub fn subscribe_status<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SessionStatus) + Send + Sync + 'static,
    {
        self.status.subscribe(callback)
    }

    /// Subscribe to lifecycle events
    pub fn subscribe_events<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    /// Connect with credentials supplied by the host
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyActive`] if a session is connecting or
    /// connected, [`Error::Cancelled`] if a disconnect superseded this
    /// attempt, or the transport's failure
    pub async fn connect(&self, credentials: Credentials) -> Result<()> {
        let attempt = self.begin_attempt()?;
        self.open(attempt, credentials).await
    }

    /// Fetch credentials from `broker`, then connect
    ///
    /// The session is `Connecting` while the broker is queried, so a
    /// disconnect during the fetch cancels the attempt.
    ///
    /// # Errors
    ///
    /// As [`SessionManager::connect`], plus broker failures reported as
    /// [`Error::Connection`]
    pub async fn connect_with_broker(
        &self,
        broker: &dyn ConnectionBroker,
        request: &ConnectionRequest,
    ) -> Result<ConnectionDetails> {
        let attempt = self.begin_attempt()?;

        let fetched = broker
            .request_connection(request)
            .await
            .and_then(|details| details.credentials().map(|creds| (details, creds)));

        let (details, credentials) = match fetched {
            Ok(pair) => pair,
            Err(e) => {
                let e = as_connection_error(e);
                self.fail_attempt(attempt, &e);
                return Err(e);
            }
        };

        if !self.is_current(attempt) {
            tracing::debug!(attempt, "credentials arrived after disconnect, dropping");
            return Err(Error::Cancelled(attempt));
        }

        self.open(attempt, credentials).await?;
        Ok(details)
    }

    /// Leave the session
    ///
    /// No-op unless connecting or connected. A connect still in flight is
    /// cancelled and cleans up after itself.
    ///
    /// # Errors
    ///
    /// Currently infallible; teardown failures are logged
    pub async fn disconnect(&self) -> Result<()> {
        let (prior, handle) = {
            let mut state = self.lock();
            if !state.status.is_active() {
                tracing::trace!(status = %state.status, "disconnect ignored");
                return Ok(());
            }
            let prior = state.status;
            state.status = SessionStatus::Disconnected;
            state.credentials = None;
            (prior, state.handle.take())
        };

        tracing::info!(from = %prior, "disconnecting session");
        self.status.set(SessionStatus::Disconnected);

        if let Some(handle) = handle {
            if let Err(e) = self.transport.close_session(&handle).await {
                tracing::warn!(error = %e, session = %handle, "failed to close session cleanly");
            }
        }

        self.events.publish(&SessionEvent::Disconnected {
            reason: DisconnectReason::UserInitiated,
        });
        Ok(())
    }

    /// Record a disconnect reported by the transport
    ///
    /// Returns `true` if the session was active.
    pub fn handle_transport_disconnected(&self, reason: Option<String>) -> bool {
        {
            let mut state = self.lock();
            if !state.status.is_active() {
                return false;
            }
            state.status = SessionStatus::Disconnected;
            state.credentials = None;
            state.handle = None;
        }

        tracing::warn!(reason = reason.as_deref().unwrap_or("-"), "transport disconnected");
        self.status.set(SessionStatus::Disconnected);
        self.events.publish(&SessionEvent::Disconnected {
            reason: DisconnectReason::Transport(reason),
        });
        true
    }

    fn begin_attempt(&self) -> Result<u64> {
        let attempt = {
            let mut state = self.lock();
            if state.status.is_active() {
                return Err(Error::AlreadyActive);
            }
            state.attempt += 1;
            state.status = SessionStatus::Connecting;
            state.credentials = None;
            state.handle = None;
            state.attempt
        };

        tracing::debug!(attempt, "connect attempt started");
        self.status.set(SessionStatus::Connecting);
        Ok(attempt)
    }

    async fn open(&self, attempt: u64, credentials: Credentials) -> Result<()> {
        {
            let mut state = self.lock();
            if !Self::is_current_locked(&state, attempt) {
                return Err(Error::Cancelled(attempt));
            }
            state.credentials = Some(credentials.clone());
        }

        tracing::info!(attempt, server_url = %credentials.server_url(), "opening session");

        let handle = match self.transport.open_session(&credentials).await {
            Ok(handle) => handle,
            Err(e) => {
                let e = as_connection_error(e);
                self.fail_attempt(attempt, &e);
                return Err(e);
            }
        };

        let current = {
            let mut state = self.lock();
            let current = Self::is_current_locked(&state, attempt);
            if current {
                state.status = SessionStatus::Connected;
                state.handle = Some(handle);
            }
            current
        };

        if !current {
            tracing::info!(
                attempt,
                session = %handle,
                "connect resolved after cancel, releasing session"
            );
            if let Err(e) = self.transport.close_session(&handle).await {
                tracing::warn!(
                    error = %e,
                    session = %handle,
                    "failed to release cancelled session"
                );
            }
            return Err(Error::Cancelled(attempt));
        }

        tracing::info!(attempt, session = %handle, "session connected");
        self.status.set(SessionStatus::Connected);
        Ok(())
    }

    fn fail_attempt(&self, attempt: u64, err: &Error) {
        {
            let mut state = self.lock();
            if !Self::is_current_locked(&state, attempt) {
                tracing::debug!(attempt, error = %err, "stale connect attempt failed");
                return;
            }
            state.status = SessionStatus::Disconnected;
            state.credentials = None;
        }

        tracing::warn!(attempt, error = %err, "connect failed");
        self.status.set(SessionStatus::Disconnected);

        if let Some(device) = err.device_error() {
            self.events.publish(&SessionEvent::MediaDeviceFailure(device));
        }
        self.events.publish(&SessionEvent::ConnectionFailed {
            attempt,
            reason: err.to_string(),
        });
        self.events.publish(&SessionEvent::Disconnected {
            reason: DisconnectReason::ConnectFailed(err.to_string()),
        });
    }

    fn is_current(&self, attempt: u64) -> bool {
        Self::is_current_locked(&self.lock(), attempt)
    }

    const fn is_current_locked(state: &SessionState, attempt: u64) -> bool {
        state.attempt == attempt && matches!(state.status, SessionStatus::Connecting)
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SessionManager")
            .field("status", &state.status)
            .field("attempt", &state.attempt)
            .field("session", &state.handle)
            .finish_non_exhaustive()
    }
}

/// Device failures keep their kind; everything else is a connection error
fn as_connection_error(err: Error) -> Error {
    match err {
        Error::Connection(_) | Error::DeviceAcquisition { .. } | Error::Cancelled(_) => err,
        other => Error::Connection(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_activity() {
        assert!(!SessionStatus::Idle.is_active());
        assert!(SessionStatus::Connecting.is_active());
        assert!(SessionStatus::Connected.is_active());
        assert!(!SessionStatus::Disconnected.is_active());
    }

    #[test]
    fn reason_display() {
        assert_eq!(DisconnectReason::UserInitiated.to_string(), "user left");
        assert_eq!(
            DisconnectReason::Transport(Some("network".to_string())).to_string(),
            "connection lost: network"
        );
    }

    #[test]
    fn connection_error_mapping_keeps_device_errors() {
        let device = Error::device(crate::track::TrackSource::Microphone, "denied");
        assert!(matches!(
            as_connection_error(device),
            Error::DeviceAcquisition { .. }
        ));
        assert!(matches!(
            as_connection_error(Error::Transport("x".to_string())),
            Error::Connection(_)
        ));
    }
}
