//! Voice control surface
//!
//! Composes the session, agent state, permission gate, microphone toggle
//! and preference store into the control bar the host renders. The host
//! feeds transport events in and reads visibility, state and levels out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::agent_state::{AgentState, AgentStateTracker};
use crate::broker::{ConnectionBroker, ConnectionDetails, ConnectionRequest};
use crate::error::DeviceError;
use crate::observer::{Observable, Subscribers, Subscription};
use crate::participant::LocalParticipant;
use crate::permissions::{ControlOverrides, PermissionState, VisibleControls};
use crate::preferences::{PreferenceBackend, PreferenceStore};
use crate::session::{DisconnectReason, SessionEvent, SessionManager, SessionStatus};
use crate::track::TrackToggle;
use crate::transport::{Credentials, Transport, TransportEvent};
use crate::voice::LevelFeed;
use crate::Result;

type DeviceErrorHandler = Arc<dyn Fn(&DeviceError) + Send + Sync>;

/// How long a connected session may go without an agent before the host is told
pub const DEFAULT_NO_AGENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Host configuration for the control bar
#[derive(Clone)]
pub struct ControlBarOptions {
    /// Visibility overrides
    pub controls: ControlOverrides,
    /// Remember the user's microphone choices
    pub save_user_choices: bool,
    /// Ask the transport to enable noise filtering on connect
    pub noise_filter: bool,
    /// Emit [`ControlEvent::NoAgent`] when no agent joined within this long
    pub no_agent_timeout: Option<Duration>,
    on_device_error: Option<DeviceErrorHandler>,
}

impl Default for ControlBarOptions {
    fn default() -> Self {
        Self {
            controls: ControlOverrides::default(),
            save_user_choices: true,
            noise_filter: true,
            no_agent_timeout: Some(DEFAULT_NO_AGENT_TIMEOUT),
            on_device_error: None,
        }
    }
}

impl ControlBarOptions {
    /// Set visibility overrides
    #[must_use]
    pub const fn with_controls(mut self, controls: ControlOverrides) -> Self {
        self.controls = controls;
        self
    }

    /// Enable or disable remembering user choices
    #[must_use]
    pub const fn with_save_user_choices(mut self, save: bool) -> Self {
        self.save_user_choices = save;
        self
    }

    /// Enable or disable the transport noise filter
    #[must_use]
    pub const fn with_noise_filter(mut self, enabled: bool) -> Self {
        self.noise_filter = enabled;
        self
    }

    /// Set or disable the no-agent notice delay
    #[must_use]
    pub const fn with_no_agent_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.no_agent_timeout = timeout;
        self
    }

    /// Callback for microphone acquisition failures
    #[must_use]
    pub fn on_device_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&DeviceError) + Send + Sync + 'static,
    {
        self.on_device_error = Some(Arc::new(handler));
        self
    }
}

impl std::fmt::Debug for ControlBarOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlBarOptions")
            .field("controls", &self.controls)
            .field("save_user_choices", &self.save_user_choices)
            .field("noise_filter", &self.noise_filter)
            .field("no_agent_timeout", &self.no_agent_timeout)
            .field("on_device_error", &self.on_device_error.is_some())
            .finish()
    }
}

/// What the surface shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceState {
    /// Closed; only the host's start button is on screen
    #[default]
    Hidden,
    /// Session starting or agent not in conversation yet
    Minimal,
    /// Agent conversing; microphone and leave controls apply
    Full,
}

/// Events delivered to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Microphone could not be acquired
    DeviceError(DeviceError),
    /// Agent state changed
    AgentStateChanged(AgentState),
    /// Session status changed
    SessionStatusChanged(SessionStatus),
    /// Session connected but no agent joined in time
    NoAgent {
        /// How long the session waited
        waited: Duration,
    },
    /// A connect attempt failed
    ConnectionFailed {
        /// Failure reason
        reason: String,
    },
    /// Session ended
    Disconnected {
        /// Why
        reason: DisconnectReason,
    },
}

/// The voice control bar
pub struct ControlSurface {
    transport: Arc<dyn Transport>,
    session: SessionManager,
    agent: AgentStateTracker,
    participant: LocalParticipant,
    microphone: TrackToggle,
    preferences: PreferenceStore,
    options: ControlBarOptions,
    surface: Observable<SurfaceState>,
    events: Subscribers<ControlEvent>,
    restore_microphone: Arc<AtomicBool>,
    _wiring: Vec<Subscription>,
}

impl ControlSurface {
    /// Mount the surface
    ///
    /// Loads the remembered device preference and wires component
    /// notifications into host events.
    #[must_use]
    pub fn mount(
        transport: Arc<dyn Transport>,
        preference_backend: Arc<dyn PreferenceBackend>,
        options: ControlBarOptions,
    ) -> Self {
        let preferences = PreferenceStore::new(preference_backend, !options.save_user_choices);
        let session = SessionManager::new(Arc::clone(&transport));
        let agent = AgentStateTracker::new();
        let participant = LocalParticipant::new();
        let microphone = TrackToggle::microphone(
            Arc::clone(&transport),
            participant.clone(),
            preferences.clone(),
        );
        let surface = Observable::new(SurfaceState::Hidden);
        let events = Subscribers::new();

        let mut wiring = Vec::new();

        wiring.push({
            let events = events.clone();
            let handler = options.on_device_error.clone();
            microphone.on_device_error(move |err| {
                if let Some(handler) = &handler {
                    handler(err);
                }
                events.publish(&ControlEvent::DeviceError(err.clone()));
            })
        });

        wiring.push({
            let events = events.clone();
            let surface = surface.clone();
            agent.subscribe(move |state| {
                if surface.get() != SurfaceState::Hidden {
                    surface.set(surface_for(*state));
                }
                events.publish(&ControlEvent::AgentStateChanged(*state));
            })
        });

        wiring.push({
            let events = events.clone();
            session.subscribe_status(move |status| {
                events.publish(&ControlEvent::SessionStatusChanged(*status));
            })
        });

        wiring.push({
            let events = events.clone();
            let surface = surface.clone();
            let agent = agent.clone();
            let participant = participant.clone();
            let microphone = microphone.clone();
            let handler = options.on_device_error.clone();
            session.subscribe_events(move |event| match event {
                SessionEvent::ConnectionFailed { reason, .. } => {
                    events.publish(&ControlEvent::ConnectionFailed {
                        reason: reason.clone(),
                    });
                }
                SessionEvent::MediaDeviceFailure(err) => {
                    if let Some(handler) = &handler {
                        handler(err);
                    }
                    events.publish(&ControlEvent::DeviceError(err.clone()));
                }
                SessionEvent::Disconnected { reason } => {
                    surface.set(SurfaceState::Hidden);
                    microphone.release();
                    participant.reset();
                    agent.reset();
                    events.publish(&ControlEvent::Disconnected {
                        reason: reason.clone(),
                    });
                }
            })
        });

        let remembered = preferences.load();
        tracing::debug!(
            microphone_enabled = remembered.audio_input_enabled,
            device = remembered.audio_input_device_id.as_deref().unwrap_or("default"),
            save_user_choices = options.save_user_choices,
            "control surface mounted"
        );

        Self {
            transport,
            session,
            agent,
            participant,
            microphone,
            preferences,
            options,
            surface,
            events,
            restore_microphone: Arc::new(AtomicBool::new(false)),
            _wiring: wiring,
        }
    }

    /// Connect with host-supplied credentials
    ///
    /// # Errors
    ///
    /// Returns the session's connect error; the surface is hidden again and
    /// a `ConnectionFailed` event was already delivered
    pub async fn connect(&self, credentials: Credentials) -> Result<()> {
        self.open_surface();
        self.session.connect(credentials).await?;
        self.on_connected().await;
        Ok(())
    }

    /// Fetch credentials from a broker and connect
    ///
    /// # Errors
    ///
    /// Returns broker or connect errors
    pub async fn connect_with_broker(
        &self,
        broker: &dyn ConnectionBroker,
        request: &ConnectionRequest,
    ) -> Result<ConnectionDetails> {
        self.open_surface();
        let details = self.session.connect_with_broker(broker, request).await?;
        self.on_connected().await;
        Ok(details)
    }

    /// Leave the session
    ///
    /// # Errors
    ///
    /// See [`SessionManager::disconnect`]
    pub async fn leave(&self) -> Result<()> {
        self.session.disconnect().await
    }

    /// User pressed the microphone toggle
    ///
    /// Ignored while the toggle is not visible.
    ///
    /// # Errors
    ///
    /// Returns device acquisition errors after they were reported
    pub async fn toggle_microphone(&self) -> Result<bool> {
        if !self.visible_controls().microphone {
            tracing::debug!("microphone toggle not visible, ignoring");
            return Ok(self.microphone.is_enabled());
        }
        self.microphone.toggle(true).await
    }

    /// Mute or unmute on behalf of the host; not remembered
    ///
    /// # Errors
    ///
    /// Returns device acquisition errors after they were reported
    pub async fn set_microphone_enabled(&self, enabled: bool) -> Result<bool> {
        self.microphone.set_enabled(enabled, false).await
    }

    /// User picked an input device
    ///
    /// # Errors
    ///
    /// Returns device acquisition errors after they were reported
    pub async fn select_microphone(&self, device_id: Option<String>) -> Result<()> {
        self.microphone.select_device(device_id, true).await
    }

    /// Apply a transport notification
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::AgentStateChanged(state) => {
                if self.session.status().is_active() {
                    self.agent.observe(state);
                } else {
                    tracing::trace!(%state, "agent state outside a session, ignored");
                }
            }
            TransportEvent::PermissionsChanged(permissions) => {
                self.participant.set_permissions(permissions);
                self.apply_permissions().await;
            }
            TransportEvent::Disconnected { reason } => {
                self.session.handle_transport_disconnected(reason);
            }
            TransportEvent::MediaDeviceFailure(err) => {
                tracing::error!(source = %err.source, error = %err.error, "media device failure");
                if let Some(handler) = &self.options.on_device_error {
                    handler(&err);
                }
                self.events.publish(&ControlEvent::DeviceError(err));
            }
        }
    }

    /// Controls to render now
    #[must_use]
    pub fn visible_controls(&self) -> VisibleControls {
        if self.surface.get() != SurfaceState::Full {
            return VisibleControls::none();
        }
        VisibleControls::resolve(self.options.controls, self.participant.permissions().as_ref())
    }

    /// Current surface state
    #[must_use]
    pub fn surface_state(&self) -> SurfaceState {
        self.surface.get()
    }

    /// Current agent state
    #[must_use]
    pub fn agent_state(&self) -> AgentState {
        self.agent.state()
    }

    /// Current session status
    #[must_use]
    pub fn session_status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Whether the microphone toggle shows as on
    #[must_use]
    pub fn microphone_enabled(&self) -> bool {
        self.microphone.is_enabled()
    }

    /// Whether a microphone change is in flight
    #[must_use]
    pub fn microphone_pending(&self) -> bool {
        self.microphone.is_pending()
    }

    /// Level feed for the microphone visualizer
    #[must_use]
    pub fn microphone_levels(&self) -> LevelFeed {
        self.microphone.level_feed()
    }

    /// Host events
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ControlEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    /// Agent state, starting with the current value
    pub fn subscribe_agent_state<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AgentState) + Send + Sync + 'static,
    {
        self.agent.subscribe(callback)
    }

    /// Surface state, starting with the current value
    pub fn subscribe_surface<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SurfaceState) + Send + Sync + 'static,
    {
        self.surface.subscribe(callback)
    }

    /// Session manager
    #[must_use]
    pub const fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Local participant
    #[must_use]
    pub const fn participant(&self) -> &LocalParticipant {
        &self.participant
    }

    /// Microphone toggle
    #[must_use]
    pub const fn microphone(&self) -> &TrackToggle {
        &self.microphone
    }

    /// Preference store
    #[must_use]
    pub const fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    fn open_surface(&self) {
        if self.session.status().is_active() {
            return;
        }
        self.surface.set(SurfaceState::Minimal);
    }

    async fn on_connected(&self) {
        if self.options.noise_filter {
            if let Err(e) = self.transport.set_noise_filter(true).await {
                tracing::warn!(error = %e, "failed to enable noise filter");
            }
        }

        // Permissions usually arrive after connect; restore then
        self.restore_microphone.store(true, Ordering::SeqCst);
        self.apply_permissions().await;
        self.watch_for_agent();
    }

    fn watch_for_agent(&self) {
        let (Some(timeout), Some(session_id)) =
            (self.options.no_agent_timeout, self.session.session_id())
        else {
            return;
        };

        let session = self.session.clone();
        let agent = self.agent.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if session.session_id() != Some(session_id) || agent_joined(agent.state()) {
                return;
            }
            tracing::warn!(waited = ?timeout, %session_id, "no agent joined the session");
            events.publish(&ControlEvent::NoAgent { waited: timeout });
        });
    }

    async fn apply_permissions(&self) {
        match self.participant.permission_state() {
            PermissionState::Unknown => {}
            PermissionState::Denied => {
                if self.participant.microphone_track().is_some() {
                    tracing::info!("publish permission revoked, muting microphone");
                    if let Err(e) = self.microphone.set_enabled(false, false).await {
                        tracing::warn!(error = %e, "failed to unpublish after revocation");
                    }
                }
            }
            PermissionState::Granted => {
                if !self.session.is_connected()
                    || !self.restore_microphone.swap(false, Ordering::SeqCst)
                {
                    return;
                }

                let remembered = self.preferences.load();
                if !remembered.audio_input_enabled {
                    tracing::debug!("microphone remembered as off");
                    return;
                }

                // Failures were already reported through on_device_error
                if let Err(e) = self.microphone.set_enabled(true, false).await {
                    tracing::debug!(error = %e, "could not restore microphone");
                }
            }
        }
    }
}

impl std::fmt::Debug for ControlSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlSurface")
            .field("surface", &self.surface.get())
            .field("session", &self.session)
            .field("agent", &self.agent.state())
            .field("microphone", &self.microphone)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

const fn agent_joined(state: AgentState) -> bool {
    !matches!(state, AgentState::Disconnected | AgentState::Connecting)
}

/// Surface for an agent state while the surface is open
const fn surface_for(state: AgentState) -> SurfaceState {
    if state.is_conversing() {
        SurfaceState::Full
    } else {
        SurfaceState::Minimal
    }
}
