//! Local microphone track and its toggle
//!
//! The toggle is the only way the controller publishes or unpublishes the
//! microphone. It checks the permission gate first, reports device failures
//! to subscribers, and remembers user choices in the preference store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::observer::{Observable, Subscribers, Subscription};
use crate::participant::LocalParticipant;
use crate::preferences::PreferenceStore;
use crate::transport::Transport;
use crate::voice::LevelFeed;
use crate::{Error, Result};

/// Kind of local media a track carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    /// Microphone audio
    Microphone,
}

impl std::fmt::Display for TrackSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Microphone => write!(f, "microphone"),
        }
    }
}

/// A published local audio track
#[derive(Debug, Clone)]
pub struct LocalAudioTrack {
    sid: String,
    device_id: Option<String>,
    levels: LevelFeed,
}

impl LocalAudioTrack {
    /// Wrap a track published by the transport
    pub fn new(sid: impl Into<String>, device_id: Option<String>, levels: LevelFeed) -> Self {
        Self {
            sid: sid.into(),
            device_id,
            levels,
        }
    }

    /// Track without a level source
    pub fn silent(sid: impl Into<String>, device_id: Option<&str>) -> Self {
        Self::new(sid, device_id.map(ToString::to_string), LevelFeed::inert())
    }

    /// Transport-assigned track id
    #[must_use]
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Input device backing the track, `None` for the default device
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Level samples for visualization
    #[must_use]
    pub fn levels(&self) -> LevelFeed {
        self.levels.clone()
    }
}

/// A completed toggle change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleChange {
    /// New enabled state
    pub enabled: bool,
    /// Whether the user asked for it
    pub user_initiated: bool,
}

struct ToggleInner {
    source: TrackSource,
    transport: Arc<dyn Transport>,
    participant: LocalParticipant,
    preferences: PreferenceStore,
    enabled: Observable<bool>,
    pending: Observable<bool>,
    selected_device: Mutex<Option<String>>,
    device_errors: Subscribers<DeviceError>,
    changes: Subscribers<ToggleChange>,
    // Serializes publish/unpublish so rapid toggles apply in order
    op_lock: tokio::sync::Mutex<()>,
    ops: AtomicU64,
    // Bumped by `release`; operations started under an older value are void
    epoch: AtomicU64,
}

/// Enables and disables the local microphone track
#[derive(Clone)]
pub struct TrackToggle {
    inner: Arc<ToggleInner>,
}

impl TrackToggle {
    /// Create a microphone toggle
    ///
    /// The initial device comes from the preference store.
    #[must_use]
    pub fn microphone(
        transport: Arc<dyn Transport>,
        participant: LocalParticipant,
        preferences: PreferenceStore,
    ) -> Self {
        let selected = preferences.load().audio_input_device_id;
        Self {
            inner: Arc::new(ToggleInner {
                source: TrackSource::Microphone,
                transport,
                participant,
                preferences,
                enabled: Observable::new(false),
                pending: Observable::new(false),
                selected_device: Mutex::new(selected),
                device_errors: Subscribers::new(),
                changes: Subscribers::new(),
                op_lock: tokio::sync::Mutex::new(()),
                ops: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Source this toggle controls
    #[must_use]
    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    /// Visible enabled state
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.get()
    }

    /// Whether a publish or unpublish is in flight
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.pending.get()
    }

    /// Input device the next publish will use
    #[must_use]
    pub fn selected_device(&self) -> Option<String> {
        match self.inner.selected_device.lock() {
            Ok(device) => device.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Level feed of the active track, silent when none is published
    #[must_use]
    pub fn level_feed(&self) -> LevelFeed {
        self.inner
            .participant
            .microphone_track()
            .map_or_else(LevelFeed::inert, |track| track.levels())
    }

    /// Number of publish/unpublish operations started so far
    #[must_use]
    pub fn operations(&self) -> u64 {
        self.inner.ops.load(Ordering::Relaxed)
    }

    /// Enable or disable the track
    ///
    /// Enabling is refused without a confirmed publish grant; the current
    /// state is returned unchanged. Only `user_initiated` changes are
    /// remembered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceAcquisition`] if the device cannot be acquired,
    /// after notifying device error subscribers and reverting the visible
    /// state, or [`Error::Interrupted`] if the track was released while the
    /// change was in flight
    pub async fn set_enabled(&self, enabled: bool, user_initiated: bool) -> Result<bool> {
        let _op = self.inner.op_lock.lock().await;
        let epoch = self.epoch();
        let has_track = self.inner.participant.microphone_track().is_some();

        if enabled == has_track {
            self.inner.enabled.set(enabled);
            return Ok(enabled);
        }

        if enabled && !self.inner.participant.permission_state().is_granted() {
            tracing::debug!(
                source = %self.inner.source,
                permissions = %self.inner.participant.permission_state(),
                "publish not permitted, ignoring enable"
            );
            return Ok(has_track);
        }

        self.inner.ops.fetch_add(1, Ordering::Relaxed);
        let previous = self.inner.enabled.get();
        self.inner.pending.set(true);
        self.inner.enabled.set(enabled);

        let result = if enabled {
            self.publish(epoch).await
        } else {
            self.unpublish().await
        };

        if self.epoch() != epoch {
            tracing::debug!(source = %self.inner.source, enabled, "track released mid-change");
            return Err(Error::Interrupted(self.inner.source));
        }

        self.inner.pending.set(false);

        match result {
            Ok(()) => {
                if user_initiated {
                    self.inner.preferences.save_audio_input_enabled(enabled);
                }
                self.inner.changes.publish(&ToggleChange {
                    enabled,
                    user_initiated,
                });
                tracing::info!(
                    source = %self.inner.source,
                    enabled,
                    user_initiated,
                    "track toggled"
                );
                Ok(enabled)
            }
            Err(e) => {
                self.inner.enabled.set(previous);
                self.report(&e);
                Err(e)
            }
        }
    }

    /// Flip the current state
    ///
    /// # Errors
    ///
    /// See [`TrackToggle::set_enabled`]
    pub async fn toggle(&self, user_initiated: bool) -> Result<bool> {
        self.set_enabled(!self.is_enabled(), user_initiated).await
    }

    /// Switch the input device
    ///
    /// An active track is republished on the new device; if that fails the
    /// old track and selection stay in place.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceAcquisition`] if the new device cannot be
    /// acquired, or [`Error::Interrupted`] if the track was released while
    /// switching
    pub async fn select_device(
        &self,
        device_id: Option<String>,
        user_initiated: bool,
    ) -> Result<()> {
        let _op = self.inner.op_lock.lock().await;
        let epoch = self.epoch();

        if let Some(current) = self.inner.participant.microphone_track() {
            if current.device_id() != device_id.as_deref() {
                self.inner.ops.fetch_add(1, Ordering::Relaxed);
                self.inner.pending.set(true);
                let published = self
                    .inner
                    .transport
                    .publish_audio_track(device_id.as_deref())
                    .await;
                self.inner.pending.set(false);

                if self.epoch() != epoch {
                    if let Ok(track) = &published {
                        self.discard(track).await;
                    }
                    return Err(Error::Interrupted(self.inner.source));
                }

                let track = match published {
                    Ok(track) => track,
                    Err(e) => {
                        self.report(&e);
                        return Err(e);
                    }
                };

                self.inner.participant.set_microphone_track(Some(track));
                if let Err(e) = self.inner.transport.unpublish_audio_track(&current).await {
                    tracing::warn!(
                        error = %e,
                        sid = current.sid(),
                        "failed to unpublish previous track"
                    );
                }
            }
        }

        self.set_selected(device_id.clone());
        if user_initiated {
            self.inner.preferences.save_audio_input_device_id(device_id);
        }

        Ok(())
    }

    /// Drop the track locally after the session closed underneath it
    ///
    /// Nothing is unpublished and nothing is remembered. A publish still in
    /// flight is voided: its track is unpublished when it lands and never
    /// attached.
    pub fn release(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(track) = self.inner.participant.set_microphone_track(None) {
            tracing::debug!(sid = track.sid(), "released microphone track");
        }
        self.inner.enabled.set(false);
        self.inner.pending.set(false);
    }

    /// Subscribe to device acquisition failures
    pub fn on_device_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DeviceError) + Send + Sync + 'static,
    {
        self.inner.device_errors.subscribe(callback)
    }

    /// Subscribe to completed toggle changes
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ToggleChange) + Send + Sync + 'static,
    {
        self.inner.changes.subscribe(callback)
    }

    /// Subscribe to the visible enabled state, starting with the current value
    pub fn subscribe_enabled<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.inner.enabled.subscribe(callback)
    }

    async fn publish(&self, epoch: u64) -> Result<()> {
        let device = self.selected_device();
        let track = self
            .inner
            .transport
            .publish_audio_track(device.as_deref())
            .await?;

        if self.epoch() != epoch {
            self.discard(&track).await;
            return Ok(());
        }

        tracing::debug!(
            sid = track.sid(),
            device = device.as_deref().unwrap_or("default"),
            "published microphone"
        );
        self.inner.participant.set_microphone_track(Some(track));
        Ok(())
    }

    /// Unpublish a track that landed after `release`
    async fn discard(&self, track: &LocalAudioTrack) {
        tracing::debug!(sid = track.sid(), "discarding track published after release");
        if let Err(e) = self.inner.transport.unpublish_audio_track(track).await {
            tracing::warn!(error = %e, sid = track.sid(), "failed to unpublish stale track");
        }
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    async fn unpublish(&self) -> Result<()> {
        let Some(track) = self.inner.participant.microphone_track() else {
            return Ok(());
        };
        self.inner.transport.unpublish_audio_track(&track).await?;
        self.inner.participant.set_microphone_track(None);
        Ok(())
    }

    fn set_selected(&self, device_id: Option<String>) {
        let mut selected = match self.inner.selected_device.lock() {
            Ok(selected) => selected,
            Err(poisoned) => poisoned.into_inner(),
        };
        *selected = device_id;
    }

    fn report(&self, err: &Error) {
        match err.device_error() {
            Some(payload) => {
                tracing::warn!(
                    source = %payload.source,
                    error = %payload.error,
                    "device acquisition failed"
                );
                self.inner.device_errors.publish(&payload);
            }
            None => {
                tracing::warn!(source = %self.inner.source, error = %err, "track toggle failed");
            }
        }
    }
}

impl std::fmt::Debug for TrackToggle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackToggle")
            .field("source", &self.inner.source)
            .field("enabled", &self.is_enabled())
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}
