//! Local participant state

use std::sync::{Arc, Mutex};

use crate::observer::{Observable, Subscription};
use crate::permissions::{ParticipantPermissions, PermissionState};
use crate::track::LocalAudioTrack;

/// The local user inside a session
///
/// Clones share state.
#[derive(Clone)]
pub struct LocalParticipant {
    permissions: Observable<Option<ParticipantPermissions>>,
    microphone_track: Arc<Mutex<Option<LocalAudioTrack>>>,
}

impl Default for LocalParticipant {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalParticipant {
    /// Participant with unknown permissions and no tracks
    #[must_use]
    pub fn new() -> Self {
        Self {
            permissions: Observable::new(None),
            microphone_track: Arc::new(Mutex::new(None)),
        }
    }

    /// Server permission record, `None` until the server reports it
    #[must_use]
    pub fn permissions(&self) -> Option<ParticipantPermissions> {
        self.permissions.get()
    }

    /// Audio publishing permission
    #[must_use]
    pub fn permission_state(&self) -> PermissionState {
        PermissionState::from_permissions(self.permissions().as_ref())
    }

    /// Apply permissions reported by the server
    ///
    /// Returns `true` if they changed.
    pub fn set_permissions(&self, permissions: Option<ParticipantPermissions>) -> bool {
        let changed = self.permissions.set(permissions);
        if changed {
            tracing::debug!(state = %self.permission_state(), "participant permissions updated");
        }
        changed
    }

    /// Subscribe to permission changes, starting with the current record
    pub fn subscribe_permissions<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Option<ParticipantPermissions>) + Send + Sync + 'static,
    {
        self.permissions.subscribe(callback)
    }

    /// Currently published microphone track
    #[must_use]
    pub fn microphone_track(&self) -> Option<LocalAudioTrack> {
        match self.microphone_track.lock() {
            Ok(track) => track.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the microphone track, returning the previous one
    pub fn set_microphone_track(&self, track: Option<LocalAudioTrack>) -> Option<LocalAudioTrack> {
        let mut slot = match self.microphone_track.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *slot, track)
    }

    /// Forget permissions and tracks after the session ends
    pub fn reset(&self) {
        self.set_microphone_track(None);
        self.set_permissions(None);
    }
}
