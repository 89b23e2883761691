//! Participant permission gate
//!
//! Permissions arrive from the server some time after joining. Until then
//! they are unknown, and unknown is never treated as granted.

use serde::{Deserialize, Serialize};

/// Permissions granted to the local participant by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantPermissions {
    /// May publish microphone audio
    pub can_publish_audio: bool,
    /// May subscribe to remote tracks
    #[serde(default = "default_true")]
    pub can_subscribe: bool,
    /// May publish data messages
    #[serde(default = "default_true")]
    pub can_publish_data: bool,
}

const fn default_true() -> bool {
    true
}

impl ParticipantPermissions {
    /// Permissions allowing audio publishing
    #[must_use]
    pub const fn publisher() -> Self {
        Self {
            can_publish_audio: true,
            can_subscribe: true,
            can_publish_data: true,
        }
    }

    /// Listen-only permissions
    #[must_use]
    pub const fn listener() -> Self {
        Self {
            can_publish_audio: false,
            can_subscribe: true,
            can_publish_data: true,
        }
    }
}

/// Whether the local participant may publish audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    /// Server has not reported permissions yet
    #[default]
    Unknown,
    /// Server reported publishing is not allowed
    Denied,
    /// Server reported publishing is allowed
    Granted,
}

impl PermissionState {
    /// Derive the audio publishing state from an optional server record
    #[must_use]
    pub const fn from_permissions(permissions: Option<&ParticipantPermissions>) -> Self {
        match permissions {
            None => Self::Unknown,
            Some(p) if p.can_publish_audio => Self::Granted,
            Some(_) => Self::Denied,
        }
    }

    /// Only an explicit grant counts
    #[must_use]
    pub const fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Denied => write!(f, "denied"),
            Self::Granted => write!(f, "granted"),
        }
    }
}

/// Decide whether the microphone control may be shown
///
/// Unknown permissions veto everything, so the control never flashes up
/// before the server confirms it. Once known, an explicit override wins,
/// otherwise the server grant decides.
#[must_use]
pub const fn can_show_microphone(
    explicit_override: Option<bool>,
    permissions: Option<&ParticipantPermissions>,
) -> bool {
    match (permissions, explicit_override) {
        (None, _) => false,
        (Some(_), Some(forced)) => forced,
        (Some(p), None) => p.can_publish_audio,
    }
}

/// Caller-supplied visibility overrides for the control bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControlOverrides {
    /// Force the microphone toggle on or off
    #[serde(default)]
    pub microphone: Option<bool>,
    /// Force the leave action on or off (shown by default)
    #[serde(default)]
    pub leave: Option<bool>,
}

/// Controls the surface should render right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct VisibleControls {
    /// Microphone toggle
    pub microphone: bool,
    /// Leave / disconnect action
    pub leave: bool,
}

impl VisibleControls {
    /// Resolve overrides against the current permission record
    ///
    /// The gate verdict is intersected with the server grant: a caller can
    /// hide the microphone toggle but can never show it for a participant
    /// that may not publish.
    #[must_use]
    pub const fn resolve(
        overrides: ControlOverrides,
        permissions: Option<&ParticipantPermissions>,
    ) -> Self {
        let granted = PermissionState::from_permissions(permissions).is_granted();
        let microphone = granted && can_show_microphone(overrides.microphone, permissions);
        let leave = match overrides.leave {
            Some(leave) => leave,
            None => true,
        };

        Self { microphone, leave }
    }

    /// Nothing visible
    #[must_use]
    pub const fn none() -> Self {
        Self {
            microphone: false,
            leave: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_permissions_always_hide() {
        for forced in [None, Some(true), Some(false)] {
            assert!(!can_show_microphone(forced, None));
        }
    }

    #[test]
    fn override_is_returned_verbatim_once_known() {
        let listener = ParticipantPermissions::listener();
        let publisher = ParticipantPermissions::publisher();

        assert!(can_show_microphone(Some(true), Some(&listener)));
        assert!(!can_show_microphone(Some(false), Some(&publisher)));
    }

    #[test]
    fn falls_through_to_server_grant() {
        assert!(can_show_microphone(
            None,
            Some(&ParticipantPermissions::publisher())
        ));
        assert!(!can_show_microphone(
            None,
            Some(&ParticipantPermissions::listener())
        ));
    }

    #[test]
    fn permission_state_is_tri_state() {
        assert_eq!(
            PermissionState::from_permissions(None),
            PermissionState::Unknown
        );
        assert_eq!(
            PermissionState::from_permissions(Some(&ParticipantPermissions::listener())),
            PermissionState::Denied
        );
        assert_eq!(
            PermissionState::from_permissions(Some(&ParticipantPermissions::publisher())),
            PermissionState::Granted
        );
        assert!(!PermissionState::Unknown.is_granted());
        assert!(!PermissionState::Denied.is_granted());
    }

    #[test]
    fn visible_controls_defaults() {
        let controls = VisibleControls::resolve(
            ControlOverrides::default(),
            Some(&ParticipantPermissions::publisher()),
        );
        assert_eq!(
            controls,
            VisibleControls {
                microphone: true,
                leave: true
            }
        );

        let unknown = VisibleControls::resolve(ControlOverrides::default(), None);
        assert!(!unknown.microphone);
        assert!(unknown.leave);
    }

    #[test]
    fn denied_permissions_hide_forced_microphone() {
        let overrides = ControlOverrides {
            microphone: Some(true),
            leave: None,
        };
        let controls =
            VisibleControls::resolve(overrides, Some(&ParticipantPermissions::listener()));
        assert!(!controls.microphone);
    }

    #[test]
    fn caller_can_hide_leave_and_microphone() {
        let overrides = ControlOverrides {
            microphone: Some(false),
            leave: Some(false),
        };
        let controls =
            VisibleControls::resolve(overrides, Some(&ParticipantPermissions::publisher()));
        assert_eq!(controls, VisibleControls::none());
    }

    #[test]
    fn permissions_deserialize_from_camel_case() {
        let p: ParticipantPermissions =
            serde_json::from_str(r#"{"canPublishAudio": false}"#).unwrap();
        assert!(!p.can_publish_audio);
        assert!(p.can_subscribe);
    }
}
