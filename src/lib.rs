//! Beacon Voice - Session controller for real-time voice agents
//!
//! This library drives the client side of a voice conversation with an
//! agent:
//! - Session lifecycle with race-safe connect and disconnect
//! - Agent state tracking for the visualizer
//! - Permission-gated microphone control
//! - Remembered microphone choices
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Control Surface                     │
//! │   Visibility  │  Toggle  │  Leave  │  Host events   │
//! └──────┬───────────────┬────────────────┬─────────────┘
//!        │               │                │
//! ┌──────▼──────┐ ┌──────▼──────┐ ┌───────▼─────────────┐
//! │  Session    │ │ Track       │ │ Agent State          │
//! │  Manager    │ │ Toggle      │ │ Tracker              │
//! └──────┬──────┘ └──┬───────┬──┘ └─────────────────────┘
//!        │           │       │
//!        │   ┌───────▼──┐ ┌──▼──────────────┐
//!        │   │Permission│ │ Preference Store │
//!        │   │  Gate    │ └─────────────────┘
//!        │   └──────────┘
//! ┌──────▼──────────────────────────────────────────────┐
//! │            Transport (real-time media)               │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod agent_state;
pub mod broker;
pub mod config;
pub mod control;
pub mod error;
pub mod observer;
pub mod participant;
pub mod permissions;
pub mod preferences;
pub mod session;
pub mod track;
pub mod transport;
pub mod voice;

pub use agent_state::{AgentState, AgentStateTracker};
pub use broker::{ConnectionBroker, ConnectionDetails, ConnectionRequest, HttpBroker};
pub use config::Config;
pub use control::{
    ControlBarOptions, ControlEvent, ControlSurface, DEFAULT_NO_AGENT_TIMEOUT, SurfaceState,
};
pub use error::{DeviceError, Error, Result};
pub use observer::{Observable, Subscribers, Subscription};
pub use participant::LocalParticipant;
pub use permissions::{
    ControlOverrides, ParticipantPermissions, PermissionState, VisibleControls,
    can_show_microphone,
};
pub use preferences::{
    DevicePreference, FileBackend, MemoryBackend, PreferenceBackend, PreferenceStore,
};
pub use session::{DisconnectReason, SessionEvent, SessionManager, SessionStatus};
pub use track::{LocalAudioTrack, ToggleChange, TrackSource, TrackToggle};
pub use transport::{Credentials, SessionHandle, Transport, TransportEvent};
