//! Configuration management for the voice controller

pub mod file;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::broker::{ConnectionRequest, HttpBroker};
use crate::control::{ControlBarOptions, DEFAULT_NO_AGENT_TIMEOUT};
use crate::permissions::ControlOverrides;
use crate::preferences::{FileBackend, PreferenceBackend};
use crate::Result;

use file::VoiceConfigFile;

/// Default connection details endpoint
pub const DEFAULT_BROKER_URL: &str = "http://localhost:3000/api/connection-details";

/// Default namespace for stored device preferences
pub const DEFAULT_PREFERENCE_SCOPE: &str = "voice";

/// Voice controller configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Connection details endpoint
    /// Set via `BEACON_VOICE_CONN_DETAILS_ENDPOINT`
    pub broker_url: String,

    /// Bearer token for the broker
    pub broker_auth_token: Option<SecretString>,

    /// Display name sent to the broker
    pub user_name: String,

    /// Stable user identifier, also keys the preference file
    pub user_id: String,

    /// Agent dispatched into the session
    pub agent_id: String,

    /// Namespace for stored preferences
    pub preference_scope: String,

    /// Directory for preference files
    pub preferences_dir: PathBuf,

    /// Remember microphone choices
    pub save_user_choices: bool,

    /// Control visibility overrides
    pub controls: ControlOverrides,

    /// Ask the transport for noise filtering
    pub noise_filter: bool,

    /// Delay before telling the host no agent joined, `None` to never tell
    /// Set via `BEACON_VOICE_NO_AGENT_TIMEOUT_SECS`
    pub no_agent_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            broker_auth_token: None,
            user_name: "Voice User".to_string(),
            user_id: "local".to_string(),
            agent_id: "default".to_string(),
            preference_scope: DEFAULT_PREFERENCE_SCOPE.to_string(),
            preferences_dir: FileBackend::default_dir(),
            save_user_choices: true,
            controls: ControlOverrides::default(),
            noise_filter: true,
            no_agent_timeout: Some(DEFAULT_NO_AGENT_TIMEOUT),
        }
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    #[must_use]
    pub fn load() -> Self {
        Self::from_parts(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    pub fn from_parts<F>(fc: VoiceConfigFile, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let env_flag = |key: &str| env(key).and_then(|v| parse_flag(&v));

        let config = Self {
            broker_url: env("BEACON_VOICE_CONN_DETAILS_ENDPOINT")
                .or(fc.broker.endpoint)
                .unwrap_or(defaults.broker_url),
            broker_auth_token: env("BEACON_VOICE_BROKER_TOKEN")
                .or(fc.broker.auth_token)
                .map(SecretString::from),
            user_name: env("BEACON_VOICE_USER_NAME")
                .or(fc.user.name)
                .unwrap_or(defaults.user_name),
            user_id: env("BEACON_VOICE_USER_ID")
                .or(fc.user.id)
                .unwrap_or(defaults.user_id),
            agent_id: env("BEACON_VOICE_AGENT_ID")
                .or(fc.agent_id)
                .unwrap_or(defaults.agent_id),
            preference_scope: fc
                .preferences
                .scope
                .unwrap_or(defaults.preference_scope),
            preferences_dir: env("BEACON_VOICE_PREFERENCES_DIR")
                .or(fc.preferences.dir)
                .map_or(defaults.preferences_dir, PathBuf::from),
            save_user_choices: env_flag("BEACON_VOICE_SAVE_USER_CHOICES")
                .or(fc.preferences.save_user_choices)
                .unwrap_or(defaults.save_user_choices),
            controls: ControlOverrides {
                microphone: fc.controls.microphone,
                leave: fc.controls.leave,
            },
            noise_filter: env_flag("BEACON_VOICE_NOISE_FILTER")
                .or(fc.noise_filter)
                .unwrap_or(defaults.noise_filter),
            no_agent_timeout: env("BEACON_VOICE_NO_AGENT_TIMEOUT_SECS")
                .and_then(|v| parse_secs(&v))
                .or(fc.no_agent_timeout_secs)
                .map_or(defaults.no_agent_timeout, |secs| {
                    (secs > 0).then_some(Duration::from_secs(secs))
                }),
        };

        tracing::debug!(
            broker = %config.broker_url,
            agent_id = %config.agent_id,
            save_user_choices = config.save_user_choices,
            "configuration loaded"
        );

        config
    }

    /// Identity to send to the broker
    #[must_use]
    pub fn connection_request(&self) -> ConnectionRequest {
        ConnectionRequest {
            user_name: self.user_name.clone(),
            agent_id: self.agent_id.clone(),
            user_id: self.user_id.clone(),
        }
    }

    /// Broker client for the configured endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is not an http(s) URL
    pub fn broker(&self) -> Result<HttpBroker> {
        use secrecy::ExposeSecret;

        let broker = HttpBroker::new(&self.broker_url)?;
        Ok(match &self.broker_auth_token {
            Some(token) => broker.with_auth_token(token.expose_secret()),
            None => broker,
        })
    }

    /// Control bar options for this configuration
    #[must_use]
    pub fn control_bar_options(&self) -> ControlBarOptions {
        ControlBarOptions::default()
            .with_controls(self.controls)
            .with_save_user_choices(self.save_user_choices)
            .with_noise_filter(self.noise_filter)
            .with_no_agent_timeout(self.no_agent_timeout)
    }

    /// File-backed preference storage for the configured user
    #[must_use]
    pub fn preference_backend(&self) -> Arc<dyn PreferenceBackend> {
        Arc::new(self.preference_file())
    }

    /// Preference file for the configured user
    #[must_use]
    pub fn preference_file(&self) -> FileBackend {
        FileBackend::for_user(&self.preferences_dir, &self.preference_scope, &self.user_id)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            tracing::warn!(value = other, "ignoring invalid boolean");
            None
        }
    }
}

fn parse_secs(value: &str) -> Option<u64> {
    match value.trim().parse() {
        Ok(secs) => Some(secs),
        Err(_) => {
            tracing::warn!(value, "ignoring invalid number of seconds");
            None
        }
    }
}
