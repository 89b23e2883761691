//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon-voice/config.toml` as a persistent config
//! source. Every field is optional; the file is a partial overlay on top of
//! defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoiceConfigFile {
    /// Connection broker
    #[serde(default)]
    pub broker: BrokerFileConfig,

    /// Identity sent to the broker
    #[serde(default)]
    pub user: UserFileConfig,

    /// Agent to dispatch
    pub agent_id: Option<String>,

    /// Device preference storage
    #[serde(default)]
    pub preferences: PreferencesFileConfig,

    /// Control visibility overrides
    #[serde(default)]
    pub controls: ControlsFileConfig,

    /// Transport noise filter
    pub noise_filter: Option<bool>,

    /// Seconds to wait for an agent before notifying; 0 disables
    pub no_agent_timeout_secs: Option<u64>,
}

/// Broker configuration
#[derive(Debug, Default, Deserialize)]
pub struct BrokerFileConfig {
    /// Connection details endpoint
    pub endpoint: Option<String>,

    /// Bearer token for the endpoint
    pub auth_token: Option<String>,
}

/// User identity
#[derive(Debug, Default, Deserialize)]
pub struct UserFileConfig {
    pub name: Option<String>,
    pub id: Option<String>,
}

/// Preference storage configuration
#[derive(Debug, Default, Deserialize)]
pub struct PreferencesFileConfig {
    /// Namespace for stored records
    pub scope: Option<String>,

    /// Directory holding preference files
    pub dir: Option<String>,

    /// Remember microphone choices
    pub save_user_choices: Option<bool>,
}

/// Visibility overrides
#[derive(Debug, Default, Deserialize)]
pub struct ControlsFileConfig {
    pub microphone: Option<bool>,
    pub leave: Option<bool>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoiceConfigFile {
    let Some(path) = config_file_path() else {
        return VoiceConfigFile::default();
    };

    if !path.exists() {
        return VoiceConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => parse_config_file(&content).unwrap_or_else(|e| {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config file, using defaults"
            );
            VoiceConfigFile::default()
        }),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoiceConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the contents are not valid TOML for the schema
pub fn parse_config_file(content: &str) -> crate::Result<VoiceConfigFile> {
    let config = toml::from_str(content)?;
    Ok(config)
}

/// Return the config file path: `~/.config/omni/beacon-voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon-voice")
            .join("config.toml")
    })
}
