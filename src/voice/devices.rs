//! Input device enumeration

use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::track::TrackSource;
use crate::{Error, Result};

/// An audio input the user can pick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDevice {
    /// Identifier stored in device preferences
    pub id: String,
    /// Human readable name
    pub name: String,
    /// Whether this is the system default input
    pub is_default: bool,
}

/// List the host's audio inputs
///
/// Device ids are the device names reported by the host.
///
/// # Errors
///
/// Returns error if the host cannot enumerate devices
pub fn list_input_devices() -> Result<Vec<InputDevice>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| Error::Audio(format!("failed to enumerate input devices: {e}")))?;

    let listed: Vec<InputDevice> = devices
        .filter_map(|device| device.name().ok())
        .map(|name| InputDevice {
            is_default: default_name.as_deref() == Some(name.as_str()),
            id: name.clone(),
            name,
        })
        .collect();

    tracing::debug!(count = listed.len(), host = ?host.id(), "enumerated input devices");
    Ok(listed)
}

/// Resolve a device id to a host device, `None` for the default input
pub(crate) fn find_input_device(device_id: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();

    let Some(id) = device_id else {
        return host
            .default_input_device()
            .ok_or_else(|| Error::device(TrackSource::Microphone, "no input device available"));
    };

    let mut devices = host
        .input_devices()
        .map_err(|e| Error::device(TrackSource::Microphone, e.to_string()))?;

    devices
        .find(|device| device.name().is_ok_and(|name| name == id))
        .ok_or_else(|| {
            Error::device(
                TrackSource::Microphone,
                format!("input device not found: {id}"),
            )
        })
}
