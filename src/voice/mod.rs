//! Local audio
//!
//! Input device discovery, microphone capture and the level feed that
//! drives the control bar's visualizer.

mod capture;
mod devices;
mod levels;

pub use capture::AudioCapture;
pub use devices::{InputDevice, list_input_devices};
pub use levels::{BarLevels, LevelFeed, LevelSender, level_channel, rms};
