use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use beacon_voice::voice::{AudioCapture, BarLevels, level_channel, list_input_devices};
use beacon_voice::{Config, ConnectionBroker, DevicePreference, PreferenceStore};

/// Beacon Voice - Session controller for real-time voice agents
#[derive(Parser)]
#[command(name = "beacon-voice", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// User whose preferences to use
    #[arg(short, long, env = "BEACON_VOICE_USER_ID")]
    user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List audio input devices
    Devices {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show a live level meter for a microphone
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Input device; defaults to the remembered one
        #[arg(long)]
        device: Option<String>,
    },
    /// Fetch connection details from the broker
    Credentials,
    /// Inspect or change remembered microphone choices
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
}

#[derive(Subcommand)]
enum PrefsAction {
    /// Show the stored preference
    Show,
    /// Update the stored preference
    Set {
        /// Start sessions with the microphone on
        #[arg(long)]
        enabled: Option<bool>,
        /// Input device id
        #[arg(long, conflicts_with = "default_device")]
        device: Option<String>,
        /// Use the system default input
        #[arg(long)]
        default_device: bool,
    },
    /// Forget the stored preference
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,beacon_voice=info",
        1 => "info,beacon_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load();
    if let Some(user) = cli.user {
        config.user_id = user;
    }

    match cli.command {
        Command::Devices { json } => devices(json),
        Command::TestMic { duration, device } => test_mic(&config, duration, device).await,
        Command::Credentials => credentials(&config).await,
        Command::Prefs { action } => prefs(&config, action),
    }
}

/// List input devices
fn devices(json: bool) -> anyhow::Result<()> {
    let devices = list_input_devices()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No input devices found");
        return Ok(());
    }

    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        println!("{marker} {}", device.name);
    }
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64, device: Option<String>) -> anyhow::Result<()> {
    let store = PreferenceStore::new(config.preference_backend(), true);
    let device = device.or_else(|| store.load().audio_input_device_id);

    let mut capture = AudioCapture::open(device.as_deref())?;
    println!(
        "Testing {} at {} Hz for {duration} seconds...",
        capture.device_name(),
        capture.sample_rate()
    );
    println!("Speak into your microphone!\n");

    let (sender, feed) = level_channel();
    capture.start(sender)?;

    let bars = BarLevels::default();
    let ticks = duration * 10;
    for i in 0..ticks {
        tokio::time::sleep(Duration::from_millis(100)).await;

        let level = feed.current();
        if i % 10 == 9 {
            println!("[{:2}s] level: {level:.4} | {}", i / 10 + 1, render_bars(&bars, level));
        }
    }

    capture.stop();

    println!("\n---");
    println!("If the bars moved, your microphone is working.");
    println!("If the level stayed near 0, check the input with `beacon-voice devices`.");

    Ok(())
}

/// Draw bar heights as block characters
fn render_bars(bars: &BarLevels, level: f32) -> String {
    const BLOCKS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

    let span = (bars.max_height - bars.min_height).max(f32::EPSILON);
    bars.heights(level)
        .into_iter()
        .map(|h| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let idx = (((h - bars.min_height) / span) * 7.0).round() as usize;
            BLOCKS[idx.min(7)]
        })
        .collect()
}

/// Broker round trip
async fn credentials(config: &Config) -> anyhow::Result<()> {
    let broker = config.broker()?;
    println!("Requesting connection details from {}", broker.endpoint());

    let details = broker
        .request_connection(&config.connection_request())
        .await?;
    let credentials = details.credentials()?;

    println!("Server:      {}", credentials.server_url());
    println!("Room:        {}", details.room_name.as_deref().unwrap_or("-"));
    println!(
        "Participant: {}",
        details.participant_name.as_deref().unwrap_or("-")
    );
    println!("Token:       {} bytes", credentials.participant_token().len());
    Ok(())
}

/// Show or edit stored preferences
fn prefs(config: &Config, action: PrefsAction) -> anyhow::Result<()> {
    let backend = config.preference_file();
    let store = PreferenceStore::new(config.preference_backend(), false);

    match action {
        PrefsAction::Show => {
            println!("File: {}", backend.path().display());
            print_preference(&store.load());
        }
        PrefsAction::Set {
            enabled,
            device,
            default_device,
        } => {
            if enabled.is_none() && device.is_none() && !default_device {
                anyhow::bail!("nothing to set; pass --enabled, --device or --default-device");
            }
            if let Some(enabled) = enabled {
                store.save_audio_input_enabled(enabled);
            }
            if device.is_some() || default_device {
                store.save_audio_input_device_id(device);
            }
            print_preference(&store.load());
        }
        PrefsAction::Clear => {
            store.clear();
            println!("Cleared {}", backend.path().display());
        }
    }
    Ok(())
}

fn print_preference(preference: &DevicePreference) {
    println!(
        "Microphone:  {}",
        if preference.audio_input_enabled { "on" } else { "off" }
    );
    println!(
        "Device:      {}",
        preference
            .audio_input_device_id
            .as_deref()
            .unwrap_or("system default")
    );
}
