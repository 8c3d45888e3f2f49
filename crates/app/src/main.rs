use anyhow::{bail, Context, Result};
use atlasvoice_core::{Session, SessionState};
use clap::{Parser, Subcommand};
use log::info;

mod audio;
mod backend;
mod channel;
mod config;
mod meter;
mod resample;

use backend::LiveBackend;
use config::AppConfig;
use meter::StatusMeter;

#[derive(Parser)]
#[command(name = "atlasvoice")]
#[command(about = "Atlas: real-time voice calls with a conversational AI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available audio devices
    List,
    /// Start a call (press Ctrl+C to hang up)
    Run {
        #[arg(short, long)]
        input: Option<String>,
        #[arg(short, long)]
        output: Option<String>,
        /// Prebuilt voice for replies
        #[arg(long)]
        voice: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /// Hide the volume meter
        #[arg(long)]
        no_meter: bool,
    },
    /// Show the configuration file and its values
    Config,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::List) => audio::list_devices(),
        Some(Commands::Run {
            input,
            output,
            voice,
            model,
            no_meter,
        }) => run_call(input, output, voice, model, no_meter),
        Some(Commands::Config) => show_config(),
        None => run_call(None, None, None, None, false),
    }
}

fn run_call(
    input: Option<String>,
    output: Option<String>,
    voice: Option<String>,
    model: Option<String>,
    no_meter: bool,
) -> Result<()> {
    let mut config = AppConfig::load();
    if let Some(input) = input {
        config.last_input = input;
    }
    if let Some(output) = output {
        config.last_output = output;
    }
    if let Some(voice) = voice {
        config.voice = voice;
    }
    if let Some(model) = model {
        config.model = model;
    }

    let api_key = config.api_key().with_context(|| {
        format!(
            "No API key found. Set {} (or API_KEY) in the environment",
            config.api_key_env
        )
    })?;

    let session_config = config.session_config();
    let mut backend = LiveBackend {
        input_name: config.last_input.clone(),
        output_name: config.last_output.clone(),
        url: channel::session_url(&config.endpoint, &api_key),
        block_size: session_config.capture_block_size,
    };

    let mut session = Session::open(session_config, &mut backend);

    let handle = session.handle();
    ctrlc::set_handler(move || handle.close()).context("Failed to install Ctrl+C handler")?;

    let mut status = StatusMeter::spawn(
        session.state_watch(),
        session.volume(),
        config.meter_enabled && !no_meter,
    )
    .context("Failed to start status display")?;

    session.run();
    let outcome = session.state();
    drop(session);
    status.stop();

    if outcome == SessionState::Error {
        bail!("Call ended with a connection error");
    }

    // Only the devices stick; other flags apply to this call
    let mut stored = AppConfig::load();
    stored.last_input = config.last_input;
    stored.last_output = config.last_output;
    stored.save();
    info!("Call ended");
    Ok(())
}

fn show_config() -> Result<()> {
    let config = AppConfig::load();
    match config::config_path() {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: unavailable on this platform"),
    }
    let json = serde_json::to_string_pretty(&config).context("Failed to serialize config")?;
    println!("{}", json);
    Ok(())
}
