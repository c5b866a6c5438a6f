//! Main Entrypoint for the Recognition Stream Viewer
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and command line.
//! 2. Building the backend client, the push channel and the speech backend.
//! 3. Mounting one viewing session and feeding it actions read from stdin.
//! 4. Unmounting cleanly on `quit`, end of input or `Ctrl+C`.

use anyhow::Context;
use clap::Parser;
use facewatch_core::{backend::HttpBackend, voice::SpeechSynthesizer};
use facewatch_viewer::{
    channel::RecognitionChannel,
    client::{RecognitionStreamClient, SessionDeps, SessionSettings, UserAction},
    config::{Config, validate_backend_url},
    greetings::load_greetings,
    speech::{EspeakSynthesizer, SilentSynthesizer},
};
use std::{io::BufRead, path::PathBuf, sync::Arc};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Live face-recognition viewer with spoken greetings.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Backend base URL; overrides BACKEND_HOST_URL.
    #[arg(long)]
    backend_url: Option<String>,

    /// JSON file mapping identities to greetings; overrides GREETINGS_PATH.
    #[arg(long)]
    greetings: Option<PathBuf>,

    /// Log greetings instead of speaking them.
    #[arg(long)]
    mute: bool,

    /// espeak-ng executable used for speech.
    #[arg(long, default_value = "espeak-ng")]
    espeak: String,
}

/// Listens for the `Ctrl+C` signal to leave the session.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Leaving session...");
}

/// Forwards one action per stdin line until input ends.
///
/// Runs on its own thread: a blocking stdin read must not hold up runtime
/// shutdown.
fn read_actions(actions: mpsc::UnboundedSender<UserAction>) {
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read from stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<UserAction>() {
            Ok(action) => {
                if actions.send(action).is_err() {
                    return;
                }
            }
            Err(e) => eprintln!("{}", e),
        }
    }
    let _ = actions.send(UserAction::Quit);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let args = Args::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(url) = args.backend_url {
        config.backend_url = validate_backend_url(&url)
            .map_err(|e| anyhow::anyhow!("Invalid --backend-url: {}", e))?;
    }
    if let Some(path) = args.greetings {
        config.greetings_path = Some(path);
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(backend = %config.backend_url, "Configuration loaded. Building session...");

    // --- 3. Initialize Collaborators ---
    let greetings = load_greetings(config.greetings_path.as_deref(), &config.greeting_template)
        .context("Failed to load greetings")?;
    let backend = Arc::new(
        HttpBackend::new(&config.backend_url, config.health_check_timeout)
            .context("Failed to build HTTP client")?,
    );
    let (channel, inbox) = RecognitionChannel::new(config.channel_config());
    let channel_status = channel.subscribe();
    let synthesizer: Arc<dyn SpeechSynthesizer> = if args.mute {
        info!("Speech is muted.");
        Arc::new(SilentSynthesizer::new(config.voice_locale.clone()))
    } else {
        Arc::new(EspeakSynthesizer::spawn(args.espeak))
    };

    // --- 4. Mount the Session ---
    let mut client = RecognitionStreamClient::mount(
        SessionDeps {
            backend,
            channel: Arc::new(channel),
            inbox,
            channel_status,
            synthesizer,
            greetings,
        },
        SessionSettings {
            health_interval: config.health_check_interval,
            health_timeout: config.health_check_timeout,
            locale: config.voice_locale.clone(),
        },
    );

    let (actions_tx, actions_rx) = mpsc::unbounded_channel();
    let stdin_tx = actions_tx.clone();
    std::thread::spawn(move || read_actions(stdin_tx));
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = actions_tx.send(UserAction::Quit);
    });

    // --- 5. Run Until Quit ---
    println!("Type start, stop, reset, status or quit.");
    client
        .run(actions_rx, |view| println!("\n{}", view.render()))
        .await;

    client.unmount().await;
    info!("Viewer has shut down.");
    Ok(())
}
