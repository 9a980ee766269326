use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

mod api;
mod audio;
mod bus;
mod chat;
mod cli;
mod config;
mod documents;
mod interface;
mod session;

use audio::{CommandSynthesizer, FfmpegDevice, SpeechQueue};
use cli::{Cli, Mode};
use session::{Session, SessionSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();

    // Logs go to stderr so they never interleave with the rendered chat.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dotenv {
        // It's not fatal if .env doesn't exist
        info!("No .env file found or failed to load: {}", e);
    }

    let cli = Cli::parse();
    let mut config = config::Config::from_env().context("invalid configuration")?;
    cli.apply(&mut config).context("invalid command-line flag")?;

    info!(api_url = %config.api_url, mode = ?cli.mode(), "Insura starting...");

    let backend: Arc<dyn api::Backend> = Arc::new(api::ApiClient::new(config.api_url.clone())?);
    let settings = SessionSettings::new(config.capabilities, config.download_dir.clone());

    match cli.mode() {
        Mode::Chat => {
            let bus = Arc::new(bus::EventBus::new());
            let mut session = Session::new(backend, bus, settings);

            if config.capabilities.voice_input {
                let device = FfmpegDevice::new(
                    config.recorder.program.clone(),
                    config.recorder.input_format.clone(),
                    config.recorder.input_device.clone(),
                );
                session = session.with_audio_device(Arc::new(device));
            }
            if config.capabilities.voice_output {
                match CommandSynthesizer::from_command_line(&config.speech_command) {
                    Some(synth) => session = session.with_speech(SpeechQueue::new(Arc::new(synth))),
                    None => info!("No speech command configured, voice output disabled."),
                }
            }

            interface::terminal::TerminalInterface::new(session).run().await?;
        }
        Mode::Telegram => {
            let telegram =
                interface::telegram::TelegramInterface::new(backend, settings, config.telegram)?;
            telegram.run().await?;
        }
    }

    info!("Insura stopped.");
    Ok(())
}
