//! Command-line flags. Flags override the environment.

use crate::config::{Config, ConfigError};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Insura: chat with the insurance assistant from a terminal or over Telegram.
#[derive(Parser, Debug)]
#[command(name = "insura", version, about)]
pub struct Cli {
    /// Origin of the chat API.
    #[arg(long = "api-url", value_name = "URL")]
    pub api_url: Option<String>,

    /// Read bot messages aloud.
    #[arg(long = "voice-output")]
    pub voice_output: bool,

    /// Disable microphone recording.
    #[arg(long = "no-voice-input")]
    pub no_voice_input: bool,

    /// Disable attachments and document extraction.
    #[arg(long = "no-documents")]
    pub no_documents: bool,

    /// Where downloaded documents are saved.
    #[arg(long = "download-dir", value_name = "DIR")]
    pub download_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub mode: Option<Mode>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Chat in this terminal (default).
    #[default]
    Chat,
    /// Serve the assistant as a Telegram bot.
    Telegram,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        self.mode.unwrap_or_default()
    }

    pub fn apply(&self, config: &mut Config) -> Result<(), ConfigError> {
        if let Some(url) = &self.api_url {
            config.set_api_url(url.clone())?;
        }
        if self.voice_output {
            config.capabilities.voice_output = true;
        }
        if self.no_voice_input {
            config.capabilities.voice_input = false;
        }
        if self.no_documents {
            config.capabilities.document_upload = false;
        }
        if let Some(dir) = &self.download_dir {
            config.download_dir = dir.clone();
        }
        Ok(())
    }
}
