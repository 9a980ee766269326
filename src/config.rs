use std::path::PathBuf;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be one of 1/0, true/false, yes/no, on/off (got {value:?})")]
    InvalidBool { name: &'static str, value: String },
    #[error("{name} is not an http(s) URL: {value:?}")]
    InvalidUrl { name: &'static str, value: String },
}

/// Which optional parts of the widget are switched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub voice_input: bool,
    pub voice_output: bool,
    pub document_upload: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            voice_input: true,
            voice_output: false,
            document_upload: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderConfig {
    pub program: String,
    pub input_format: String,
    pub input_device: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelegramConfig {
    pub token: Option<String>,
    /// Usernames allowed to talk to the bot. Empty denies everyone.
    pub whitelist: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub capabilities: Capabilities,
    pub download_dir: PathBuf,
    pub recorder: RecorderConfig,
    pub speech_command: String,
    pub telegram: TelegramConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source. Unset and blank
    /// variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let flag = |name: &'static str, default: bool| match var(name) {
            Some(value) => parse_bool(name, &value),
            None => Ok(default),
        };

        let api_url = match var("INSURA_API_URL") {
            Some(url) => validate_url("INSURA_API_URL", url)?,
            None => DEFAULT_API_URL.to_string(),
        };

        let defaults = Capabilities::default();
        let capabilities = Capabilities {
            voice_input: flag("INSURA_VOICE_INPUT", defaults.voice_input)?,
            voice_output: flag("INSURA_VOICE_OUTPUT", defaults.voice_output)?,
            document_upload: flag("INSURA_DOCUMENT_UPLOAD", defaults.document_upload)?,
        };

        let download_dir = var("INSURA_DOWNLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_download_dir);

        let (input_format, input_device) = default_recorder_input();
        let recorder = RecorderConfig {
            program: var("INSURA_RECORDER").unwrap_or_else(|| "ffmpeg".to_string()),
            input_format: var("INSURA_RECORDER_FORMAT").unwrap_or_else(|| input_format.to_string()),
            input_device: var("INSURA_RECORDER_DEVICE").unwrap_or_else(|| input_device.to_string()),
        };

        let speech_command =
            var("INSURA_SPEECH_COMMAND").unwrap_or_else(|| default_speech_command().to_string());

        let telegram = TelegramConfig {
            token: var("TELOXIDE_TOKEN").or_else(|| var("TELEGRAM_BOT_TOKEN")),
            whitelist: var("TELEGRAM_WHITELIST")
                .map(|list| parse_list(&list))
                .unwrap_or_default(),
        };

        Ok(Self {
            api_url,
            capabilities,
            download_dir,
            recorder,
            speech_command,
            telegram,
        })
    }

    pub fn set_api_url(&mut self, url: String) -> Result<(), ConfigError> {
        self.api_url = validate_url("--api-url", url)?;
        Ok(())
    }
}

pub fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            name,
            value: value.to_string(),
        }),
    }
}

fn validate_url(name: &'static str, url: String) -> Result<String, ConfigError> {
    match reqwest::Url::parse(&url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
            Ok(url.trim_end_matches('/').to_string())
        }
        _ => Err(ConfigError::InvalidUrl { name, value: url }),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("downloads"))
}

fn default_recorder_input() -> (&'static str, &'static str) {
    if cfg!(target_os = "macos") {
        ("avfoundation", ":0")
    } else if cfg!(target_os = "windows") {
        ("dshow", "audio=default")
    } else {
        ("pulse", "default")
    }
}

fn default_speech_command() -> &'static str {
    if cfg!(target_os = "macos") {
        "say"
    } else {
        "espeak-ng"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.capabilities, Capabilities::default());
        assert!(config.capabilities.voice_input);
        assert!(!config.capabilities.voice_output);
        assert_eq!(config.recorder.program, "ffmpeg");
        assert!(config.telegram.token.is_none());
        assert!(config.telegram.whitelist.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("INSURA_API_URL", "https://insura.example.com/"),
            ("INSURA_VOICE_OUTPUT", "Yes"),
            ("INSURA_VOICE_INPUT", "off"),
            ("INSURA_DOCUMENT_UPLOAD", "0"),
            ("INSURA_DOWNLOAD_DIR", "/tmp/insura"),
            ("INSURA_SPEECH_COMMAND", "espeak-ng -s 150"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_WHITELIST", "alice, bob ,,"),
        ])
        .unwrap();
        assert_eq!(config.api_url, "https://insura.example.com");
        assert_eq!(
            config.capabilities,
            Capabilities {
                voice_input: false,
                voice_output: true,
                document_upload: false,
            }
        );
        assert_eq!(config.download_dir, PathBuf::from("/tmp/insura"));
        assert_eq!(config.speech_command, "espeak-ng -s 150");
        assert_eq!(config.telegram.token.as_deref(), Some("123:abc"));
        assert_eq!(config.telegram.whitelist, vec!["alice", "bob"]);
    }

    #[test]
    fn test_teloxide_token_wins() {
        let config = config(&[("TELOXIDE_TOKEN", "a"), ("TELEGRAM_BOT_TOKEN", "b")]).unwrap();
        assert_eq!(config.telegram.token.as_deref(), Some("a"));
    }

    #[test]
    fn test_blank_values_take_defaults() {
        let config = config(&[("INSURA_VOICE_OUTPUT", "  "), ("INSURA_API_URL", "")]).unwrap();
        assert!(!config.capabilities.voice_output);
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_invalid_bool_names_variable() {
        let err = config(&[("INSURA_VOICE_OUTPUT", "maybe")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidBool {
                name: "INSURA_VOICE_OUTPUT",
                value: "maybe".to_string(),
            }
        );
        assert!(err.to_string().starts_with("INSURA_VOICE_OUTPUT"));
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            config(&[("INSURA_API_URL", "ftp://files")]),
            Err(ConfigError::InvalidUrl { .. })
        ));
        let mut config = config(&[]).unwrap();
        assert!(config.set_api_url("nonsense".to_string()).is_err());
        config.set_api_url("http://localhost:9000/".to_string()).unwrap();
        assert_eq!(config.api_url, "http://localhost:9000");
    }
}
