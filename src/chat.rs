use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Delimiter the API uses for comma-joined choice lists.
pub const OPTION_DELIMITER: &str = ", ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// A recorded clip kept in memory for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRef {
    pub id: Uuid,
    pub mime_type: String,
    pub bytes: Arc<Vec<u8>>,
}

impl AudioRef {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mime_type: mime_type.into(),
            bytes: Arc::new(bytes),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: Sender,
    pub text: String,
    pub time: String,
    #[serde(skip)]
    pub audio: Option<AudioRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<String>,
}

impl ChatMessage {
    pub fn bot(text: impl Into<String>) -> Self {
        Self::new(Sender::Bot, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    pub fn voice(audio: AudioRef, elapsed_secs: u64) -> Self {
        Self {
            audio: Some(audio),
            audio_duration: Some(format_duration(elapsed_secs)),
            ..Self::user("Voice Message")
        }
    }

    fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
            time: format_time(&Local::now()),
            audio: None,
            audio_duration: None,
        }
    }

    pub fn is_bot(&self) -> bool {
        self.sender == Sender::Bot
    }

    /// How a front end should present this message.
    pub fn content_kind(&self, base_url: &str) -> ContentKind {
        if self.audio.is_some() {
            return ContentKind::Voice;
        }
        let text = self.text.trim();
        if self.is_bot() {
            let pdf_prefix = format!("{}/pdf", base_url.trim_end_matches('/'));
            if text.contains(&pdf_prefix) {
                return ContentKind::Pdf;
            }
            if is_link(text) {
                return ContentKind::Link;
            }
        } else if text.starts_with('{') {
            if let Ok(serde_json::Value::Object(_)) = serde_json::from_str(text) {
                return ContentKind::ExtractedFields;
            }
        }
        ContentKind::Text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Link,
    Pdf,
    Voice,
    ExtractedFields,
}

pub fn is_link(text: &str) -> bool {
    text.starts_with("https://") || text.starts_with("http://")
}

/// Locale-style `hh:mm AM` display time.
pub fn format_time(at: &DateTime<Local>) -> String {
    at.format("%I:%M %p").to_string()
}

/// `m:ss` for a whole number of seconds.
pub fn format_duration(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// `policy_number` -> `Policy Number`.
pub fn field_label(field: &str) -> String {
    field
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits a comma-and-space joined choice list. Absent or blank means no choices.
pub fn split_options(raw: Option<&str>) -> Vec<String> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => raw
            .split(OPTION_DELIMITER)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
