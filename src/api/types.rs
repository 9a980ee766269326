use crate::chat::split_options;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name -> value mapping returned by the extraction endpoints, in server order.
pub type ExtractedInfo = Map<String, Value>;

pub const DEFAULT_DROPDOWN_PLACEHOLDER: &str = "Select an option";

// Request payloads

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub message: String,
    pub user_id: String,
    #[serde(default)]
    pub is_extracted_info: bool,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            user_id: user_id.into(),
            is_extracted_info: false,
        }
    }

    pub fn extracted(mut self, is_extracted_info: bool) -> Self {
        self.is_extracted_info = is_extracted_info;
        self
    }
}

/// A file body for the multipart endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl FilePart {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

// Response payloads

/// Either a comma-and-space joined string or a JSON array of strings.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Choices {
    Joined(String),
    List(Vec<String>),
}

impl Choices {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Choices::Joined(raw) => split_options(Some(&raw)),
            Choices::List(items) => items
                .into_iter()
                .filter(|s| !s.trim().is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum DropdownField {
    Object {
        options: Vec<String>,
        #[serde(default)]
        placeholder: Option<String>,
    },
    Joined(String),
    /// Any other shape; treated as no dropdown
    Other(Value),
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct Dropdown {
    pub options: Vec<String>,
    pub placeholder: String,
}

impl DropdownField {
    pub fn into_dropdown(self) -> Option<Dropdown> {
        let (options, placeholder) = match self {
            DropdownField::Object {
                options,
                placeholder,
            } => (options, placeholder),
            DropdownField::Joined(raw) => (split_options(Some(&raw)), None),
            DropdownField::Other(_) => return None,
        };
        if options.is_empty() {
            return None;
        }
        Some(Dropdown {
            options,
            placeholder: placeholder
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DROPDOWN_PLACEHOLDER.to_string()),
        })
    }
}

/// Structured reply of `POST /chat/`. Every field is optional.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct ChatReply {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub example: Option<String>,
    #[serde(default)]
    pub options: Option<Choices>,
    #[serde(default)]
    pub document_options: Option<Choices>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub review_message: Option<String>,
    #[serde(default)]
    pub review_link: Option<String>,
    #[serde(default)]
    pub pdf_link: Option<String>,
    #[serde(default)]
    pub document_name: Option<String>,
    #[serde(default)]
    pub dropdown: Option<DropdownField>,
    /// Explicit document step signalled by the server
    #[serde(default)]
    pub upload_stage: Option<String>,
}

impl ChatReply {
    /// Bot lines in display order. Empty fields are skipped.
    pub fn bot_lines(&self) -> Vec<String> {
        let document_line = self
            .document_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .map(|name| format!("Document {} is ready.", name));

        [
            self.response.clone(),
            self.link.clone(),
            self.question.clone(),
            self.example.clone(),
            self.review_message.clone(),
            self.review_link.clone(),
            self.pdf_link.clone(),
            document_line,
        ]
        .into_iter()
        .flatten()
        .filter(|line| !line.trim().is_empty())
        .collect()
    }

    pub fn options(&self) -> Vec<String> {
        self.options.clone().map(Choices::into_vec).unwrap_or_default()
    }

    pub fn document_options(&self) -> Vec<String> {
        self.document_options
            .clone()
            .map(Choices::into_vec)
            .unwrap_or_default()
    }

    pub fn dropdown(&self) -> Option<Dropdown> {
        self.dropdown.clone().and_then(DropdownField::into_dropdown)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct UploadReply {
    #[serde(default, alias = "filePath")]
    pub file_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TranscribeReply {
    #[serde(default)]
    pub transcript: Option<String>,
}

/// Error body some endpoints return alongside a failure status.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<Value>,
}

impl ErrorBody {
    pub fn into_message(self) -> Option<String> {
        self.message.or_else(|| match self.detail {
            Some(Value::String(s)) => Some(s),
            _ => None,
        })
    }
}
