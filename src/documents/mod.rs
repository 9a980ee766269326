//! Document-upload sequencing.
//!
//! Decides which extraction endpoint a newly attached file goes to and what
//! the bot says once extraction succeeds. When the server signals an explicit
//! [`UploadStage`] that wins; otherwise the step is inferred from the prompts
//! already in the conversation.

pub mod composite;
pub mod files;

use crate::chat::ChatMessage;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

pub use composite::{composite_horizontal, COMPOSITE_FILE_NAME};
pub use files::{read_attachment, save_document};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractEndpoint {
    Image,
    Pdf,
    Emirate,
    FrontPage,
    BackPage,
    Licence,
    Mulkiya,
}

impl ExtractEndpoint {
    pub fn path(self) -> &'static str {
        match self {
            ExtractEndpoint::Image => "/extract-image/",
            ExtractEndpoint::Pdf => "/extract-pdf/",
            ExtractEndpoint::Emirate => "/extract-emirate/",
            ExtractEndpoint::FrontPage => "/extract-front-page-emirate/",
            ExtractEndpoint::BackPage => "/extract-back-page-emirate/",
            ExtractEndpoint::Licence => "/extract-licence/",
            ExtractEndpoint::Mulkiya => "/extract-mulkiya/",
        }
    }

    /// The document step this endpoint completes, if any.
    pub fn document_kind(self) -> Option<DocumentKind> {
        match self {
            ExtractEndpoint::FrontPage => Some(DocumentKind::FrontPage),
            ExtractEndpoint::BackPage => Some(DocumentKind::BackPage),
            ExtractEndpoint::Licence => Some(DocumentKind::DrivingLicence),
            ExtractEndpoint::Mulkiya => Some(DocumentKind::Mulkiya),
            ExtractEndpoint::Image | ExtractEndpoint::Pdf | ExtractEndpoint::Emirate => None,
        }
    }
}

impl fmt::Display for ExtractEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl FromStr for ExtractEndpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(ExtractEndpoint::Image),
            "pdf" => Ok(ExtractEndpoint::Pdf),
            "emirate" | "emirates" | "id" => Ok(ExtractEndpoint::Emirate),
            "front" | "front_page" => Ok(ExtractEndpoint::FrontPage),
            "back" | "back_page" => Ok(ExtractEndpoint::BackPage),
            "licence" | "license" | "driving_licence" => Ok(ExtractEndpoint::Licence),
            "mulkiya" => Ok(ExtractEndpoint::Mulkiya),
            other => Err(format!("unknown document kind `{}`", other)),
        }
    }
}

/// The four documents the assistant asks for during a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    FrontPage,
    DrivingLicence,
    Mulkiya,
    BackPage,
}

impl DocumentKind {
    /// Order used when matching the most recent prompt and when scanning history.
    const MATCH_ORDER: [DocumentKind; 4] = [
        DocumentKind::FrontPage,
        DocumentKind::DrivingLicence,
        DocumentKind::Mulkiya,
        DocumentKind::BackPage,
    ];

    /// Order used to pick the next document to ask for.
    const NEXT_STEP_ORDER: [DocumentKind; 4] = [
        DocumentKind::DrivingLicence,
        DocumentKind::FrontPage,
        DocumentKind::Mulkiya,
        DocumentKind::BackPage,
    ];

    /// Prompts the assistant uses to ask for this document.
    pub fn request_phrases(self) -> &'static [&'static str] {
        match self {
            DocumentKind::FrontPage => &["Please Upload Front Page of Your Document"],
            DocumentKind::DrivingLicence => &[
                "Please Upload Your Driving license",
                "Let's move back to Please Upload Your Driving license",
                "Thank you, Please upload your driving license",
            ],
            DocumentKind::Mulkiya => &[
                "Please Upload Mulkiya",
                "Let's Move back to Please Upload Mulkiya",
                "move on to: Please Upload Mulkiya",
            ],
            DocumentKind::BackPage => &["Please Upload Back Page of Your Document"],
        }
    }

    /// Canonical prompt, used when composing a next-step hint.
    pub fn request_prompt(self) -> &'static str {
        self.request_phrases()[0]
    }

    pub fn confirmation(self) -> &'static str {
        match self {
            DocumentKind::FrontPage => "Thank you for uploading the Front Page",
            DocumentKind::DrivingLicence => "Thank you for uploading the Driving license",
            DocumentKind::Mulkiya => "Thank you for uploading the Mulkiya",
            DocumentKind::BackPage => "Thank you for uploading the Back Page",
        }
    }

    pub fn endpoint(self) -> ExtractEndpoint {
        match self {
            DocumentKind::FrontPage => ExtractEndpoint::FrontPage,
            DocumentKind::DrivingLicence => ExtractEndpoint::Licence,
            DocumentKind::Mulkiya => ExtractEndpoint::Mulkiya,
            DocumentKind::BackPage => ExtractEndpoint::BackPage,
        }
    }

    fn is_requested_in(self, text: &str) -> bool {
        self.request_phrases().iter().any(|p| text.contains(p))
    }

    fn is_completed_in(self, text: &str) -> bool {
        text.contains(self.confirmation())
    }
}

/// Explicit document step carried in session state, set from the
/// `upload_stage` field of a chat reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStage {
    Awaiting(DocumentKind),
    Complete,
}

impl UploadStage {
    /// Endpoint for the next upload; `None` once the flow is complete.
    pub fn endpoint(self) -> Option<ExtractEndpoint> {
        match self {
            UploadStage::Awaiting(kind) => Some(kind.endpoint()),
            UploadStage::Complete => None,
        }
    }
}

impl FromStr for UploadStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stage = match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "front_page" => UploadStage::Awaiting(DocumentKind::FrontPage),
            "driving_licence" | "driving_license" | "licence" | "license" => {
                UploadStage::Awaiting(DocumentKind::DrivingLicence)
            }
            "mulkiya" => UploadStage::Awaiting(DocumentKind::Mulkiya),
            "back_page" => UploadStage::Awaiting(DocumentKind::BackPage),
            "complete" | "done" => UploadStage::Complete,
            other => return Err(format!("unknown upload stage `{}`", other)),
        };
        Ok(stage)
    }
}

/// Request/completion flags of each document over the bot side of a history.
#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    requested: [bool; 4],
    completed: [bool; 4],
}

impl Progress {
    fn scan(history: &[ChatMessage]) -> Self {
        let mut progress = Progress::default();
        for msg in history.iter().filter(|m| m.is_bot()) {
            for (i, kind) in DocumentKind::MATCH_ORDER.iter().enumerate() {
                progress.requested[i] |= kind.is_requested_in(&msg.text);
                progress.completed[i] |= kind.is_completed_in(&msg.text);
            }
        }
        progress
    }

    fn index(kind: DocumentKind) -> usize {
        DocumentKind::MATCH_ORDER
            .iter()
            .position(|k| *k == kind)
            .unwrap_or_default()
    }

    fn requested(&self, kind: DocumentKind) -> bool {
        self.requested[Self::index(kind)]
    }

    fn completed(&self, kind: DocumentKind) -> bool {
        self.completed[Self::index(kind)]
    }

    fn outstanding(&self, kind: DocumentKind) -> bool {
        self.requested(kind) && !self.completed(kind)
    }

    fn untouched(&self, kind: DocumentKind) -> bool {
        !self.requested(kind) && !self.completed(kind)
    }
}

/// Picks the extraction endpoint from the conversation so far.
///
/// The most recent bot message wins when it asks for a document. Otherwise the
/// first document that was asked for but never confirmed is used, and if
/// nothing is outstanding the generic ID extraction applies.
pub fn infer_endpoint(history: &[ChatMessage]) -> ExtractEndpoint {
    if let Some(last_bot) = history.iter().rev().find(|m| m.is_bot()) {
        if let Some(kind) = DocumentKind::MATCH_ORDER
            .into_iter()
            .find(|k| k.is_requested_in(&last_bot.text))
        {
            return kind.endpoint();
        }
    }

    let progress = Progress::scan(history);
    DocumentKind::MATCH_ORDER
        .into_iter()
        .find(|k| progress.outstanding(*k))
        .map(DocumentKind::endpoint)
        .unwrap_or(ExtractEndpoint::Emirate)
}

/// Chooses the endpoint: a forced one, then the explicit stage, then inference.
pub fn select_endpoint(
    forced: Option<ExtractEndpoint>,
    stage: Option<UploadStage>,
    history: &[ChatMessage],
) -> ExtractEndpoint {
    forced
        .or_else(|| stage.and_then(UploadStage::endpoint))
        .unwrap_or_else(|| infer_endpoint(history))
}

/// Bot line shown after a successful extraction.
///
/// With an explicit stage the server drives what comes next, so only the
/// confirmation is returned. Without one, a hint for the next document that
/// has been neither requested nor confirmed is appended.
pub fn confirmation_message(
    endpoint: ExtractEndpoint,
    history: &[ChatMessage],
    explicit_stage: bool,
) -> String {
    let uploaded = endpoint.document_kind();
    let confirmation = uploaded
        .map(DocumentKind::confirmation)
        .unwrap_or("Thank you for uploading the document.");

    if explicit_stage {
        return confirmation.to_string();
    }

    if uploaded == Some(DocumentKind::BackPage) {
        return format!("{} Your document processing is now complete.", confirmation);
    }

    let progress = Progress::scan(history);
    let next = DocumentKind::NEXT_STEP_ORDER
        .into_iter()
        .filter(|k| Some(*k) != uploaded)
        .find(|k| progress.untouched(*k));

    match next {
        Some(kind) => format!(
            "{} Now, let's move on to: {}",
            confirmation,
            kind.request_prompt()
        ),
        None => confirmation.to_string(),
    }
}
