use crate::api::types::{Dropdown, ExtractedInfo};
use crate::chat::ChatMessage;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionEvent {
    /// The widget was opened or closed
    VisibilityChanged(bool),

    /// A message was appended to the history
    MessageAppended(ChatMessage),

    /// Button choices offered by the last bot turn
    OptionsChanged {
        options: Vec<String>,
        document_options: Vec<String>,
    },

    /// Single-select affordance; `None` clears it
    DropdownChanged(Option<Dropdown>),

    LoadingChanged(bool),

    /// Editable key/value rows from the last extraction
    ExtractedInfoChanged(Option<ExtractedInfo>),

    Analysis(AnalysisStage),

    Recording(RecordingStatus),

    /// A generated document was written to disk
    DocumentSaved { name: String, path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStage {
    Uploading,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "secs", rename_all = "snake_case")]
pub enum RecordingStatus {
    Started,
    Tick(u64),
    Stopped(u64),
    Cancelled,
}

pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: SessionEvent) {
        // We ignore the error if there are no receivers
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
