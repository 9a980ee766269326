//! Conversation session controller.
//!
//! A [`Session`] owns the state of one chat widget: history, name capture,
//! pending options, attachments, extracted fields and the recorder. Every
//! user action runs as its own task; starting a new action aborts the
//! previous one and bumps the session generation, so a result that arrives
//! late is never applied.

use crate::api::types::{ChatReply, ChatRequest, Dropdown, ExtractedInfo, FilePart};
use crate::api::{ApiError, Backend};
use crate::audio::recorder::MIN_RECORDING_SECS;
use crate::audio::{is_secure_origin, AudioDevice, Recorder, RecorderError, Recording, SpeechQueue};
use crate::bus::{AnalysisStage, EventBus, SessionEvent};
use crate::chat::{AudioRef, ChatMessage};
use crate::config::Capabilities;
use crate::documents::{self, ExtractEndpoint, UploadStage, COMPOSITE_FILE_NAME};
use anyhow::Context;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

pub const GREETING: &str = "Hi there! My name is Insura from Wehbe Insurance Broker, your AI insurance assistant. I will be happy to assist you with your insurance requirements.";
pub const NAME_PROMPT: &str = "Before we proceed, may I know your name?";

/// Sent once, tagged with the captured name, to start the server-side conversation.
pub const NAME_SENTINEL: &str = "Hey";

pub const GENERIC_ERROR: &str = "Sorry, something went wrong. Please try again.";
pub const UPLOAD_FAILED: &str = "File upload failed. Please try again later.";
pub const EXTRACTION_FAILED: &str = "Sorry, I couldn't process your document. Please try again.";
pub const DOCUMENTS_DISABLED: &str = "Document upload is not available in this chat.";
pub const DOWNLOAD_COMPLETED: &str = "Download completed";
pub const EXTRACTED_SUBMITTED: &str = "Document Upload successfully";
pub const TRANSCRIBE_FAILED: &str = "Failed to transcribe audio. Please try again.";
pub const NAME_UNCLEAR: &str = "I couldn't understand your name. Could you please repeat it clearly?";
pub const TRANSCRIPT_UNCLEAR: &str = "I couldn't understand that. Could you please repeat it clearly?";
pub const VOICE_FAILED: &str = "Failed to process voice message. Please try again in a quieter environment or type your message.";

const MIN_TRANSCRIPT_CHARS: usize = 2;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub capabilities: Capabilities,
    pub download_dir: PathBuf,
    /// Pause between saving a generated document and reporting it to the server.
    pub document_followup_delay: Duration,
}

impl SessionSettings {
    pub fn new(capabilities: Capabilities, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            capabilities,
            download_dir: download_dir.into(),
            document_followup_delay: Duration::from_secs(1),
        }
    }
}

/// Something the user did that results in a server round trip.
#[derive(Debug)]
pub enum UserAction {
    /// Typed text. Sends the pending attachment instead, if there is one.
    Text(String),
    /// An option button; document options download the named document.
    Choose(String),
    /// A dropdown entry.
    Select(String),
    /// Send the (possibly edited) extracted fields back.
    SubmitExtracted,
    Voice(Recording),
    /// Files for document extraction. `endpoint` forces the extraction kind.
    Documents {
        files: Vec<FilePart>,
        endpoint: Option<ExtractEndpoint>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub open: bool,
    pub messages: Vec<ChatMessage>,
    pub user_id: String,
    pub awaiting_name: bool,
    pub options: Vec<String>,
    pub document_options: Vec<String>,
    pub dropdown: Option<Dropdown>,
    pub extracted_info: Option<ExtractedInfo>,
    pub loading: bool,
    pub attachment: Option<FilePart>,
    pub recorded_audio: Option<AudioRef>,
    pub transcript: String,
    pub upload_stage: Option<UploadStage>,
    generation: u64,
}

/// Mutable view of the state that publishes every change on the bus.
struct Turn<'a> {
    state: &'a mut SessionState,
    bus: &'a EventBus,
    speech: Option<&'a SpeechQueue>,
}

impl Turn<'_> {
    fn push(&mut self, message: ChatMessage) {
        if message.is_bot() && self.state.open {
            if let Some(speech) = self.speech {
                speech.enqueue(&message.text);
            }
        }
        self.bus.publish(SessionEvent::MessageAppended(message.clone()));
        self.state.messages.push(message);
    }

    fn bot(&mut self, text: impl Into<String>) {
        self.push(ChatMessage::bot(text));
    }

    fn user(&mut self, text: impl Into<String>) {
        self.push(ChatMessage::user(text));
    }

    fn set_loading(&mut self, loading: bool) {
        if self.state.loading != loading {
            self.state.loading = loading;
            self.bus.publish(SessionEvent::LoadingChanged(loading));
        }
    }

    fn set_options(&mut self, options: Vec<String>, document_options: Vec<String>) {
        if self.state.options == options && self.state.document_options == document_options {
            return;
        }
        self.state.options = options.clone();
        self.state.document_options = document_options.clone();
        self.bus.publish(SessionEvent::OptionsChanged {
            options,
            document_options,
        });
    }

    fn set_dropdown(&mut self, dropdown: Option<Dropdown>) {
        if self.state.dropdown != dropdown {
            self.state.dropdown = dropdown.clone();
            self.bus.publish(SessionEvent::DropdownChanged(dropdown));
        }
    }

    fn set_extracted(&mut self, info: Option<ExtractedInfo>) {
        self.state.extracted_info = info.clone();
        self.bus.publish(SessionEvent::ExtractedInfoChanged(info));
    }

    fn analysis(&mut self, stage: AnalysisStage) {
        self.bus.publish(SessionEvent::Analysis(stage));
    }

    fn capture_name(&mut self, name: &str) {
        info!("captured user name");
        self.state.user_id = name.to_string();
        self.state.awaiting_name = false;
    }

    fn clear_recording(&mut self) {
        self.state.recorded_audio = None;
        self.state.transcript.clear();
    }

    /// Choices never outlive the turn that offered them.
    fn begin_request(&mut self) {
        self.set_options(Vec::new(), Vec::new());
        self.set_loading(true);
    }

    fn apply_reply(&mut self, reply: &ChatReply) {
        for line in reply.bot_lines() {
            self.bot(line);
        }

        let options = reply.options();
        let document_options = reply.document_options();
        for label in options.iter().filter(|o| document_options.contains(o)) {
            warn!("`{}` offered as both option and document option", label);
        }
        self.set_options(options, document_options);
        self.set_dropdown(reply.dropdown());

        self.state.upload_stage = match reply.upload_stage.as_deref() {
            Some(raw) => match raw.parse::<UploadStage>() {
                Ok(stage) => Some(stage),
                Err(e) => {
                    warn!("ignoring upload stage: {}", e);
                    None
                }
            },
            None => None,
        };
    }
}

#[derive(Clone)]
pub struct Session {
    backend: Arc<dyn Backend>,
    bus: Arc<EventBus>,
    settings: Arc<SessionSettings>,
    state: Arc<Mutex<SessionState>>,
    speech: Option<SpeechQueue>,
    recorder: Option<Arc<tokio::sync::Mutex<Recorder>>>,
    inflight: Arc<Mutex<Option<AbortHandle>>>,
}

impl Session {
    pub fn new(backend: Arc<dyn Backend>, bus: Arc<EventBus>, settings: SessionSettings) -> Self {
        Self {
            backend,
            bus,
            settings: Arc::new(settings),
            state: Arc::new(Mutex::new(SessionState::default())),
            speech: None,
            recorder: None,
            inflight: Arc::new(Mutex::new(None)),
        }
    }

    /// Reads bot messages aloud when voice output is enabled.
    pub fn with_speech(mut self, speech: SpeechQueue) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Enables microphone capture when voice input is enabled.
    pub fn with_audio_device(mut self, device: Arc<dyn AudioDevice>) -> Self {
        let recorder = Recorder::new(device, self.bus.clone());
        self.recorder = Some(Arc::new(tokio::sync::Mutex::new(recorder)));
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        self.settings.capabilities
    }

    pub fn base_url(&self) -> &str {
        self.backend.base_url()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.lock_state().clone()
    }

    pub fn is_open(&self) -> bool {
        self.lock_state().open
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn speech(&self) -> Option<&SpeechQueue> {
        self.speech
            .as_ref()
            .filter(|_| self.settings.capabilities.voice_output)
    }

    fn recorder(&self) -> Option<&Arc<tokio::sync::Mutex<Recorder>>> {
        self.recorder
            .as_ref()
            .filter(|_| self.settings.capabilities.voice_input)
    }

    fn with_turn<R>(&self, f: impl FnOnce(&mut Turn<'_>) -> R) -> R {
        let mut state = self.lock_state();
        let mut turn = Turn {
            state: &mut *state,
            bus: &self.bus,
            speech: self.speech(),
        };
        f(&mut turn)
    }

    /// Runs `f` only if no newer action has started since `generation`.
    fn with_current<R>(&self, generation: u64, f: impl FnOnce(&mut Turn<'_>) -> R) -> Option<R> {
        let mut state = self.lock_state();
        if state.generation != generation {
            debug!(
                "dropping result of action {} (latest is {})",
                generation, state.generation
            );
            return None;
        }
        let mut turn = Turn {
            state: &mut *state,
            bus: &self.bus,
            speech: self.speech(),
        };
        Some(f(&mut turn))
    }

    // ------------------------------------------------------------------
    // Visibility
    // ------------------------------------------------------------------

    /// Opens or closes the widget and returns the new visibility. The first
    /// open of an empty conversation shows the greeting and asks for a name.
    /// Closing keeps all state but silences speech.
    pub fn toggle(&self) -> bool {
        let open = self.with_turn(|t| {
            t.state.open = !t.state.open;
            t.bus
                .publish(SessionEvent::VisibilityChanged(t.state.open));
            if t.state.open && t.state.messages.is_empty() {
                t.bot(GREETING);
                t.bot(NAME_PROMPT);
                t.state.awaiting_name = true;
            }
            t.state.open
        });
        if !open {
            self.stop_speaking();
        }
        open
    }

    pub fn open(&self) {
        if !self.is_open() {
            self.toggle();
        }
    }

    pub fn close(&self) {
        if self.is_open() {
            self.toggle();
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speech.as_ref().is_some_and(SpeechQueue::is_speaking)
    }

    pub fn stop_speaking(&self) {
        if let Some(speech) = &self.speech {
            speech.stop();
        }
    }

    // ------------------------------------------------------------------
    // Attachments and extracted fields
    // ------------------------------------------------------------------

    /// Holds `file` until the next text send. Replaces any earlier attachment.
    pub fn attach_file(&self, file: FilePart) -> bool {
        if !self.settings.capabilities.document_upload {
            return false;
        }
        debug!("attached {}", file.file_name);
        self.lock_state().attachment = Some(file);
        true
    }

    pub fn remove_attachment(&self) -> Option<FilePart> {
        self.lock_state().attachment.take()
    }

    /// Changes one extracted field before submission. Unknown fields are refused.
    pub fn edit_extracted_field(&self, field: &str, value: &str) -> bool {
        self.with_turn(|t| {
            let Some(mut info) = t.state.extracted_info.clone() else {
                return false;
            };
            match info.get_mut(field) {
                Some(slot) => *slot = Value::String(value.to_string()),
                None => return false,
            }
            t.set_extracted(Some(info));
            true
        })
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    /// Starts `action`, superseding whatever action is still pending. Returns
    /// `None` when there is nothing to send.
    pub fn submit(&self, action: UserAction) -> Option<JoinHandle<()>> {
        if !self.accepts(&action) {
            return None;
        }

        let generation = {
            let mut state = self.lock_state();
            state.generation += 1;
            state.generation
        };
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = inflight.take() {
            previous.abort();
        }
        self.stop_speaking();
        // An aborted action may have left the flag set.
        self.with_turn(|t| t.set_loading(false));

        let session = self.clone();
        let handle = tokio::spawn(async move { session.run(action, generation).await });
        *inflight = Some(handle.abort_handle());
        Some(handle)
    }

    fn accepts(&self, action: &UserAction) -> bool {
        match action {
            UserAction::Text(text) => {
                let state = self.lock_state();
                !text.trim().is_empty() || (state.attachment.is_some() && !state.awaiting_name)
            }
            UserAction::Choose(label) | UserAction::Select(label) => !label.trim().is_empty(),
            UserAction::SubmitExtracted => self.lock_state().extracted_info.is_some(),
            UserAction::Voice(clip) => {
                if clip.bytes.is_empty() || clip.duration_secs < MIN_RECORDING_SECS {
                    warn!(
                        "discarding voice clip ({} bytes, {}s)",
                        clip.bytes.len(),
                        clip.duration_secs
                    );
                    self.with_turn(|t| t.bot(RecorderError::NothingRecorded.to_string()));
                    return false;
                }
                true
            }
            UserAction::Documents { files, .. } => {
                if !self.settings.capabilities.document_upload {
                    self.with_turn(|t| t.bot(DOCUMENTS_DISABLED));
                    return false;
                }
                !files.is_empty()
            }
        }
    }

    async fn run(&self, action: UserAction, generation: u64) {
        match action {
            UserAction::Text(text) => self.send_text(text, generation).await,
            UserAction::Choose(label) => self.choose(label, generation).await,
            UserAction::Select(value) => self.select(value, generation).await,
            UserAction::SubmitExtracted => self.submit_extracted(generation).await,
            UserAction::Voice(clip) => self.send_voice(clip, generation).await,
            UserAction::Documents { files, endpoint } => {
                self.extract_documents(files, endpoint, generation).await
            }
        }
    }

    /// One `/chat/` round trip. Returns whether a reply was applied.
    async fn exchange(&self, request: ChatRequest, generation: u64) -> bool {
        if self.with_current(generation, |t| t.begin_request()).is_none() {
            return false;
        }
        let result = self.backend.chat(&request).await;
        self.with_current(generation, |t| {
            let applied = match result {
                Ok(reply) => {
                    t.apply_reply(&reply);
                    true
                }
                Err(e) => {
                    error!("chat request failed: {}", e);
                    t.bot(GENERIC_ERROR);
                    false
                }
            };
            t.set_loading(false);
            applied
        })
        .unwrap_or(false)
    }

    async fn send_text(&self, text: String, generation: u64) {
        enum Plan {
            Chat(ChatRequest),
            Upload(FilePart, String),
        }

        let plan = self
            .with_current(generation, |t| {
                if t.state.awaiting_name {
                    // The name is kept exactly as typed.
                    if text.trim().is_empty() {
                        return None;
                    }
                    t.user(text.as_str());
                    t.capture_name(&text);
                    return Some(Plan::Chat(ChatRequest::new(NAME_SENTINEL, text.as_str())));
                }
                if let Some(file) = t.state.attachment.take() {
                    t.user(file.file_name.as_str());
                    return Some(Plan::Upload(file, t.state.user_id.clone()));
                }
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                t.user(text);
                Some(Plan::Chat(ChatRequest::new(text, t.state.user_id.as_str())))
            })
            .flatten();

        match plan {
            None => {}
            Some(Plan::Chat(request)) => {
                self.exchange(request, generation).await;
            }
            Some(Plan::Upload(file, user_id)) => {
                if self.with_current(generation, |t| t.begin_request()).is_none() {
                    return;
                }
                let file_name = file.file_name.clone();
                match self.backend.upload(file).await {
                    Ok(path) => {
                        info!("uploaded {} as {}", file_name, path);
                        self.exchange(ChatRequest::new(path, user_id), generation).await;
                    }
                    Err(e) => {
                        error!("upload of {} failed: {}", file_name, e);
                        self.with_current(generation, |t| {
                            t.bot(UPLOAD_FAILED);
                            t.set_loading(false);
                        });
                    }
                }
            }
        }
    }

    async fn choose(&self, label: String, generation: u64) {
        let Some(is_document) = self.with_current(generation, |t| {
            t.state.document_options.contains(&label)
        }) else {
            return;
        };
        if is_document {
            self.download_document(label, generation).await;
            return;
        }
        let request = self.with_current(generation, |t| {
            t.user(label.as_str());
            ChatRequest::new(label.as_str(), t.state.user_id.as_str())
        });
        if let Some(request) = request {
            self.exchange(request, generation).await;
        }
    }

    async fn select(&self, value: String, generation: u64) {
        let request = self.with_current(generation, |t| {
            t.set_dropdown(None);
            t.user(value.as_str());
            ChatRequest::new(value.as_str(), t.state.user_id.as_str())
        });
        if let Some(request) = request {
            self.exchange(request, generation).await;
        }
    }

    /// Saves `/pdf/{name}` to the download directory, then tells the server
    /// the download finished.
    async fn download_document(&self, name: String, generation: u64) {
        if self.with_current(generation, |t| t.begin_request()).is_none() {
            return;
        }

        let saved = match self.backend.fetch_document(&name).await {
            Ok(bytes) => documents::save_document(&self.settings.download_dir, &name, &bytes)
                .await
                .map_err(ApiError::from),
            Err(e) => Err(e),
        };

        let user_id = self
            .with_current(generation, |t| match saved {
                Ok(path) => {
                    info!("saved {} to {}", name, path.display());
                    t.bus.publish(SessionEvent::DocumentSaved {
                        name: name.clone(),
                        path,
                    });
                    t.user(DOWNLOAD_COMPLETED);
                    Some(t.state.user_id.clone())
                }
                Err(e) => {
                    error!("download of {} failed: {}", name, e);
                    t.bot(GENERIC_ERROR);
                    t.set_loading(false);
                    None
                }
            })
            .flatten();
        let Some(user_id) = user_id else {
            return;
        };

        tokio::time::sleep(self.settings.document_followup_delay).await;
        self.exchange(ChatRequest::new(DOWNLOAD_COMPLETED, user_id), generation)
            .await;
    }

    async fn submit_extracted(&self, generation: u64) {
        let prepared = self
            .with_current(generation, |t| {
                let info = t.state.extracted_info.clone()?;
                t.user(EXTRACTED_SUBMITTED);
                Some((info, t.state.user_id.clone()))
            })
            .flatten();
        let Some((info, user_id)) = prepared else {
            return;
        };

        let message = match serde_json::to_string(&info) {
            Ok(message) => message,
            Err(e) => {
                error!("could not encode extracted fields: {}", e);
                self.with_current(generation, |t| t.bot(GENERIC_ERROR));
                return;
            }
        };

        let request = ChatRequest::new(message, user_id).extracted(true);
        if self.exchange(request, generation).await {
            self.with_current(generation, |t| t.set_extracted(None));
        }
    }

    async fn send_voice(&self, clip: Recording, generation: u64) {
        let audio = AudioRef::new(clip.mime_type.clone(), clip.bytes.clone());
        let started = self.with_current(generation, |t| {
            t.state.recorded_audio = Some(audio.clone());
            t.state.transcript.clear();
            t.push(ChatMessage::voice(audio, clip.duration_secs));
            t.begin_request();
        });
        if started.is_none() {
            return;
        }

        let file = FilePart::new(clip.file_name(), clip.mime_type, clip.bytes);
        let transcript = self.backend.transcribe(file).await;

        let request = self
            .with_current(generation, |t| {
                let request = match transcript {
                    Ok(raw) => {
                        let text = raw.trim().to_string();
                        if text.chars().count() < MIN_TRANSCRIPT_CHARS {
                            warn!("transcript too short: {:?}", text);
                            t.bot(if t.state.awaiting_name {
                                NAME_UNCLEAR
                            } else {
                                TRANSCRIPT_UNCLEAR
                            });
                            None
                        } else if t.state.awaiting_name {
                            t.state.transcript = text.clone();
                            t.capture_name(&text);
                            Some(ChatRequest::new(NAME_SENTINEL, text))
                        } else {
                            t.state.transcript = text.clone();
                            Some(ChatRequest::new(text, t.state.user_id.as_str()))
                        }
                    }
                    Err(ApiError::MissingField(field)) => {
                        warn!("transcription reply had no {}", field);
                        t.bot(TRANSCRIBE_FAILED);
                        None
                    }
                    Err(e) => {
                        error!("voice message failed: {}", e);
                        t.bot(VOICE_FAILED);
                        None
                    }
                };
                if request.is_none() {
                    t.clear_recording();
                    t.set_loading(false);
                }
                request
            })
            .flatten();

        if let Some(request) = request {
            self.exchange(request, generation).await;
            self.with_current(generation, |t| t.clear_recording());
        }
    }

    async fn extract_documents(
        &self,
        files: Vec<FilePart>,
        forced: Option<ExtractEndpoint>,
        generation: u64,
    ) {
        let prepared = self.with_current(generation, |t| {
            let stage = t.state.upload_stage;
            let endpoint = documents::select_endpoint(forced, stage, &t.state.messages);
            let explicit = forced.is_none() && stage.and_then(UploadStage::endpoint).is_some();
            let names = files
                .iter()
                .map(|f| f.file_name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            t.user(names);
            t.set_loading(true);
            t.analysis(AnalysisStage::Uploading);
            (endpoint, explicit, t.state.user_id.clone())
        });
        let Some((endpoint, explicit, user_id)) = prepared else {
            return;
        };
        info!(endpoint = %endpoint, files = files.len(), "extracting document");

        let result = self.extract_files(endpoint, files, &user_id).await;

        self.with_current(generation, |t| {
            match result {
                Ok(info) => {
                    let message = documents::confirmation_message(endpoint, &t.state.messages, explicit);
                    t.set_extracted(Some(info));
                    if explicit {
                        t.state.upload_stage = None;
                    }
                    t.bot(message);
                    t.analysis(AnalysisStage::Complete);
                }
                Err(e) => {
                    error!("extraction via {} failed: {:#}", endpoint, e);
                    let line = e
                        .downcast_ref::<ApiError>()
                        .and_then(ApiError::server_message)
                        .unwrap_or(EXTRACTION_FAILED)
                        .to_string();
                    t.bot(line);
                    t.analysis(AnalysisStage::Error);
                }
            }
            t.set_loading(false);
        });
    }

    async fn extract_files(
        &self,
        endpoint: ExtractEndpoint,
        files: Vec<FilePart>,
        user_id: &str,
    ) -> anyhow::Result<ExtractedInfo> {
        let file = combine_files(files).await?;
        Ok(self.backend.extract(endpoint, file, user_id).await?)
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    pub async fn start_recording(&self) -> Result<(), RecorderError> {
        let result = match self.recorder() {
            Some(recorder) => {
                let secure = is_secure_origin(self.backend.base_url());
                recorder.lock().await.start(secure).await
            }
            None => Err(RecorderError::Unsupported),
        };
        match &result {
            Ok(()) => self.with_turn(|t| t.clear_recording()),
            Err(e) => {
                warn!("cannot start recording: {:?}", e);
                self.with_turn(|t| t.bot(e.to_string()));
            }
        }
        result
    }

    /// Stops the microphone and sends the clip for transcription.
    pub async fn stop_recording(&self) -> Result<JoinHandle<()>, RecorderError> {
        let Some(recorder) = self.recorder() else {
            return Err(RecorderError::Unsupported);
        };
        let clip = recorder.lock().await.stop().await;
        match clip {
            Ok(clip) => self
                .submit(UserAction::Voice(clip))
                .ok_or(RecorderError::NothingRecorded),
            Err(e) => {
                warn!("recording discarded: {:?}", e);
                self.with_turn(|t| {
                    t.clear_recording();
                    t.bot(e.to_string());
                });
                Err(e)
            }
        }
    }

    /// Discards the recording in progress. Returns false if there was none.
    pub async fn cancel_recording(&self) -> bool {
        let cancelled = match self.recorder() {
            Some(recorder) => recorder.lock().await.cancel().await,
            None => false,
        };
        self.with_turn(|t| t.clear_recording());
        cancelled
    }

    pub async fn is_recording(&self) -> bool {
        match self.recorder() {
            Some(recorder) => recorder.lock().await.is_recording(),
            None => false,
        }
    }

    pub async fn recording_secs(&self) -> u64 {
        match self.recorder() {
            Some(recorder) => recorder.lock().await.elapsed_secs(),
            None => 0,
        }
    }
}

/// One file is sent as is; several are composited side by side into one PNG.
async fn combine_files(mut files: Vec<FilePart>) -> anyhow::Result<FilePart> {
    if files.len() == 1 {
        return files.pop().context("no file selected");
    }
    let images: Vec<Vec<u8>> = files.into_iter().map(|f| f.bytes).collect();
    let png = tokio::task::spawn_blocking(move || documents::composite_horizontal(&images))
        .await
        .context("composite task failed")??;
    Ok(FilePart::new(COMPOSITE_FILE_NAME, "image/png", png))
}
