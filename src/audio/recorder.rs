use crate::bus::{EventBus, RecordingStatus, SessionEvent};
use async_trait::async_trait;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// Container formats tried in order; the first one the device supports wins.
pub const PREFERRED_MIME_TYPES: [&str; 4] = ["audio/ogg", "audio/webm", "audio/mp4", "audio/aac"];

/// Clips shorter than this are discarded without being sent.
pub const MIN_RECORDING_SECS: u64 = 1;

/// Bound on how long a finished stream may take to flush its last bytes.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Display text of each variant is the bot line shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecorderError {
    #[error("Microphone access denied. Please allow microphone access in your system settings.")]
    PermissionDenied,
    #[error("No microphone found. Please ensure a microphone is connected.")]
    NoDevice,
    #[error("Voice recording requires a secure connection (HTTPS). Please connect to the assistant over HTTPS.")]
    InsecureContext,
    #[error("Audio recording is not supported on this system. Please type your message instead.")]
    Unsupported,
    #[error("No compatible audio format is available for recording.")]
    NoSupportedFormat,
    #[error("No audio recorded. Please try again.")]
    NothingRecorded,
    #[error("A recording is already in progress.")]
    AlreadyRecording,
    #[error("No recording is in progress.")]
    NotRecording,
    #[error("Failed to access microphone. Please try again.")]
    Device(String),
}

/// Source of microphone audio.
#[async_trait]
pub trait AudioDevice: Send + Sync {
    /// Whether any capture backend exists at all.
    fn recorder_available(&self) -> bool;

    async fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Acquires the microphone and starts producing encoded bytes.
    async fn open(&self, mime_type: &str) -> Result<Box<dyn CaptureStream>, RecorderError>;
}

/// A live capture. Chunks are encoded bytes in the chosen container.
#[async_trait]
pub trait CaptureStream: Send {
    /// Next chunk, or `None` once the stream has ended.
    async fn next_chunk(&mut self) -> Option<Vec<u8>>;

    /// Asks the encoder to flush and end the stream.
    async fn finish(&mut self);

    /// Releases the microphone. Must be idempotent.
    fn release(&mut self);
}

/// A completed clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub duration_secs: u64,
}

impl Recording {
    /// `audio/ogg;codecs=opus` -> `ogg`
    pub fn extension(&self) -> &str {
        self.mime_type
            .split(';')
            .next()
            .and_then(|essence| essence.split('/').nth(1))
            .map(str::trim)
            .filter(|subtype| !subtype.is_empty())
            .unwrap_or("bin")
    }

    pub fn file_name(&self) -> String {
        format!("voice_message.{}", self.extension())
    }
}

enum StopMode {
    Finish,
    Discard,
}

enum PumpEvent {
    Control(StopMode),
    Chunk(Option<Vec<u8>>),
}

struct ActiveRecording {
    mime_type: String,
    chunks: Arc<Mutex<Vec<u8>>>,
    control: oneshot::Sender<StopMode>,
    pump: JoinHandle<()>,
    ticker: JoinHandle<()>,
}

/// Releases the device however the pump task ends.
struct Released(Box<dyn CaptureStream>);

impl Deref for Released {
    type Target = Box<dyn CaptureStream>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Released {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Drop for Released {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Microphone state machine: idle -> recording -> stopped or cancelled.
pub struct Recorder {
    device: Arc<dyn AudioDevice>,
    bus: Arc<EventBus>,
    elapsed: Arc<AtomicU64>,
    active: Option<ActiveRecording>,
}

impl Recorder {
    pub fn new(device: Arc<dyn AudioDevice>, bus: Arc<EventBus>) -> Self {
        Self {
            device,
            bus,
            elapsed: Arc::new(AtomicU64::new(0)),
            active: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed.load(Ordering::SeqCst)
    }

    async fn select_mime_type(&self) -> Option<&'static str> {
        for mime in PREFERRED_MIME_TYPES {
            if self.device.is_type_supported(mime).await {
                return Some(mime);
            }
        }
        None
    }

    pub async fn start(&mut self, secure_context: bool) -> Result<(), RecorderError> {
        if self.active.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }
        if !secure_context {
            return Err(RecorderError::InsecureContext);
        }
        if !self.device.recorder_available() {
            return Err(RecorderError::Unsupported);
        }
        let mime_type = self
            .select_mime_type()
            .await
            .ok_or(RecorderError::NoSupportedFormat)?;

        let stream = self.device.open(mime_type).await?;
        info!("recording started ({})", mime_type);

        self.elapsed.store(0, Ordering::SeqCst);
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let (control, control_rx) = oneshot::channel();
        let pump = tokio::spawn(pump(Released(stream), chunks.clone(), control_rx));
        let ticker = tokio::spawn(tick(self.elapsed.clone(), self.bus.clone()));

        self.active = Some(ActiveRecording {
            mime_type: mime_type.to_string(),
            chunks,
            control,
            pump,
            ticker,
        });
        self.bus
            .publish(SessionEvent::Recording(RecordingStatus::Started));
        Ok(())
    }

    /// Ends the capture and hands back the clip. Empty or sub-second captures
    /// come back as [`RecorderError::NothingRecorded`].
    pub async fn stop(&mut self) -> Result<Recording, RecorderError> {
        let active = self.active.take().ok_or(RecorderError::NotRecording)?;
        active.ticker.abort();
        let _ = active.control.send(StopMode::Finish);
        if let Err(e) = active.pump.await {
            warn!("capture task failed: {}", e);
        }

        let duration_secs = self.elapsed.swap(0, Ordering::SeqCst);
        let bytes = match active.chunks.lock() {
            Ok(mut chunks) => std::mem::take(&mut *chunks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        self.bus
            .publish(SessionEvent::Recording(RecordingStatus::Stopped(duration_secs)));
        info!("recording stopped: {}s, {} bytes", duration_secs, bytes.len());

        if bytes.is_empty() || duration_secs < MIN_RECORDING_SECS {
            return Err(RecorderError::NothingRecorded);
        }
        Ok(Recording {
            mime_type: active.mime_type,
            bytes,
            duration_secs,
        })
    }

    /// Discards the capture. Returns false if nothing was recording.
    pub async fn cancel(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        active.ticker.abort();
        let _ = active.control.send(StopMode::Discard);
        if let Err(e) = active.pump.await {
            warn!("capture task failed: {}", e);
        }
        self.elapsed.store(0, Ordering::SeqCst);
        self.bus
            .publish(SessionEvent::Recording(RecordingStatus::Cancelled));
        info!("recording cancelled");
        true
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.ticker.abort();
            let _ = active.control.send(StopMode::Discard);
        }
    }
}

async fn pump(
    mut stream: Released,
    chunks: Arc<Mutex<Vec<u8>>>,
    mut control: oneshot::Receiver<StopMode>,
) {
    let append = |chunk: Vec<u8>| {
        if let Ok(mut buf) = chunks.lock() {
            buf.extend_from_slice(&chunk);
        }
    };

    let mode = loop {
        let event = tokio::select! {
            mode = &mut control => PumpEvent::Control(mode.unwrap_or(StopMode::Discard)),
            chunk = stream.next_chunk() => PumpEvent::Chunk(chunk),
        };
        match event {
            PumpEvent::Control(mode) => break mode,
            PumpEvent::Chunk(Some(chunk)) => append(chunk),
            PumpEvent::Chunk(None) => {
                debug!("capture stream ended before stop");
                break (&mut control).await.unwrap_or(StopMode::Discard);
            }
        }
    };

    if let StopMode::Finish = mode {
        stream.finish().await;
        let drained = time::timeout(DRAIN_TIMEOUT, async {
            while let Some(chunk) = stream.next_chunk().await {
                append(chunk);
            }
        })
        .await;
        if drained.is_err() {
            warn!("capture stream did not end within {:?}", DRAIN_TIMEOUT);
        }
    }
}

async fn tick(elapsed: Arc<AtomicU64>, bus: Arc<EventBus>) {
    let period = Duration::from_secs(1);
    let mut interval = time::interval_at(Instant::now() + period, period);
    loop {
        interval.tick().await;
        let secs = elapsed.fetch_add(1, Ordering::SeqCst) + 1;
        bus.publish(SessionEvent::Recording(RecordingStatus::Tick(secs)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockDevice;

    fn recorder(device: &MockDevice) -> (Recorder, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        (Recorder::new(Arc::new(device.clone()), bus.clone()), bus)
    }

    // ------------------------------------------------------------------
    // Preconditions
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_insecure_context_rejected_before_device() {
        let device = MockDevice::new();
        let (mut rec, _) = recorder(&device);
        assert_eq!(rec.start(false).await, Err(RecorderError::InsecureContext));
        assert_eq!(device.opened(), 0);
        assert!(!rec.is_recording());
    }

    #[tokio::test]
    async fn test_missing_recorder() {
        let device = MockDevice::new().unavailable();
        let (mut rec, _) = recorder(&device);
        assert_eq!(rec.start(true).await, Err(RecorderError::Unsupported));
    }

    #[tokio::test]
    async fn test_no_supported_format() {
        let device = MockDevice::new().supporting(&[]);
        let (mut rec, _) = recorder(&device);
        assert_eq!(rec.start(true).await, Err(RecorderError::NoSupportedFormat));
        assert_eq!(device.opened(), 0);
    }

    #[tokio::test]
    async fn test_preferred_format_order() {
        let device = MockDevice::new().supporting(&["audio/aac", "audio/webm"]);
        let (mut rec, _) = recorder(&device);
        rec.start(true).await.unwrap();
        assert_eq!(
            rec.active.as_ref().map(|a| a.mime_type.as_str()),
            Some("audio/webm")
        );
        rec.cancel().await;
    }

    #[tokio::test]
    async fn test_device_errors_propagate() {
        let device = MockDevice::new().failing_with(RecorderError::PermissionDenied);
        let (mut rec, _) = recorder(&device);
        let err = rec.start(true).await.unwrap_err();
        assert_eq!(err, RecorderError::PermissionDenied);
        assert!(err.to_string().contains("denied"));
        assert!(!rec.is_recording());
    }

    #[tokio::test]
    async fn test_double_start() {
        let device = MockDevice::new();
        let (mut rec, _) = recorder(&device);
        rec.start(true).await.unwrap();
        assert_eq!(rec.start(true).await, Err(RecorderError::AlreadyRecording));
        rec.cancel().await;
    }

    // ------------------------------------------------------------------
    // Stop / cancel
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_stop_returns_clip_and_releases_device() {
        let device = MockDevice::new()
            .with_chunks(vec![vec![1, 2], vec![3]])
            .with_tail(vec![vec![4]]);
        let (mut rec, bus) = recorder(&device);
        let mut rx = bus.subscribe();

        rec.start(true).await.unwrap();
        time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(rec.elapsed_secs(), 2);

        let clip = rec.stop().await.unwrap();
        assert_eq!(clip.bytes, vec![1, 2, 3, 4]);
        assert_eq!(clip.duration_secs, 2);
        assert_eq!(clip.mime_type, "audio/ogg");
        assert_eq!(clip.file_name(), "voice_message.ogg");
        assert_eq!(device.released(), 1);
        assert!(!rec.is_recording());
        assert_eq!(rec.elapsed_secs(), 0);

        let mut statuses = Vec::new();
        while let Ok(SessionEvent::Recording(status)) = rx.try_recv() {
            statuses.push(status);
        }
        assert_eq!(
            statuses,
            vec![
                RecordingStatus::Started,
                RecordingStatus::Tick(1),
                RecordingStatus::Tick(2),
                RecordingStatus::Stopped(2),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_second_clip_is_nothing_recorded() {
        let device = MockDevice::new();
        let (mut rec, _) = recorder(&device);
        rec.start(true).await.unwrap();
        time::sleep(Duration::from_millis(400)).await;
        assert_eq!(rec.stop().await, Err(RecorderError::NothingRecorded));
        assert_eq!(device.released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_clip_is_nothing_recorded() {
        let device = MockDevice::new().with_chunks(Vec::new());
        let (mut rec, _) = recorder(&device);
        rec.start(true).await.unwrap();
        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(rec.stop().await, Err(RecorderError::NothingRecorded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_and_releases() {
        let device = MockDevice::new();
        let (mut rec, bus) = recorder(&device);
        let mut rx = bus.subscribe();

        rec.start(true).await.unwrap();
        time::sleep(Duration::from_millis(3200)).await;
        assert!(rec.cancel().await);

        assert!(!rec.is_recording());
        assert_eq!(rec.elapsed_secs(), 0);
        assert_eq!(device.released(), 1);
        assert_eq!(device.finished(), 0);

        let mut last = None;
        while let Ok(SessionEvent::Recording(status)) = rx.try_recv() {
            last = Some(status);
        }
        assert_eq!(last, Some(RecordingStatus::Cancelled));

        // Timer is gone.
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(rec.elapsed_secs(), 0);
    }

    #[tokio::test]
    async fn test_stop_and_cancel_when_idle() {
        let device = MockDevice::new();
        let (mut rec, _) = recorder(&device);
        assert_eq!(rec.stop().await, Err(RecorderError::NotRecording));
        assert!(!rec.cancel().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_ending_early_keeps_bytes() {
        let device = MockDevice::new().with_chunks(vec![vec![9; 16]]).ending_early();
        let (mut rec, _) = recorder(&device);
        rec.start(true).await.unwrap();
        time::sleep(Duration::from_secs(2)).await;
        let clip = rec.stop().await.unwrap();
        assert_eq!(clip.bytes.len(), 16);
        assert_eq!(device.released(), 1);
    }

    #[test]
    fn test_recording_extension() {
        let clip = |mime: &str| Recording {
            mime_type: mime.to_string(),
            bytes: vec![1],
            duration_secs: 1,
        };
        assert_eq!(clip("audio/webm;codecs=opus").extension(), "webm");
        assert_eq!(clip("audio/mp4").file_name(), "voice_message.mp4");
        assert_eq!(clip("garbage").extension(), "bin");
    }
}
