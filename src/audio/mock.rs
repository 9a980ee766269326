//! Scriptable in-memory microphone and synthesizer.

use super::recorder::{AudioDevice, CaptureStream, RecorderError, PREFERRED_MIME_TYPES};
use super::speech::Synthesizer;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Counters {
    opened: AtomicUsize,
    finished: AtomicUsize,
    released: AtomicUsize,
}

#[derive(Clone)]
pub struct MockDevice {
    available: bool,
    supported: Vec<&'static str>,
    open_error: Option<RecorderError>,
    chunks: Vec<Vec<u8>>,
    tail: Vec<Vec<u8>>,
    ends_early: bool,
    counters: Arc<Counters>,
}

impl MockDevice {
    /// Supports every preferred type and yields one three-byte chunk.
    pub fn new() -> Self {
        Self {
            available: true,
            supported: PREFERRED_MIME_TYPES.to_vec(),
            open_error: None,
            chunks: vec![vec![1, 2, 3]],
            tail: Vec::new(),
            ends_early: false,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn supporting(mut self, types: &[&'static str]) -> Self {
        self.supported = types.to_vec();
        self
    }

    pub fn failing_with(mut self, err: RecorderError) -> Self {
        self.open_error = Some(err);
        self
    }

    /// Chunks available as soon as the stream opens.
    pub fn with_chunks(mut self, chunks: Vec<Vec<u8>>) -> Self {
        self.chunks = chunks;
        self
    }

    /// Chunks flushed by `finish`.
    pub fn with_tail(mut self, tail: Vec<Vec<u8>>) -> Self {
        self.tail = tail;
        self
    }

    /// The stream ends by itself once the initial chunks are consumed.
    pub fn ending_early(mut self) -> Self {
        self.ends_early = true;
        self
    }

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.counters.finished.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioDevice for MockDevice {
    fn recorder_available(&self) -> bool {
        self.available
    }

    async fn is_type_supported(&self, mime_type: &str) -> bool {
        self.supported.contains(&mime_type)
    }

    async fn open(&self, _mime_type: &str) -> Result<Box<dyn CaptureStream>, RecorderError> {
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStream {
            queue: self.chunks.clone().into(),
            tail: self.tail.clone(),
            ends_early: self.ends_early,
            finished: false,
            released: false,
            counters: self.counters.clone(),
        }))
    }
}

struct MockStream {
    queue: VecDeque<Vec<u8>>,
    tail: Vec<Vec<u8>>,
    ends_early: bool,
    finished: bool,
    released: bool,
    counters: Arc<Counters>,
}

#[async_trait]
impl CaptureStream for MockStream {
    async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if let Some(chunk) = self.queue.pop_front() {
            return Some(chunk);
        }
        if self.finished || self.ends_early {
            return None;
        }
        std::future::pending().await
    }

    async fn finish(&mut self) {
        self.counters.finished.fetch_add(1, Ordering::SeqCst);
        self.finished = true;
        self.queue.extend(self.tail.drain(..));
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.counters.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Synthesizer that "speaks" by sleeping, logging what started and finished.
#[derive(Clone)]
pub struct MockSynthesizer {
    duration: Duration,
    fail_on: Option<String>,
    started: Arc<Mutex<Vec<String>>>,
    completed: Arc<Mutex<Vec<String>>>,
}

impl MockSynthesizer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            fail_on: None,
            started: Arc::default(),
            completed: Arc::default(),
        }
    }

    pub fn failing_on(mut self, text: &str) -> Self {
        self.fail_on = Some(text.to_string());
        self
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn speak(&self, text: &str) -> anyhow::Result<()> {
        self.started.lock().unwrap().push(text.to_string());
        if self.fail_on.as_deref() == Some(text) {
            anyhow::bail!("synthesizer rejected {:?}", text);
        }
        tokio::time::sleep(self.duration).await;
        self.completed.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
