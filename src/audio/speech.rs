use crate::chat::is_link;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Turns text into audible speech. Returns when the utterance has finished.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn speak(&self, text: &str) -> anyhow::Result<()>;
}

/// Speaks through an external program, passing the text as the last argument.
/// Dropping the future kills the program.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
}

impl CommandSynthesizer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a command line such as `espeak-ng -s 160` on whitespace.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl Synthesizer for CommandSynthesizer {
    async fn speak(&self, text: &str) -> anyhow::Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await?;
        if !status.success() {
            anyhow::bail!("{} exited with {}", self.program, status);
        }
        Ok(())
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    speaking: bool,
    generation: u64,
    driver: Option<JoinHandle<()>>,
}

/// FIFO of bot lines waiting to be read aloud. At most one utterance plays at
/// a time; `stop` drops everything queued and cuts off the current one.
#[derive(Clone)]
pub struct SpeechQueue {
    synth: Arc<dyn Synthesizer>,
    state: Arc<Mutex<QueueState>>,
}

impl SpeechQueue {
    pub fn new(synth: Arc<dyn Synthesizer>) -> Self {
        Self {
            synth,
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues `text` unless it is blank or a bare link. Returns whether it was queued.
    pub fn enqueue(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() || is_link(text) {
            return false;
        }
        let mut state = self.lock();
        state.pending.push_back(text.to_string());
        if !state.speaking {
            state.speaking = true;
            let generation = state.generation;
            state.driver = Some(tokio::spawn(drive(
                self.synth.clone(),
                self.state.clone(),
                generation,
            )));
        }
        true
    }

    /// Clears the queue and cancels the utterance in progress.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.pending.clear();
        state.speaking = false;
        if let Some(driver) = state.driver.take() {
            driver.abort();
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.lock().speaking
    }
}

async fn drive(synth: Arc<dyn Synthesizer>, state: Arc<Mutex<QueueState>>, generation: u64) {
    loop {
        let next = {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            if state.generation != generation {
                return;
            }
            match state.pending.pop_front() {
                Some(text) => text,
                None => {
                    state.speaking = false;
                    state.driver = None;
                    return;
                }
            }
        };
        debug!("speaking {} chars", next.len());
        if let Err(e) = synth.speak(&next).await {
            warn!("speech failed: {}", e);
        }
    }
}
