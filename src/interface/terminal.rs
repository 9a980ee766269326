//! Line-oriented chat in the terminal.
//!
//! Plain lines are chat messages; lines starting with `/` are commands. The
//! conversation is rendered from the session's event bus on stdout.

use super::{choice_labels, format_fields};
use crate::bus::{AnalysisStage, RecordingStatus, SessionEvent};
use crate::chat::{format_duration, ChatMessage, ContentKind};
use crate::documents::{read_attachment, ExtractEndpoint};
use crate::session::{Session, UserAction};
use anyhow::Context;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub const HELP: &str = "\
Type a message and press enter to send it.
  /open, /close          show or hide the assistant
  /pick N                choose option N
  /select N              choose dropdown entry N
  /attach PATH           send a file with your next message
  /remove                drop the pending attachment
  /upload [--as KIND] PATH...
                         extract details from documents
                         (KIND: image, pdf, emirate, front, back, licence, mulkiya)
  /fields                show extracted details
  /edit FIELD VALUE      change an extracted detail
  /submit                send the extracted details
  /record, /stop, /cancel
                         voice message
  /mute                  stop reading replies aloud
  /help                  this text
  /quit                  leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Open,
    Close,
    Pick(usize),
    Select(usize),
    Attach(PathBuf),
    Remove,
    Upload {
        kind: Option<ExtractEndpoint>,
        paths: Vec<PathBuf>,
    },
    Fields,
    Edit {
        field: String,
        value: String,
    },
    Submit,
    Record,
    Stop,
    Cancel,
    Mute,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown command /{0}, try /help")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("{0}")]
    Kind(String),
}

/// Parses one input line. Blank lines yield `None`; `//text` sends `/text`.
pub fn parse_line(line: &str) -> Result<Option<Command>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(escaped) = line.strip_prefix("//") {
        return Ok(Some(Command::Send(format!("/{}", escaped))));
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    let command = match name.to_ascii_lowercase().as_str() {
        "open" => Command::Open,
        "close" => Command::Close,
        "pick" => Command::Pick(parse_index(args, "/pick N")?),
        "select" => Command::Select(parse_index(args, "/select N")?),
        "attach" => {
            if args.is_empty() {
                return Err(ParseError::Usage("/attach PATH"));
            }
            Command::Attach(PathBuf::from(args))
        }
        "remove" => Command::Remove,
        "upload" => parse_upload(args)?,
        "fields" => Command::Fields,
        "edit" => match args.split_once(char::is_whitespace) {
            Some((field, value)) if !value.trim().is_empty() => Command::Edit {
                field: field.to_string(),
                value: value.trim().to_string(),
            },
            _ => return Err(ParseError::Usage("/edit FIELD VALUE")),
        },
        "submit" => Command::Submit,
        "record" => Command::Record,
        "stop" => Command::Stop,
        "cancel" => Command::Cancel,
        "mute" => Command::Mute,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn parse_index(args: &str, usage: &'static str) -> Result<usize, ParseError> {
    match args.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ParseError::Usage(usage)),
    }
}

fn parse_upload(args: &str) -> Result<Command, ParseError> {
    const USAGE: &str = "/upload [--as KIND] PATH...";
    let mut words = args.split_whitespace().peekable();
    let mut kind = None;
    if words.peek() == Some(&"--as") {
        words.next();
        let raw = words.next().ok_or(ParseError::Usage(USAGE))?;
        kind = Some(raw.parse::<ExtractEndpoint>().map_err(ParseError::Kind)?);
    }
    let paths: Vec<PathBuf> = words.map(PathBuf::from).collect();
    if paths.is_empty() {
        return Err(ParseError::Usage(USAGE));
    }
    Ok(Command::Upload { kind, paths })
}

/// How an event shows up on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Printed on its own line(s).
    Line(String),
    /// Rewritten in place, e.g. the recording timer.
    Status(String),
}

fn render_message(message: &ChatMessage, base_url: &str) -> String {
    let who = if message.is_bot() { "Insura" } else { "You" };
    let body = match message.content_kind(base_url) {
        ContentKind::Text => message.text.clone(),
        ContentKind::Link => format!("[link] {}", message.text.trim()),
        ContentKind::Pdf => format!("[pdf] {}", message.text.trim()),
        ContentKind::Voice => format!(
            "[voice {}]",
            message.audio_duration.as_deref().unwrap_or("0:00")
        ),
        ContentKind::ExtractedFields => "[document details]".to_string(),
    };
    format!("[{}] {}: {}", message.time, who, body)
}

fn numbered(labels: &[String], start: usize) -> String {
    labels
        .iter()
        .enumerate()
        .map(|(i, label)| format!("  {}) {}", start + i + 1, label))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_event(event: &SessionEvent, base_url: &str) -> Option<Output> {
    let line = match event {
        SessionEvent::VisibilityChanged(true) => return None,
        SessionEvent::VisibilityChanged(false) => "Chat closed. /open to resume.".to_string(),
        SessionEvent::MessageAppended(message) => render_message(message, base_url),
        SessionEvent::OptionsChanged {
            options,
            document_options,
        } => {
            if options.is_empty() && document_options.is_empty() {
                return None;
            }
            let mut blocks = Vec::new();
            if !options.is_empty() {
                blocks.push(format!("Options (/pick N):\n{}", numbered(options, 0)));
            }
            if !document_options.is_empty() {
                blocks.push(format!(
                    "Documents (/pick N to download):\n{}",
                    numbered(document_options, options.len())
                ));
            }
            blocks.join("\n")
        }
        SessionEvent::DropdownChanged(Some(dropdown)) => {
            format!("{} (/select N):\n{}", dropdown.placeholder, numbered(&dropdown.options, 0))
        }
        SessionEvent::DropdownChanged(None) => return None,
        SessionEvent::LoadingChanged(true) => return Some(Output::Status("Insura is typing...".into())),
        SessionEvent::LoadingChanged(false) => return Some(Output::Status(String::new())),
        SessionEvent::ExtractedInfoChanged(Some(info)) => format!(
            "Extracted details (/edit FIELD VALUE, then /submit):\n{}",
            format_fields(info)
                .iter()
                .map(|row| format!("  {}", row))
                .collect::<Vec<_>>()
                .join("\n")
        ),
        SessionEvent::ExtractedInfoChanged(None) => return None,
        SessionEvent::Analysis(AnalysisStage::Uploading) => "Analyzing document...".to_string(),
        SessionEvent::Analysis(AnalysisStage::Complete) => "Analysis complete.".to_string(),
        SessionEvent::Analysis(AnalysisStage::Error) => "Analysis failed.".to_string(),
        SessionEvent::Recording(RecordingStatus::Started) => {
            "Recording... /stop to send, /cancel to discard.".to_string()
        }
        SessionEvent::Recording(RecordingStatus::Tick(secs)) => {
            return Some(Output::Status(format!("Recording {}", format_duration(*secs))))
        }
        SessionEvent::Recording(RecordingStatus::Stopped(_))
        | SessionEvent::Recording(RecordingStatus::Cancelled) => {
            return Some(Output::Status(String::new()))
        }
        SessionEvent::DocumentSaved { name, path } => {
            format!("Saved {} to {}", name, path.display())
        }
    };
    Some(Output::Line(line))
}

async fn render_events(mut rx: broadcast::Receiver<SessionEvent>, base_url: String) {
    let mut status_shown = false;
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("renderer skipped {} events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(output) = render_event(&event, &base_url) else {
            continue;
        };
        let mut stdout = std::io::stdout().lock();
        // Status text lives on the current line until something replaces it.
        let result = match output {
            Output::Status(text) => {
                status_shown = !text.is_empty();
                write!(stdout, "\r\x1b[2K{}", text).and_then(|_| stdout.flush())
            }
            Output::Line(text) => {
                let clear = if status_shown { "\r\x1b[2K" } else { "" };
                status_shown = false;
                writeln!(stdout, "{}{}", clear, text)
            }
        };
        if let Err(e) = result {
            debug!("stdout closed: {}", e);
            break;
        }
    }
}

pub struct TerminalInterface {
    session: Session,
}

impl TerminalInterface {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let renderer = tokio::spawn(render_events(
            self.session.subscribe(),
            self.session.base_url().to_string(),
        ));
        self.session.open();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = lines.next_line() => {
                    let Some(line) = line.context("reading stdin")? else {
                        break;
                    };
                    match parse_line(&line) {
                        Ok(Some(Command::Quit)) => break,
                        Ok(Some(command)) => self.handle(command).await,
                        Ok(None) => {}
                        Err(e) => println!("{}", e),
                    }
                }
            }
        }

        self.session.cancel_recording().await;
        self.session.stop_speaking();
        renderer.abort();
        Ok(())
    }

    async fn handle(&self, command: Command) {
        let session = &self.session;
        let closed = !session.is_open() && !matches!(command, Command::Open | Command::Help);
        if closed {
            println!("Chat is closed. /open to resume.");
            return;
        }

        match command {
            Command::Send(text) => {
                session.submit(UserAction::Text(text));
            }
            Command::Open => session.open(),
            Command::Close => session.close(),
            Command::Pick(n) => {
                let labels = choice_labels(&session.snapshot());
                match labels.get(n - 1) {
                    Some(label) => {
                        session.submit(UserAction::Choose(label.clone()));
                    }
                    None => println!("There is no option {}.", n),
                }
            }
            Command::Select(n) => {
                let entry = session
                    .snapshot()
                    .dropdown
                    .and_then(|d| d.options.get(n - 1).cloned());
                match entry {
                    Some(value) => {
                        session.submit(UserAction::Select(value));
                    }
                    None => println!("There is no entry {}.", n),
                }
            }
            Command::Attach(path) => {
                if !session.capabilities().document_upload {
                    println!("Attachments are disabled.");
                    return;
                }
                match read_attachment(&path).await {
                    Ok(file) => {
                        let name = file.file_name.clone();
                        if session.attach_file(file) {
                            println!("Attached {}. It is sent with your next message.", name);
                        }
                    }
                    Err(e) => println!("Cannot read {}: {}", path.display(), e),
                }
            }
            Command::Remove => match session.remove_attachment() {
                Some(file) => println!("Removed {}.", file.file_name),
                None => println!("No attachment."),
            },
            Command::Upload { kind, paths } => {
                let mut files = Vec::with_capacity(paths.len());
                for path in &paths {
                    match read_attachment(path).await {
                        Ok(file) => files.push(file),
                        Err(e) => {
                            println!("Cannot read {}: {}", path.display(), e);
                            return;
                        }
                    }
                }
                session.submit(UserAction::Documents {
                    files,
                    endpoint: kind,
                });
            }
            Command::Fields => match session.snapshot().extracted_info {
                Some(info) => {
                    for row in format_fields(&info) {
                        println!("  {}", row);
                    }
                }
                None => println!("No extracted details."),
            },
            Command::Edit { field, value } => {
                if !session.edit_extracted_field(&field, &value) {
                    println!("No extracted field named {}.", field);
                }
            }
            Command::Submit => {
                if session.submit(UserAction::SubmitExtracted).is_none() {
                    println!("No extracted details to submit.");
                }
            }
            Command::Record => {
                // Failures are shown as bot messages.
                let _ = session.start_recording().await;
            }
            Command::Stop => {
                let _ = session.stop_recording().await;
            }
            Command::Cancel => {
                if !session.cancel_recording().await {
                    println!("Not recording.");
                }
            }
            Command::Mute => {
                if session.is_speaking() {
                    session.stop_speaking();
                } else {
                    println!("Nothing is being read aloud.");
                }
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::Dropdown;
    use std::path::Path;

    // ------------------------------------------------------------------
    // parse_line
    // ------------------------------------------------------------------

    #[test]
    fn test_plain_text_is_sent() {
        assert_eq!(
            parse_line("  I need car insurance "),
            Ok(Some(Command::Send("I need car insurance".into())))
        );
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line("//etc"), Ok(Some(Command::Send("/etc".into()))));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_line("/open"), Ok(Some(Command::Open)));
        assert_eq!(parse_line("/SUBMIT"), Ok(Some(Command::Submit)));
        assert_eq!(parse_line("/exit"), Ok(Some(Command::Quit)));
        assert_eq!(parse_line("/pick 2"), Ok(Some(Command::Pick(2))));
        assert_eq!(parse_line("/select 1"), Ok(Some(Command::Select(1))));
    }

    #[test]
    fn test_index_must_be_positive() {
        assert_eq!(parse_line("/pick 0"), Err(ParseError::Usage("/pick N")));
        assert_eq!(parse_line("/pick two"), Err(ParseError::Usage("/pick N")));
        assert_eq!(parse_line("/select"), Err(ParseError::Usage("/select N")));
    }

    #[test]
    fn test_edit_keeps_spaces_in_value() {
        assert_eq!(
            parse_line("/edit name Sara  Khan"),
            Ok(Some(Command::Edit {
                field: "name".into(),
                value: "Sara  Khan".into(),
            }))
        );
        assert!(parse_line("/edit name").is_err());
    }

    #[test]
    fn test_attach_path_with_spaces() {
        assert_eq!(
            parse_line("/attach /tmp/my policy.pdf"),
            Ok(Some(Command::Attach(PathBuf::from("/tmp/my policy.pdf"))))
        );
    }

    #[test]
    fn test_upload_with_kind() {
        assert_eq!(
            parse_line("/upload --as mulkiya front.jpg back.jpg"),
            Ok(Some(Command::Upload {
                kind: Some(ExtractEndpoint::Mulkiya),
                paths: vec![PathBuf::from("front.jpg"), PathBuf::from("back.jpg")],
            }))
        );
        assert_eq!(
            parse_line("/upload id.png"),
            Ok(Some(Command::Upload {
                kind: None,
                paths: vec![PathBuf::from("id.png")],
            }))
        );
        assert!(matches!(parse_line("/upload --as boat x.png"), Err(ParseError::Kind(_))));
        assert!(parse_line("/upload --as pdf").is_err());
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            parse_line("/dance"),
            Err(ParseError::Unknown("dance".into()))
        );
    }

    // ------------------------------------------------------------------
    // render_event
    // ------------------------------------------------------------------

    const BASE: &str = "http://127.0.0.1:8000";

    fn line(event: SessionEvent) -> String {
        match render_event(&event, BASE) {
            Some(Output::Line(text)) => text,
            other => panic!("expected a line, got {:?}", other),
        }
    }

    #[test]
    fn test_render_messages_by_kind() {
        let pdf = ChatMessage::bot(format!("{}/pdf/quote.pdf", BASE));
        assert!(line(SessionEvent::MessageAppended(pdf)).ends_with(&format!(
            "Insura: [pdf] {}/pdf/quote.pdf",
            BASE
        )));

        let link = ChatMessage::bot("https://reviews.example.com");
        assert!(line(SessionEvent::MessageAppended(link)).ends_with("[link] https://reviews.example.com"));

        let user = ChatMessage::user("hello");
        assert!(line(SessionEvent::MessageAppended(user)).ends_with("You: hello"));
    }

    #[test]
    fn test_render_options_numbered_across_groups() {
        let text = line(SessionEvent::OptionsChanged {
            options: vec!["Yes".into(), "No".into()],
            document_options: vec!["quote.pdf".into()],
        });
        assert!(text.contains("  1) Yes\n  2) No"));
        assert!(text.contains("  3) quote.pdf"));

        let cleared = SessionEvent::OptionsChanged {
            options: vec![],
            document_options: vec![],
        };
        assert_eq!(render_event(&cleared, BASE), None);
    }

    #[test]
    fn test_render_dropdown() {
        let text = line(SessionEvent::DropdownChanged(Some(Dropdown {
            options: vec!["Sedan".into(), "SUV".into()],
            placeholder: "Body type".into(),
        })));
        assert_eq!(text, "Body type (/select N):\n  1) Sedan\n  2) SUV");
    }

    #[test]
    fn test_render_status_lines() {
        assert_eq!(
            render_event(&SessionEvent::Recording(RecordingStatus::Tick(65)), BASE),
            Some(Output::Status("Recording 1:05".into()))
        );
        assert_eq!(
            render_event(&SessionEvent::LoadingChanged(false), BASE),
            Some(Output::Status(String::new()))
        );
    }

    #[test]
    fn test_render_saved_document() {
        let text = line(SessionEvent::DocumentSaved {
            name: "quote.pdf".into(),
            path: Path::new("/tmp/quote.pdf").to_path_buf(),
        });
        assert_eq!(text, "Saved quote.pdf to /tmp/quote.pdf");
    }
}
