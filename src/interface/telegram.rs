use super::{choice_labels, format_fields};
use crate::api::types::FilePart;
use crate::api::Backend;
use crate::audio::Recording;
use crate::bus::{EventBus, SessionEvent};
use crate::config::TelegramConfig;
use crate::documents::files::mime_for_path;
use crate::documents::ExtractEndpoint;
use crate::session::{Session, SessionSettings, UserAction};
use anyhow::Context;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use teloxide::net::Download;
use teloxide::types::{ChatAction, InlineKeyboardButton, InlineKeyboardMarkup, InputFile};
use teloxide::{prelude::*, utils::command::BotCommands};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const NOT_AUTHORIZED: &str = "You are not authorized to use this bot.";
const CHOICE_PREFIX: &str = "opt:";
const DROPDOWN_PREFIX: &str = "dd:";

/// Chats untouched for this long are forgotten. Dropping the session closes
/// its bus, which ends the chat's forwarding task.
const IDLE_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone)]
pub struct TelegramInterface {
    backend: Arc<dyn Backend>,
    settings: SessionSettings,
    token: String,
    whitelist: Arc<Vec<String>>,
    sessions: Arc<Mutex<HashMap<ChatId, Tracked<Session>>>>,
}

struct Tracked<T> {
    value: T,
    last_seen: Instant,
}

/// Drops entries idle for longer than `limit`. Returns how many went.
fn evict_idle<T>(entries: &mut HashMap<ChatId, Tracked<T>>, now: Instant, limit: Duration) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| now.duration_since(entry.last_seen) < limit);
    before - entries.len()
}

#[derive(BotCommands, Clone)]
#[command(
    rename_rule = "lowercase",
    description = "These commands are supported:"
)]
enum Command {
    #[command(description = "Start the conversation.")]
    Start,
    #[command(description = "Display this text.")]
    Help,
    #[command(description = "Show the details read from your documents.")]
    Fields,
    #[command(description = "Correct a detail: /edit <field> <value>")]
    Edit(String),
    #[command(description = "Send the details read from your documents.")]
    Submit,
}

/// A pressed inline button, addressed by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Callback {
    Choice(usize),
    Dropdown(usize),
}

fn parse_callback(data: &str) -> Option<Callback> {
    if let Some(index) = data.strip_prefix(CHOICE_PREFIX) {
        return index.parse().ok().map(Callback::Choice);
    }
    data.strip_prefix(DROPDOWN_PREFIX)
        .and_then(|index| index.parse().ok())
        .map(Callback::Dropdown)
}

fn is_authorized(whitelist: &[String], username: Option<&str>) -> bool {
    username.is_some_and(|name| whitelist.iter().any(|allowed| allowed == name))
}

fn choice_keyboard(options: &[String], document_options: &[String]) -> InlineKeyboardMarkup {
    let plain = options.iter().cloned();
    let documents = document_options.iter().map(|name| format!("Download {}", name));
    let rows = plain
        .chain(documents)
        .enumerate()
        .map(|(i, text)| vec![InlineKeyboardButton::callback(text, format!("{}{}", CHOICE_PREFIX, i))])
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
}

fn dropdown_keyboard(entries: &[String]) -> InlineKeyboardMarkup {
    let rows = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            vec![InlineKeyboardButton::callback(
                entry.clone(),
                format!("{}{}", DROPDOWN_PREFIX, i),
            )]
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
}

impl TelegramInterface {
    pub fn new(
        backend: Arc<dyn Backend>,
        settings: SessionSettings,
        config: TelegramConfig,
    ) -> anyhow::Result<Self> {
        let token = config
            .token
            .context("TELOXIDE_TOKEN or TELEGRAM_BOT_TOKEN not set")?;
        Ok(Self {
            backend,
            settings,
            token,
            whitelist: Arc::new(config.whitelist),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn existing_session(&self, chat_id: ChatId) -> Option<Session> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.get_mut(&chat_id).map(|entry| {
            entry.last_seen = Instant::now();
            entry.value.clone()
        })
    }

    /// The chat's session, created on first contact together with the task
    /// that relays its events back to Telegram.
    fn session(&self, bot: &Bot, chat_id: ChatId) -> Session {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if let Some(entry) = sessions.get_mut(&chat_id) {
            entry.last_seen = now;
            return entry.value.clone();
        }

        let evicted = evict_idle(&mut sessions, now, IDLE_LIMIT);
        if evicted > 0 {
            info!("Forgot {} idle conversations", evicted);
        }

        info!("New conversation in chat {}", chat_id);
        let session = Session::new(
            self.backend.clone(),
            Arc::new(EventBus::new()),
            self.settings.clone(),
        );
        tokio::spawn(forward_events(bot.clone(), chat_id, session.subscribe()));
        sessions.insert(
            chat_id,
            Tracked {
                value: session.clone(),
                last_seen: now,
            },
        );
        session
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        if self.whitelist.is_empty() {
            warn!("No TELEGRAM_WHITELIST configured. All users will be denied access.");
        } else {
            info!("Telegram whitelist loaded: {:?}", self.whitelist);
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(130))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        let bot = Bot::with_client(self.token.clone(), client);
        let interface = self.clone();

        info!("Starting Telegram bot...");

        let handler = Update::filter_message()
            .branch(
                dptree::entry()
                    .filter_command::<Command>()
                    .endpoint(answer_command),
            )
            .branch(dptree::entry().endpoint(answer_message));

        let callback_handler = Update::filter_callback_query().endpoint(handle_callback_query);

        Dispatcher::builder(
            bot,
            dptree::entry().branch(handler).branch(callback_handler),
        )
        .dependencies(dptree::deps![interface])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

        Ok(())
    }
}

async fn forward_events(bot: Bot, chat_id: ChatId, mut rx: broadcast::Receiver<SessionEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Chat {} skipped {} events", chat_id, n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if let Err(e) = deliver(&bot, chat_id, event).await {
            error!("Failed to send update to chat {}: {}", chat_id, e);
        }
    }
}

async fn deliver(bot: &Bot, chat_id: ChatId, event: SessionEvent) -> ResponseResult<()> {
    match event {
        SessionEvent::MessageAppended(message) if message.is_bot() => {
            bot.send_message(chat_id, message.text).await?;
        }
        SessionEvent::OptionsChanged {
            options,
            document_options,
        } if !(options.is_empty() && document_options.is_empty()) => {
            bot.send_message(chat_id, "Choose an option:")
                .reply_markup(choice_keyboard(&options, &document_options))
                .await?;
        }
        SessionEvent::DropdownChanged(Some(dropdown)) => {
            bot.send_message(chat_id, dropdown.placeholder)
                .reply_markup(dropdown_keyboard(&dropdown.options))
                .await?;
        }
        SessionEvent::LoadingChanged(true) => {
            bot.send_chat_action(chat_id, ChatAction::Typing).await?;
        }
        SessionEvent::ExtractedInfoChanged(Some(info)) => {
            let text = format!(
                "I found these details:\n{}\n\nUse /edit <field> <value> to correct one, then /submit.",
                format_fields(&info).join("\n")
            );
            bot.send_message(chat_id, text).await?;
        }
        SessionEvent::DocumentSaved { name, path } => {
            debug!("Sending {} to chat {}", name, chat_id);
            bot.send_document(chat_id, InputFile::file(path)).await?;
        }
        _ => {}
    }
    Ok(())
}

async fn download(bot: &Bot, file_id: &str) -> anyhow::Result<Vec<u8>> {
    let file = bot.get_file(file_id).await.context("looking up file")?;
    let mut bytes = Vec::new();
    bot.download_file(&file.path, &mut bytes)
        .await
        .context("downloading file")?;
    Ok(bytes)
}

async fn answer_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    interface: TelegramInterface,
) -> ResponseResult<()> {
    let username = msg.from().and_then(|u| u.username.as_deref());
    if !is_authorized(&interface.whitelist, username) {
        bot.send_message(msg.chat.id, NOT_AUTHORIZED).await?;
        return Ok(());
    }

    let session = interface.session(&bot, msg.chat.id);
    match cmd {
        Command::Start => {
            if session.is_open() {
                bot.send_message(msg.chat.id, "We're already talking. How can I help?")
                    .await?;
            } else {
                session.open();
            }
        }
        Command::Help => {
            bot.send_message(msg.chat.id, Command::descriptions().to_string())
                .await?;
        }
        Command::Fields => {
            let text = match session.snapshot().extracted_info {
                Some(info) => format_fields(&info).join("\n"),
                None => "No document details yet.".to_string(),
            };
            bot.send_message(msg.chat.id, text).await?;
        }
        Command::Edit(args) => {
            let reply = match args.trim().split_once(char::is_whitespace) {
                Some((field, value)) if session.edit_extracted_field(field, value.trim()) => {
                    format!("Updated {}.", field)
                }
                Some((field, _)) => format!("There is no detail called {}.", field),
                None => "Usage: /edit <field> <value>".to_string(),
            };
            bot.send_message(msg.chat.id, reply).await?;
        }
        Command::Submit => {
            if session.submit(UserAction::SubmitExtracted).is_none() {
                bot.send_message(msg.chat.id, "There are no details to submit.")
                    .await?;
            }
        }
    }
    Ok(())
}

async fn answer_message(bot: Bot, msg: Message, interface: TelegramInterface) -> ResponseResult<()> {
    let username = msg.from().and_then(|u| u.username.as_deref());
    if !is_authorized(&interface.whitelist, username) {
        bot.send_message(msg.chat.id, NOT_AUTHORIZED).await?;
        return Ok(());
    }

    let session = interface.session(&bot, msg.chat.id);
    if !session.is_open() {
        // First contact only shows the greeting.
        session.open();
        return Ok(());
    }

    if let Some(text) = msg.text() {
        session.submit(UserAction::Text(text.to_string()));
        return Ok(());
    }

    let forced = msg
        .caption()
        .and_then(|caption| caption.parse::<ExtractEndpoint>().ok());

    if let Some(voice) = msg.voice() {
        if !session.capabilities().voice_input {
            bot.send_message(msg.chat.id, "Voice messages are turned off. Please type your message.")
                .await?;
            return Ok(());
        }
        match download(&bot, &voice.file.id).await {
            Ok(bytes) => {
                session.submit(UserAction::Voice(Recording {
                    mime_type: "audio/ogg".to_string(),
                    bytes,
                    duration_secs: u64::from(voice.duration),
                }));
            }
            Err(e) => {
                error!("Failed to fetch voice note: {:#}", e);
                bot.send_message(msg.chat.id, crate::session::VOICE_FAILED)
                    .await?;
            }
        }
        return Ok(());
    }

    let attachment = if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        Some((photo.file.id.clone(), format!("{}.jpg", photo.file.unique_id), "image/jpeg".to_string()))
    } else {
        msg.document().map(|doc| {
            let name = doc
                .file_name
                .clone()
                .unwrap_or_else(|| format!("{}.bin", doc.file.unique_id));
            let mime = doc
                .mime_type
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| mime_for_path(Path::new(&name)).to_string());
            (doc.file.id.clone(), name, mime)
        })
    };

    match attachment {
        Some((file_id, name, mime)) => match download(&bot, &file_id).await {
            Ok(bytes) => {
                session.submit(UserAction::Documents {
                    files: vec![FilePart::new(name, mime, bytes)],
                    endpoint: forced,
                });
            }
            Err(e) => {
                error!("Failed to fetch {}: {:#}", name, e);
                bot.send_message(msg.chat.id, crate::session::EXTRACTION_FAILED)
                    .await?;
            }
        },
        None => {
            bot.send_message(msg.chat.id, "Please send text, a voice note or a document.")
                .await?;
        }
    }
    Ok(())
}

async fn handle_callback_query(
    bot: Bot,
    q: CallbackQuery,
    interface: TelegramInterface,
) -> ResponseResult<()> {
    if !is_authorized(&interface.whitelist, q.from.username.as_deref()) {
        bot.answer_callback_query(&q.id).text(NOT_AUTHORIZED).await?;
        return Ok(());
    }

    let Some(msg) = q.message.as_ref() else {
        bot.answer_callback_query(&q.id)
            .text("Error: Could not determine chat")
            .await?;
        return Ok(());
    };
    let Some(session) = interface.existing_session(msg.chat.id) else {
        bot.answer_callback_query(&q.id)
            .text("This conversation has ended. Send /start to begin again.")
            .show_alert(true)
            .await?;
        return Ok(());
    };

    let state = session.snapshot();
    let action = match q.data.as_deref().and_then(parse_callback) {
        Some(Callback::Choice(i)) => choice_labels(&state).get(i).cloned().map(UserAction::Choose),
        Some(Callback::Dropdown(i)) => state
            .dropdown
            .as_ref()
            .and_then(|d| d.options.get(i).cloned())
            .map(UserAction::Select),
        None => {
            bot.answer_callback_query(&q.id).text("Unknown action").await?;
            return Ok(());
        }
    };

    let Some(action) = action else {
        bot.answer_callback_query(&q.id)
            .text("That choice is no longer available.")
            .await?;
        return Ok(());
    };

    let label = match &action {
        UserAction::Choose(label) | UserAction::Select(label) => label.clone(),
        _ => String::new(),
    };
    bot.answer_callback_query(&q.id).await?;
    bot.edit_message_text(msg.chat.id, msg.id, format!("You chose: {}", label))
        .await?;
    session.submit(action);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_callback() {
        assert_eq!(parse_callback("opt:2"), Some(Callback::Choice(2)));
        assert_eq!(parse_callback("dd:0"), Some(Callback::Dropdown(0)));
        assert_eq!(parse_callback("opt:x"), None);
        assert_eq!(parse_callback("enter:proj"), None);
    }

    #[test]
    fn test_whitelist() {
        let whitelist = vec!["sara".to_string()];
        assert!(is_authorized(&whitelist, Some("sara")));
        assert!(!is_authorized(&whitelist, Some("omar")));
        assert!(!is_authorized(&whitelist, None));
        assert!(!is_authorized(&[], Some("sara")));
    }

    #[test]
    fn test_choice_keyboard_indexes_documents_after_options() {
        let keyboard = choice_keyboard(
            &["Yes".to_string(), "No".to_string()],
            &["quote.pdf".to_string()],
        );
        let buttons: Vec<_> = keyboard.inline_keyboard.iter().flatten().collect();
        assert_eq!(buttons.len(), 3);
        assert_eq!(buttons[2].text, "Download quote.pdf");
        assert!(matches!(
            &buttons[2].kind,
            teloxide::types::InlineKeyboardButtonKind::CallbackData(data) if data == "opt:2"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_chats_are_evicted() {
        let mut entries = HashMap::new();
        entries.insert(
            ChatId(1),
            Tracked {
                value: (),
                last_seen: Instant::now(),
            },
        );
        tokio::time::advance(Duration::from_secs(60 * 60)).await;
        entries.insert(
            ChatId(2),
            Tracked {
                value: (),
                last_seen: Instant::now(),
            },
        );

        assert_eq!(evict_idle(&mut entries, Instant::now(), IDLE_LIMIT), 0);

        tokio::time::advance(IDLE_LIMIT - Duration::from_secs(30 * 60)).await;
        assert_eq!(evict_idle(&mut entries, Instant::now(), IDLE_LIMIT), 1);
        assert!(entries.contains_key(&ChatId(2)));
        assert!(!entries.contains_key(&ChatId(1)));
    }

    #[test]
    fn test_dropdown_keyboard() {
        let keyboard = dropdown_keyboard(&["Sedan".to_string(), "SUV".to_string()]);
        let buttons: Vec<_> = keyboard.inline_keyboard.iter().flatten().collect();
        assert_eq!(buttons[1].text, "SUV");
        assert!(matches!(
            &buttons[1].kind,
            teloxide::types::InlineKeyboardButtonKind::CallbackData(data) if data == "dd:1"
        ));
    }
}
