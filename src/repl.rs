//! Line-oriented terminal client for the chat backend.
//!
//! Reads commands from stdin; plain lines are sent as messages through the
//! streaming path. Progress steps and long-running tasks are printed while
//! the reply streams.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tracing::{error, info, warn};

use crate::api::HttpChatBackend;
use crate::chat::cache::SqliteConversationCache;
use crate::chat::core::config::ChatConfig;
use crate::chat::core::conversation::{LongRunningTask, ProgressEvent, TaskStatus};
use crate::chat::core::ids::{ConversationId, TaskId};
use crate::chat::core::message::Message;
use crate::chat::engine::{ChatController, SendOutcome};
use crate::chat::sync::bus::SyncBus;
use crate::telemetry::init_tracing;

const HELP: &str =
    "Commands: /new, /list, /open <id>, /delete <id>, /quit. Anything else is sent.\n";

/// How often a streaming reply is polled for new progress.
const PROGRESS_POLL: Duration = Duration::from_millis(250);

/// One parsed input line.
#[derive(Debug, Eq, PartialEq)]
enum Command<'a> {
    New,
    List,
    Open(&'a str),
    Delete(&'a str),
    Quit,
    Help,
    Send(&'a str),
    Empty,
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Send(line);
        };
        let (name, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let arg = arg.trim();
        match (name, arg.is_empty()) {
            ("new", _) => Self::New,
            ("list", _) => Self::List,
            ("open", false) => Self::Open(arg),
            ("delete", false) => Self::Delete(arg),
            ("quit" | "exit", _) => Self::Quit,
            _ => Self::Help,
        }
    }
}

/// Run the terminal client (used by the `empatech-chat` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` when stdin closes or `/quit` is entered, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    init_tracing();
    info!("Starting EmpaTech chat v{}", env!("CARGO_PKG_VERSION"));

    let config = ChatConfig::from_env();
    info!(base_url = %config.backend.base_url, "Chat backend endpoint");

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(session(config)) {
        error!("Chat session failed: {e:#}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

async fn session(config: ChatConfig) -> anyhow::Result<()> {
    config.validate()?;
    let backend = Arc::new(HttpChatBackend::new(&config.backend)?);
    let bus = SyncBus::new(config.sync.channel_capacity);
    let mut controller = ChatController::new(&config, backend, bus)?;

    if config.cache.enabled {
        match SqliteConversationCache::new(&config.cache).await {
            Ok(cache) => controller = controller.with_cache(Arc::new(cache)),
            Err(err) => warn!(?err, "Conversation cache disabled"),
        }
    }
    controller.hydrate_from_cache().await;

    let appear_delay = Duration::from_millis(config.timing.appear_delay_ms);
    let maintenance = controller.spawn_maintenance();
    let listener = controller.spawn_sync_listener();

    let mut out = tokio::io::stdout();
    write_out(&mut out, HELP).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Command::Quit => break,
            Command::Empty => {}
            Command::Help => write_out(&mut out, HELP).await?,
            Command::New => {
                controller.start_new_conversation().await;
                write_out(&mut out, "New conversation.\n").await?;
            }
            Command::List => {
                let text = match controller.load_conversations().await {
                    Ok(list) if list.is_empty() => "No conversations.\n".to_string(),
                    Ok(list) => list.iter().fold(String::new(), |mut acc, s| {
                        let _ = writeln!(acc, "{}  {}", s.id, s.title);
                        acc
                    }),
                    Err(err) => format!("Could not load conversations: {err}\n"),
                };
                write_out(&mut out, &text).await?;
            }
            Command::Open(id) => {
                let text = match controller.open_conversation(id.parse::<ConversationId>()?).await {
                    Ok(messages) => render(&messages),
                    Err(err) => format!("{err}\n"),
                };
                write_out(&mut out, &text).await?;
            }
            Command::Delete(id) => {
                let id = id.parse::<ConversationId>()?;
                let text = match controller.delete_conversation(id).await {
                    Ok(()) => "Deleted.\n".to_string(),
                    Err(err) => format!("Could not delete: {err}\n"),
                };
                write_out(&mut out, &text).await?;
            }
            Command::Send(text) => {
                let outcome = stream_reply(&controller, text, &mut out).await?;
                let text = match outcome {
                    SendOutcome::Committed { conversation_id } => {
                        tokio::time::sleep(appear_delay).await;
                        render(&controller.rendered_messages(&conversation_id).await)
                    }
                    SendOutcome::Rejected(reason) => format!("Ignored: {reason:?}\n"),
                    SendOutcome::Failed { .. } => {
                        let notifications = controller.notifications().await;
                        notifications.last().map_or_else(
                            || "Message could not be sent.\n".to_string(),
                            |n| format!("{}\n", n.message),
                        )
                    }
                    SendOutcome::Abandoned => "Reply abandoned.\n".to_string(),
                };
                write_out(&mut out, &text).await?;
            }
        }
    }

    controller.shutdown();
    let (maintenance, listener) = tokio::join!(maintenance, listener);
    if maintenance.is_err() || listener.is_err() {
        warn!("Background task ended abnormally");
    }
    info!("Chat session closed");
    Ok(())
}

/// Send `text` in the background and print its progress until it settles.
async fn stream_reply(
    controller: &ChatController,
    text: &str,
    out: &mut Stdout,
) -> anyhow::Result<SendOutcome> {
    let sender = controller.clone();
    let text = text.to_string();
    let mut send = tokio::spawn(async move { sender.send_message(&text).await });
    let mut ticker = tokio::time::interval(PROGRESS_POLL);
    let mut report = ProgressReport::default();

    let outcome = loop {
        tokio::select! {
            joined = &mut send => break joined?,
            _ = ticker.tick() => {
                let events = match controller.active_conversation().await {
                    Some(id) => controller.progress_events(&id).await,
                    None => Vec::new(),
                };
                let tasks = controller.long_running_tasks().await;
                let lines = report.lines(&events, &tasks);
                if !lines.is_empty() {
                    write_out(out, &lines).await?;
                }
            }
        }
    };
    Ok(outcome)
}

/// What has already been printed for the reply in flight.
#[derive(Debug, Default)]
struct ProgressReport {
    printed: usize,
    announced: HashSet<TaskId>,
}

impl ProgressReport {
    /// Lines for progress steps and pending tasks not yet shown.
    fn lines(&mut self, events: &[ProgressEvent], tasks: &[LongRunningTask]) -> String {
        let mut text = String::new();
        for event in events.iter().skip(self.printed) {
            match &event.status {
                Some(status) => {
                    let _ = writeln!(text, "  ... {} ({status})", event.step);
                }
                None => {
                    let _ = writeln!(text, "  ... {}", event.step);
                }
            }
        }
        self.printed = self.printed.max(events.len());
        for task in tasks.iter().filter(|t| t.status == TaskStatus::Pending) {
            if self.announced.insert(task.id) {
                let _ = writeln!(text, "  Still working on \"{}\" in the background.", task.title);
            }
        }
        text
    }
}

fn render(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "(no messages)\n".to_string();
    }
    messages.iter().fold(String::new(), |mut acc, m| {
        let _ = writeln!(acc, "[{}] {}", m.role, m.content);
        acc
    })
}

async fn write_out(out: &mut Stdout, text: &str) -> std::io::Result<()> {
    out.write_all(text.as_bytes()).await?;
    out.flush().await
}
