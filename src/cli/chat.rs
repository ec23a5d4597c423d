//! Interactive line-mode chat loop.
//!
//! Reads prompts and slash commands from stdin, prints the chat timeline as
//! messages appear or change, and answers permission prompts inline.

use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::Services;
use crate::core::message::Message;
use crate::core::orchestrator::ChatPhase;
use crate::llm::resolve_model;
use crate::mcp::local::device::NOTIFICATION_LISTENER_SETTINGS;
use crate::mcp::permissions::{PermissionAction, PermissionRequestHandler, NOTIFICATION_ACCESS};
use crate::mcp::LOCAL_CONNECTION_NAME;

const HELP: &str = "Commands:
  /connect NAME      Connect an MCP server
  /disconnect NAME   Disconnect an MCP server
  /check             Health-check connections (reconnects failed ones)
  /cancel            Cancel the running request
  /status            Show connections and the selected model
  /help              Show this help
  /quit              Leave the chat
Anything else is sent to the assistant.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Empty,
    Prompt(String),
    Connect(String),
    Disconnect(String),
    Check,
    Cancel,
    Status,
    Help,
    Quit,
    /// A known command missing its argument; carries the usage line.
    Usage(&'static str),
    Unknown(String),
}

pub fn parse_input(line: &str) -> ChatInput {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ChatInput::Empty;
    }
    let Some(command_line) = trimmed.strip_prefix('/') else {
        return ChatInput::Prompt(trimmed.to_string());
    };

    let (command, argument) = match command_line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (command_line, ""),
    };

    match command.to_lowercase().as_str() {
        "connect" if argument.is_empty() => ChatInput::Usage("/connect NAME"),
        "connect" => ChatInput::Connect(argument.to_string()),
        "disconnect" if argument.is_empty() => ChatInput::Usage("/disconnect NAME"),
        "disconnect" => ChatInput::Disconnect(argument.to_string()),
        "check" => ChatInput::Check,
        "cancel" => ChatInput::Cancel,
        "status" => ChatInput::Status,
        "help" => ChatInput::Help,
        "quit" | "exit" => ChatInput::Quit,
        _ => ChatInput::Unknown(command.to_string()),
    }
}

pub fn is_approval(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Renders one timeline message as a single display line.
pub fn format_message(message: &Message) -> String {
    match message {
        Message::User { text, .. } => format!("you> {text}"),
        Message::Agent { text, .. } => format!("assistant> {text}"),
        Message::System { text, .. } => format!("[system] {text}"),
        Message::Tool { text, failed, .. } => {
            if *failed {
                format!("[tool failed] {text}")
            } else {
                format!("[tool] {text}")
            }
        }
        Message::Thinking { text, .. } => format!("[thinking] {text}"),
    }
}

/// Tracks what has been printed so only new or changed messages are shown.
#[derive(Default)]
pub struct TimelinePrinter {
    printed: HashMap<String, String>,
}

impl TimelinePrinter {
    pub fn render(&mut self, messages: &[Message]) -> Vec<String> {
        let mut lines = Vec::new();
        for message in messages {
            let line = format_message(message);
            if self.printed.get(message.id()) == Some(&line) {
                continue;
            }
            self.printed.insert(message.id().to_string(), line.clone());
            lines.push(line);
        }
        lines
    }
}

/// A question waiting for a y/n answer on stdin.
pub struct PermissionPrompt {
    pub question: String,
    reply: PromptReply,
}

enum PromptReply {
    Runtime(oneshot::Sender<bool>),
    /// The CLI has no settings screens; approving stands in for the user
    /// enabling the named permission there.
    Settings(&'static str),
}

impl PermissionPrompt {
    pub fn answer(self, approved: bool, services: &Services) {
        match self.reply {
            PromptReply::Runtime(reply) => {
                let _ = reply.send(approved);
            }
            PromptReply::Settings(permission) => {
                if approved {
                    services.gate.grant(permission);
                    println!("Granted {permission}. Ask again to retry.");
                }
            }
        }
    }
}

/// Forwards permission requests from tool execution to the chat loop.
pub struct CliPermissionHandler {
    prompts: mpsc::UnboundedSender<PermissionPrompt>,
}

impl CliPermissionHandler {
    pub fn new(prompts: mpsc::UnboundedSender<PermissionPrompt>) -> Self {
        Self { prompts }
    }
}

#[async_trait]
impl PermissionRequestHandler for CliPermissionHandler {
    async fn on_request_permission(&self, permissions: &[String]) -> bool {
        let (reply, answer) = oneshot::channel();
        let prompt = PermissionPrompt {
            question: format!("Allow {}? [y/n]", permissions.join(", ")),
            reply: PromptReply::Runtime(reply),
        };
        if self.prompts.send(prompt).is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }

    fn on_request_custom_permission(&self, guide_text: &str, action: Option<&PermissionAction>) {
        let Some(action) = action else {
            println!("{guide_text}");
            return;
        };
        if action.target != NOTIFICATION_LISTENER_SETTINGS {
            println!("{guide_text} ({})", action.label);
            return;
        }
        let prompt = PermissionPrompt {
            question: format!("{guide_text} {}? [y/n]", action.label),
            reply: PromptReply::Settings(NOTIFICATION_ACCESS),
        };
        if self.prompts.send(prompt).is_err() {
            debug!("Chat loop gone; custom permission prompt dropped");
        }
    }
}

fn print_status(services: &Services) {
    let state = services.orchestrator.state();
    let selected = services
        .config
        .load()
        .ok()
        .and_then(|config| config.selected_model);
    let model = resolve_model(selected.as_deref());
    let phase = match state.phase {
        ChatPhase::Idle => "idle",
        ChatPhase::Running => "running",
    };
    let key_note = if services.providers.has_credential(model.service) {
        ""
    } else {
        "  [no API key]"
    };
    println!("Model: {} ({}){key_note}  Chat: {phase}", model.name, model.id);

    for connection in services.manager.connections().iter() {
        let status = if connection.is_connected() {
            format!("connected, {} tools", connection.tools().len())
        } else {
            "disconnected".to_string()
        };
        match (&connection.last_error, connection.is_connected()) {
            (Some(error), false) => {
                println!("  {}: {status} (last error: {error})", connection.name)
            }
            _ => println!("  {}: {status}", connection.name),
        }
    }
}

/// Returns false when the loop should end.
async fn handle_input(input: ChatInput, services: &Services) -> bool {
    match input {
        ChatInput::Empty => {}
        ChatInput::Prompt(text) => {
            services.orchestrator.chat_request(&text);
        }
        ChatInput::Connect(name) => {
            if services.manager.connection(&name).is_none() {
                println!("No connection named {name}");
            } else if services.manager.connect(&name).await {
                println!("Connected {name}");
            } else {
                let reason = services
                    .manager
                    .connection(&name)
                    .and_then(|connection| connection.last_error)
                    .unwrap_or_else(|| "unknown error".to_string());
                println!("Failed to connect {name}: {reason}");
            }
        }
        ChatInput::Disconnect(name) => {
            services.manager.disconnect(&name).await;
            println!("Disconnected {name}");
        }
        ChatInput::Check => {
            let reconnected = services.manager.check_connection().await;
            if reconnected.is_empty() {
                println!("All connections healthy");
            } else {
                println!("Reconnected: {}", reconnected.join(", "));
            }
        }
        ChatInput::Cancel => {
            if !services.orchestrator.cancel_chat_request() {
                println!("Nothing to cancel");
            }
        }
        ChatInput::Status => print_status(services),
        ChatInput::Help => println!("{HELP}"),
        ChatInput::Quit => return false,
        ChatInput::Usage(usage) => println!("Usage: {usage}"),
        ChatInput::Unknown(command) => println!("Unknown command /{command}. Type /help for help."),
    }
    true
}

pub async fn run_chat(services: Services) -> Result<(), Box<dyn Error>> {
    let (prompt_tx, mut prompt_rx) = mpsc::unbounded_channel();
    services
        .gate
        .attach(Arc::new(CliPermissionHandler::new(prompt_tx)));

    if !services.manager.connect(LOCAL_CONNECTION_NAME).await {
        println!("Local MCP server failed to start; continuing without local tools.");
    }
    services.manager.check_connection().await;

    println!("Chat started. Type /help for commands.");

    let mut timeline = services.orchestrator.subscribe();
    let mut printer = TimelinePrinter::default();
    let mut pending: VecDeque<PermissionPrompt> = VecDeque::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        debug!(error = %err, "Failed to read stdin");
                        break;
                    }
                };
                if let Some(prompt) = pending.pop_front() {
                    let approved = is_approval(&line);
                    prompt.answer(approved, &services);
                    if let Some(next) = pending.front() {
                        println!("{}", next.question);
                    }
                    continue;
                }
                if !handle_input(parse_input(&line), &services).await {
                    break;
                }
            }
            changed = timeline.changed() => {
                if changed.is_err() {
                    break;
                }
                let messages = timeline.borrow_and_update().messages.clone();
                for line in printer.render(&messages) {
                    println!("{line}");
                }
            }
            Some(prompt) = prompt_rx.recv() => {
                if pending.is_empty() {
                    println!("{}", prompt.question);
                }
                pending.push_back(prompt);
            }
        }
    }

    for prompt in pending.drain(..) {
        prompt.answer(false, &services);
    }
    services.gate.detach();
    services.orchestrator.cancel_chat_request();
    services.manager.shutdown().await;
    Ok(())
}
