use std::{collections::HashSet, time::Instant};

use crate::{
    echo::EchoFilter,
    types::{ConversationId, InboundMessage, MessageHandle},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Stop,
    Reset,
    Status,
    Pwd,
    Cd(String),
    Help,
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The transport handed back something this process sent.
    Echo,
    ForeignSender,
    NotAllowed,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Ignore(IgnoreReason),
    Reply { handle: MessageHandle, text: String },
    Command(Command),
    Prompt(String),
}

/// Which inbound messages the bridge acts on.
#[derive(Debug, Clone, Default)]
pub struct RoutePolicy {
    allowed: HashSet<ConversationId>,
    accept_others: bool,
}

impl RoutePolicy {
    /// An empty allowlist serves every conversation.
    pub fn new(allowed: impl IntoIterator<Item = ConversationId>, accept_others: bool) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            accept_others,
        }
    }

    pub fn allows(&self, conversation: &ConversationId) -> bool {
        self.allowed.is_empty() || self.allowed.contains(conversation)
    }
}

pub fn route(
    msg: &InboundMessage,
    policy: &RoutePolicy,
    echoes: &EchoFilter,
    now: Instant,
) -> Route {
    if let Some(id) = &msg.message_id {
        if echoes.is_echo(id, now) {
            tracing::trace!(
                target = "relay_bridge::routing",
                conversation = %msg.conversation_id,
                message_id = %id,
                "dropping echo of own message"
            );
            return Route::Ignore(IgnoreReason::Echo);
        }
    }

    if !policy.allows(&msg.conversation_id) {
        tracing::debug!(
            target = "relay_bridge::routing",
            conversation = %msg.conversation_id,
            "conversation not in allowlist"
        );
        return Route::Ignore(IgnoreReason::NotAllowed);
    }

    if !msg.from_me && !policy.accept_others {
        tracing::debug!(
            target = "relay_bridge::routing",
            conversation = %msg.conversation_id,
            "ignoring message from another sender"
        );
        return Route::Ignore(IgnoreReason::ForeignSender);
    }

    if let Some(handle) = &msg.reply_to {
        return Route::Reply {
            handle: handle.clone(),
            text: msg.text.clone(),
        };
    }

    route_text(&msg.text)
}

/// Route unquoted text. Also used for quoted replies the bridge did not
/// recognise, which count as ordinary input.
pub fn route_text(text: &str) -> Route {
    let text = text.trim();
    if text.is_empty() {
        return Route::Ignore(IgnoreReason::Empty);
    }

    match parse_command(text) {
        Some(command) => Route::Command(command),
        None => Route::Prompt(text.to_string()),
    }
}

/// `None` when the text is not a slash command.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        return None;
    }

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name.to_lowercase().as_str() {
        "stop" | "cancel" => Command::Stop,
        "reset" | "new" => Command::Reset,
        "status" => Command::Status,
        "pwd" => Command::Pwd,
        "cd" => Command::Cd(arg.to_string()),
        "help" | "start" => Command::Help,
        other => Command::Unknown(other.to_string()),
    };
    Some(command)
}
