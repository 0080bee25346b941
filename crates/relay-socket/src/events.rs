//! Normalization of forwarded envelopes into domain events.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{DecodeError, Envelope, EnvelopeKind};

static USER_MENTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"<@([UW][A-Z0-9]+)(?:\|[^>]+)?>\s*").ok());
static LEADING_MENTIONS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(?:<@[UW][A-Z0-9]+(?:\|[^>]+)?>\s*)+").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Message,
    AppMention,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::AppMention => "app_mention",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default, rename = "url_private")]
    pub url: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// A chat message the orchestrator consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub kind: EventKind,
    pub conversation_id: String,
    pub thread_id: Option<String>,
    pub sender_id: String,
    pub text: String,
    pub timestamp: String,
    pub is_from_bot: bool,
    pub attachments: Vec<Attachment>,
}

impl NormalizedEvent {
    /// Direct-message conversation ids start with `D`.
    pub fn is_direct_message(&self) -> bool {
        self.conversation_id.starts_with('D')
    }

    /// Thread replies should land in: the existing thread, else the message itself.
    pub fn reply_thread_id(&self) -> Option<&str> {
        self.thread_id
            .as_deref()
            .or(Some(self.timestamp.as_str()))
            .filter(|value| !value.trim().is_empty())
    }
}

/// A button press on a message the bot posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionAction {
    pub action_id: String,
    pub value: String,
    pub sender_id: String,
    pub conversation_id: String,
    pub thread_id: Option<String>,
    pub message_ts: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Message(NormalizedEvent),
    Interaction(InteractionAction),
    SlashCommand(NormalizedEvent),
}

impl InboundEvent {
    pub fn conversation_id(&self) -> &str {
        match self {
            Self::Message(event) | Self::SlashCommand(event) => &event.conversation_id,
            Self::Interaction(action) => &action.conversation_id,
        }
    }

    pub fn sender_id(&self) -> &str {
        match self {
            Self::Message(event) | Self::SlashCommand(event) => &event.sender_id,
            Self::Interaction(action) => &action.sender_id,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Message(event) => event.kind.as_str(),
            Self::Interaction(_) => "interaction",
            Self::SlashCommand(_) => "slash_command",
        }
    }
}

#[derive(Debug, Deserialize)]
struct EventCallbackPayload {
    #[serde(rename = "type")]
    callback_type: String,
    #[serde(default)]
    event: Option<MessageEventPayload>,
}

#[derive(Debug, Deserialize)]
struct MessageEventPayload {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    files: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
struct InteractivePayload {
    #[serde(rename = "type")]
    interaction_type: String,
    #[serde(default)]
    user: Option<IdRef>,
    #[serde(default)]
    channel: Option<IdRef>,
    #[serde(default)]
    message: Option<InteractiveMessage>,
    #[serde(default)]
    actions: Vec<InteractiveAction>,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct InteractiveMessage {
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InteractiveAction {
    action_id: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlashCommandPayload {
    command: String,
    #[serde(default)]
    text: Option<String>,
    user_id: String,
    channel_id: String,
}

/// Decodes the kind-specific inner payload of a forwarded envelope.
///
/// `Ok(None)` means the envelope is well formed but carries nothing the bridge
/// acts on (edits, deletions, non-button interactions, unsupported events).
/// With `bot_user_id` known, messages the bot posted itself are marked as bot
/// authored and only its own mention is stripped from the text.
pub fn normalize_envelope(
    envelope: &Envelope,
    bot_user_id: Option<&str>,
) -> Result<Option<InboundEvent>, DecodeError> {
    let bot_user_id = bot_user_id.map(str::trim).filter(|id| !id.is_empty());
    match &envelope.kind {
        EnvelopeKind::EventCallback => normalize_event_callback(&envelope.payload, bot_user_id),
        EnvelopeKind::Interactive => normalize_interaction(&envelope.payload),
        EnvelopeKind::SlashCommand => normalize_slash_command(&envelope.payload),
        _ => Ok(None),
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(
    kind: &EnvelopeKind,
    payload: &Value,
) -> Result<T, DecodeError> {
    serde_json::from_value::<T>(payload.clone()).map_err(|error| DecodeError::Payload {
        kind: kind.as_str().to_string(),
        message: error.to_string(),
    })
}

fn normalize_event_callback(
    payload: &Value,
    bot_user_id: Option<&str>,
) -> Result<Option<InboundEvent>, DecodeError> {
    let callback =
        decode_payload::<EventCallbackPayload>(&EnvelopeKind::EventCallback, payload)?;
    if callback.callback_type != "event_callback" {
        return Ok(None);
    }
    let Some(event) = callback.event else {
        return Ok(None);
    };

    let kind = match event.event_type.as_str() {
        "message" => EventKind::Message,
        "app_mention" => EventKind::AppMention,
        _ => return Ok(None),
    };
    let is_from_bot = event.bot_id.as_deref().is_some_and(|id| !id.is_empty())
        || event.subtype.as_deref() == Some("bot_message")
        || bot_user_id.is_some_and(|bot| event.user.as_deref() == Some(bot));
    if let Some(subtype) = event.subtype.as_deref() {
        if !is_from_bot && !matches!(subtype, "file_share" | "thread_broadcast") {
            return Ok(None);
        }
    }

    let Some(conversation_id) = event.channel.filter(|value| !value.trim().is_empty()) else {
        return Ok(None);
    };
    let sender_id = event.user.unwrap_or_default();
    if sender_id.trim().is_empty() && !is_from_bot {
        return Ok(None);
    }

    let raw_text = event.text.unwrap_or_default();
    let text = match (kind, bot_user_id) {
        (_, Some(bot)) => strip_bot_mention(&raw_text, bot),
        (EventKind::AppMention, None) => strip_leading_mentions(&raw_text),
        (EventKind::Message, None) => raw_text.trim().to_string(),
    };

    Ok(Some(InboundEvent::Message(NormalizedEvent {
        kind,
        conversation_id,
        thread_id: event.thread_ts.filter(|value| !value.trim().is_empty()),
        sender_id,
        text,
        timestamp: event.ts.unwrap_or_default(),
        is_from_bot,
        attachments: event.files,
    })))
}

fn normalize_interaction(payload: &Value) -> Result<Option<InboundEvent>, DecodeError> {
    let interaction = decode_payload::<InteractivePayload>(&EnvelopeKind::Interactive, payload)?;
    if interaction.interaction_type != "block_actions" {
        return Ok(None);
    }
    let Some(action) = interaction
        .actions
        .into_iter()
        .next()
        .filter(|action| !action.action_id.trim().is_empty())
    else {
        return Ok(None);
    };
    let (Some(user), Some(channel)) = (interaction.user, interaction.channel) else {
        return Ok(None);
    };
    if channel.id.trim().is_empty() {
        return Ok(None);
    }
    let (message_ts, thread_id) = match interaction.message {
        Some(message) => (message.ts, message.thread_ts),
        None => (None, None),
    };

    Ok(Some(InboundEvent::Interaction(InteractionAction {
        action_id: action.action_id,
        value: action.value.unwrap_or_default(),
        sender_id: user.id,
        conversation_id: channel.id,
        thread_id,
        message_ts,
    })))
}

fn normalize_slash_command(payload: &Value) -> Result<Option<InboundEvent>, DecodeError> {
    let command = decode_payload::<SlashCommandPayload>(&EnvelopeKind::SlashCommand, payload)?;
    if command.channel_id.trim().is_empty() {
        return Ok(None);
    }
    let args = command.text.unwrap_or_default();
    let text = format!("{} {}", command.command.trim(), args.trim())
        .trim()
        .to_string();

    Ok(Some(InboundEvent::SlashCommand(NormalizedEvent {
        kind: EventKind::Message,
        conversation_id: command.channel_id,
        thread_id: None,
        sender_id: command.user_id,
        text,
        timestamp: String::new(),
        is_from_bot: false,
        attachments: Vec::new(),
    })))
}

/// Removes every `<@BOT>` mention of `bot_user_id`; mentions of other users
/// stay in the text.
pub fn strip_bot_mention(text: &str, bot_user_id: &str) -> String {
    match USER_MENTION.as_ref() {
        Some(pattern) => pattern
            .replace_all(text, |captures: &Captures<'_>| {
                if &captures[1] == bot_user_id {
                    String::new()
                } else {
                    captures[0].to_string()
                }
            })
            .trim()
            .to_string(),
        None => text.trim().to_string(),
    }
}

/// Fallback when the bot id is unknown: an app mention starts with the bot's
/// tag, so only mentions leading the text are removed.
fn strip_leading_mentions(text: &str) -> String {
    match LEADING_MENTIONS.as_ref() {
        Some(pattern) => pattern.replace(text, "").trim().to_string(),
        None => text.trim().to_string(),
    }
}
