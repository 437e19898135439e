//! Messenger trait and the inbound/outbound message shapes.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Who sent an inbound event, as reported by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Stable platform user id; doubles as the private chat id.
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundKind {
    Text { message_id: String, text: String },
    /// A shared phone contact.
    Contact { message_id: String, phone: String },
    /// An inline button press on one of our messages.
    Callback { message_id: String, data: String },
}

/// A single update from a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub sender: Sender,
    pub kind: InboundKind,
}

impl InboundEvent {
    pub fn text(sender: Sender, message_id: &str, text: &str) -> Self {
        Self {
            sender,
            kind: InboundKind::Text {
                message_id: message_id.to_string(),
                text: text.to_string(),
            },
        }
    }

    pub fn callback(sender: Sender, message_id: &str, data: &str) -> Self {
        Self {
            sender,
            kind: InboundKind::Callback {
                message_id: message_id.to_string(),
                data: data.to_string(),
            },
        }
    }

    pub fn contact(sender: Sender, message_id: &str, phone: &str) -> Self {
        Self {
            sender,
            kind: InboundKind::Contact {
                message_id: message_id.to_string(),
                phone: phone.to_string(),
            },
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.sender.id
    }

    /// `"/start@SomeBot args"` → `Some("start")`.
    pub fn command(&self) -> Option<&str> {
        let InboundKind::Text { text, .. } = &self.kind else {
            return None;
        };
        let word = text.trim().split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        (!name.is_empty()).then_some(name)
    }

    /// What gets written to the message log.
    pub fn log_text(&self) -> String {
        match &self.kind {
            InboundKind::Text { text, .. } => text.clone(),
            InboundKind::Contact { phone, .. } => format!("[contact] {phone}"),
            InboundKind::Callback { data, .. } => format!("[callback] {data}"),
        }
    }

    pub fn message_id(&self) -> &str {
        match &self.kind {
            InboundKind::Text { message_id, .. }
            | InboundKind::Contact { message_id, .. }
            | InboundKind::Callback { message_id, .. } => message_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardButton {
    pub text: String,
    /// Ask the client to share the user's phone number.
    #[serde(default)]
    pub request_contact: bool,
}

impl KeyboardButton {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            request_contact: false,
        }
    }

    pub fn contact(text: &str) -> Self {
        Self {
            text: text.to_string(),
            request_contact: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: &str, callback_data: &str) -> Self {
        Self {
            text: text.to_string(),
            callback_data: callback_data.to_string(),
        }
    }
}

/// Structured reply options attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyMarkup {
    /// Hide any custom keyboard.
    Remove,
    Keyboard {
        rows: Vec<Vec<KeyboardButton>>,
        one_time: bool,
    },
    Inline { rows: Vec<Vec<InlineButton>> },
}

impl ReplyMarkup {
    /// One-time keyboard with one button per row.
    pub fn buttons(labels: &[&str]) -> Self {
        Self::Keyboard {
            rows: labels.iter().map(|l| vec![KeyboardButton::new(l)]).collect(),
            one_time: true,
        }
    }

    /// Labels of every button, in display order.
    pub fn labels(&self) -> Vec<&str> {
        match self {
            Self::Remove => Vec::new(),
            Self::Keyboard { rows, .. } => rows.iter().flatten().map(|b| b.text.as_str()).collect(),
            Self::Inline { rows } => rows.iter().flatten().map(|b| b.text.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// HTML-formatted text.
    pub text: String,
    pub markup: Option<ReplyMarkup>,
}

impl OutgoingMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            markup: None,
        }
    }

    pub fn with_markup(mut self, markup: ReplyMarkup) -> Self {
        self.markup = Some(markup);
        self
    }
}

/// Replacement content for a message we sent earlier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEdit {
    pub text: String,
    /// New inline keyboard; `None` removes it.
    pub inline: Option<Vec<Vec<InlineButton>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
}

pub type EventStream = Pin<Box<dyn Stream<Item = InboundEvent> + Send>>;

/// Outbound side of a chat platform.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Channel name for logging.
    fn name(&self) -> &str;

    async fn send(
        &self,
        chat_id: &str,
        message: OutgoingMessage,
    ) -> Result<DeliveryReceipt, ChannelError>;

    async fn edit(
        &self,
        chat_id: &str,
        message_id: &str,
        edit: MessageEdit,
    ) -> Result<(), ChannelError>;
}
