//! Telegram channel: long-polls the Bot API for updates.
//!
//! Inbound: text messages, shared contacts and inline-button callbacks.
//! Outbound: HTML messages with reply keyboards, and in-place edits.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::channels::{
    DeliveryReceipt, EventStream, InboundEvent, InlineButton, MessageEdit, Messenger,
    OutgoingMessage, ReplyMarkup, Sender,
};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Telegram channel, connected to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(self.bot_token.expose_secret(), method)
    }

    /// Start long-polling. Updates arrive on the returned stream until the
    /// receiver is dropped.
    pub async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let updates_url = self.api_url("getUpdates");
        let answer_url = self.api_url("answerCallbackQuery");
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for updates...");

            loop {
                let body = json!({
                    "offset": offset,
                    "timeout": 30,
                    "allowed_updates": ["message", "callback_query"]
                });

                let resp = match client.post(&updates_url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    continue;
                };

                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    // Stop the client spinner; the answer itself carries no text.
                    if let Some(query_id) = update
                        .get("callback_query")
                        .and_then(|q| q.get("id"))
                        .and_then(Value::as_str)
                    {
                        let _ = client
                            .post(&answer_url)
                            .json(&json!({ "callback_query_id": query_id }))
                            .send()
                            .await;
                    }

                    let Some(event) = parse_update(update) else {
                        tracing::debug!("Telegram: skipping unsupported update");
                        continue;
                    };

                    if tx.send(event).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }

    /// Verify the token with `getMe`.
    pub async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    /// Send one chunk (≤4096 chars), HTML first with a plain-text fallback.
    async fn send_chunk(
        &self,
        chat_id: &str,
        text: &str,
        markup: Option<&ReplyMarkup>,
    ) -> Result<DeliveryReceipt, ChannelError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(markup) = markup {
            body["reply_markup"] = markup_json(markup);
        }

        let html_resp = self.post("sendMessage", &body).await?;
        if html_resp.status().is_success() {
            return receipt_from(html_resp).await;
        }

        let html_status = html_resp.status();
        tracing::warn!(
            status = ?html_status,
            "Telegram sendMessage with HTML failed; retrying without parse_mode"
        );

        if let Some(obj) = body.as_object_mut() {
            obj.remove("parse_mode");
        }
        let plain_resp = self.post("sendMessage", &body).await?;
        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage failed (html: {html_status}, plain: {plain_err})"),
            });
        }
        receipt_from(plain_resp).await
    }

    async fn post(&self, method: &str, body: &Value) -> Result<reqwest::Response, ChannelError> {
        self.client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Messenger for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    /// Long texts are split; the keyboard rides on the last chunk, whose id
    /// is returned.
    async fn send(
        &self,
        chat_id: &str,
        message: OutgoingMessage,
    ) -> Result<DeliveryReceipt, ChannelError> {
        let chunks = split_message(&message.text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);
        let mut receipt = None;
        for (i, chunk) in chunks.iter().enumerate() {
            let markup = if i == last { message.markup.as_ref() } else { None };
            receipt = Some(self.send_chunk(chat_id, chunk, markup).await?);
        }
        receipt.ok_or_else(|| ChannelError::SendFailed {
            name: "telegram".into(),
            reason: "empty message".into(),
        })
    }

    async fn edit(
        &self,
        chat_id: &str,
        message_id: &str,
        edit: MessageEdit,
    ) -> Result<(), ChannelError> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": edit.text,
            "parse_mode": "HTML",
        });
        if let Some(rows) = &edit.inline {
            body["reply_markup"] = inline_json(rows);
        }

        let resp = self
            .client
            .post(self.api_url("editMessageText"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::EditFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::EditFailed {
                name: "telegram".into(),
                reason: format!("editMessageText failed: {err}"),
            });
        }
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn api_url(token: &str, method: &str) -> String {
    format!("https://api.telegram.org/bot{token}/{method}")
}

async fn receipt_from(resp: reqwest::Response) -> Result<DeliveryReceipt, ChannelError> {
    let data: Value = resp.json().await.map_err(|e| ChannelError::SendFailed {
        name: "telegram".into(),
        reason: format!("unreadable sendMessage response: {e}"),
    })?;
    let message_id = data
        .get("result")
        .and_then(|r| r.get("message_id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
        .unwrap_or_default();
    Ok(DeliveryReceipt { message_id })
}

fn inline_json(rows: &[Vec<InlineButton>]) -> Value {
    json!({
        "inline_keyboard": rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| json!({ "text": b.text, "callback_data": b.callback_data }))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
    })
}

/// Bot API `reply_markup` object.
fn markup_json(markup: &ReplyMarkup) -> Value {
    match markup {
        ReplyMarkup::Remove => json!({ "remove_keyboard": true }),
        ReplyMarkup::Keyboard { rows, one_time } => json!({
            "keyboard": rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|b| json!({ "text": b.text, "request_contact": b.request_contact }))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>(),
            "one_time_keyboard": one_time,
            "resize_keyboard": true,
        }),
        ReplyMarkup::Inline { rows } => inline_json(rows),
    }
}

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("")
}

fn id_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_i64).map(|id| id.to_string())
}

fn sender_from(from: &Value) -> Option<Sender> {
    Some(Sender {
        id: id_field(from, "id")?,
        first_name: str_field(from, "first_name").to_string(),
        last_name: str_field(from, "last_name").to_string(),
        username: str_field(from, "username").to_string(),
    })
}

/// Turn one `getUpdates` entry into an event; `None` for anything we ignore.
fn parse_update(update: &Value) -> Option<InboundEvent> {
    if let Some(query) = update.get("callback_query") {
        let sender = sender_from(query.get("from")?)?;
        let message_id = query.get("message").and_then(|m| id_field(m, "message_id"))?;
        let data = query.get("data").and_then(Value::as_str)?;
        return Some(InboundEvent::callback(sender, &message_id, data));
    }

    let message = update.get("message")?;
    let sender = sender_from(message.get("from")?)?;
    let message_id = id_field(message, "message_id").unwrap_or_default();

    if let Some(phone) = message
        .get("contact")
        .and_then(|c| c.get("phone_number"))
        .and_then(Value::as_str)
    {
        return Some(InboundEvent::contact(sender, &message_id, phone));
    }

    let text = message.get("text").and_then(Value::as_str)?;
    Some(InboundEvent::text(sender, &message_id, text))
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let hard_cut = remaining
            .char_indices()
            .nth(max_len)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let chunk = &remaining[..hard_cut];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .filter(|i| *i > 0)
            .unwrap_or(hard_cut);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
