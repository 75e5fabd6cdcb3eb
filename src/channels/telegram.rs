//! Telegram transport — long-polls the Bot API for updates.
//!
//! Watches one channel for load postings (`channel_post` updates) and
//! accepts subscriber commands over direct messages (`message` updates).
//! Outbound alerts and command replies go out via `sendMessage`.

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};

use crate::channels::channel::{
    CommandEvent, EventStream, InboundEvent, PostingEvent, PostingSource, SubscriberChannel,
};
use crate::error::ChannelError;
use crate::matching::stops::SubscriberId;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Telegram transport — connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    /// Username of the watched load channel, without the leading `@`.
    load_channel: String,
    poll_timeout_secs: u64,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, load_channel: &str, poll_timeout_secs: u64) -> Self {
        Self {
            bot_token,
            load_channel: load_channel.trim_start_matches('@').to_string(),
            poll_timeout_secs,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    /// Send a single message chunk (≤4096 chars) as plain text.
    async fn send_message_chunk(
        &self,
        chat_id: SubscriberId,
        text: &str,
    ) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::DeliveryFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::DeliveryFailed {
                name: "telegram".into(),
                reason: format!("sendMessage returned {status}: {err}"),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl PostingSource for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let bot_token = self.bot_token.clone();
        let load_channel = self.load_channel.clone();
        let poll_timeout_secs = self.poll_timeout_secs;
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!(channel = %load_channel, "Telegram transport listening for updates...");

            loop {
                let url = format!(
                    "https://api.telegram.org/bot{}/getUpdates",
                    bot_token.expose_secret()
                );
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": poll_timeout_secs,
                    "allowed_updates": ["message", "channel_post"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: serde_json::Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                if let Some(results) = data.get("result").and_then(serde_json::Value::as_array) {
                    for update in results {
                        // Advance offset past this update
                        if let Some(uid) =
                            update.get("update_id").and_then(serde_json::Value::as_i64)
                        {
                            offset = uid + 1;
                        }

                        let Some(event) = classify_update(update, &load_channel) else {
                            continue;
                        };

                        if tx.send(event).is_err() {
                            tracing::info!("Telegram listener channel closed");
                            return;
                        }
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl SubscriberChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn deliver(
        &self,
        subscriber_id: SubscriberId,
        text: &str,
    ) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(subscriber_id, &chunk).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::HealthCheckFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::HealthCheckFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Map a raw getUpdates entry to an inbound event.
///
/// `channel_post` updates from the watched channel become postings.
/// Private `message` updates with a sender become commands. Everything
/// else (posts in other channels, group chatter, media-only updates)
/// is dropped.
fn classify_update(update: &serde_json::Value, load_channel: &str) -> Option<InboundEvent> {
    if let Some(post) = update.get("channel_post") {
        let username = post
            .get("chat")
            .and_then(|c| c.get("username"))
            .and_then(|u| u.as_str())?;
        if !username.eq_ignore_ascii_case(load_channel) {
            return None;
        }
        let text = post.get("text").and_then(serde_json::Value::as_str)?;
        return Some(InboundEvent::Posting(PostingEvent {
            text: text.to_string(),
            received_at: Utc::now(),
        }));
    }

    let message = update.get("message")?;
    let chat_type = message
        .get("chat")
        .and_then(|c| c.get("type"))
        .and_then(|t| t.as_str())?;
    if chat_type != "private" {
        return None;
    }
    let subscriber_id = message
        .get("from")
        .and_then(|f| f.get("id"))
        .and_then(serde_json::Value::as_i64)?;
    let text = message.get("text").and_then(serde_json::Value::as_str)?;

    Some(InboundEvent::Command(CommandEvent {
        subscriber_id,
        text: text.to_string(),
        received_at: Utc::now(),
    }))
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // max_len may land inside a multi-byte character (📍, 🚚);
        // walk back to the nearest char boundary before slicing.
        let mut end = max_len;
        while !remaining.is_char_boundary(end) {
            end -= 1;
        }

        // Find a good split point
        let chunk = &remaining[..end];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(end);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { end } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
