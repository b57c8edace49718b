use super::channel::{Button, MessageId, MessagingChannel, Reply, ReplyKind};
use crate::error::{Result, WardenError};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Bot API wire types
// ---------------------------------------------------------------------------

/// Every Bot API response is wrapped in this envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    #[serde(default)]
    date: i64,
    chat: Chat,
    from: Option<User>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    from: User,
    data: Option<String>,
    message: Option<Message>,
}

// ---------------------------------------------------------------------------
// TelegramChannel
// ---------------------------------------------------------------------------

/// [`MessagingChannel`] over the Telegram Bot API.
///
/// Replies are read with short `getUpdates` calls (no long polling) so the
/// gateway's poll interval stays in control of timing. Approver ids are the
/// numeric Telegram user ids.
pub struct TelegramChannel {
    client: reqwest::Client,
    base_url: String,
    token: String,
    /// When set, text replies from other chats are dropped.
    chat_filter: Option<String>,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(token, DEFAULT_API_BASE)
    }

    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WardenError::Channel(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            chat_filter: None,
        })
    }

    pub fn restrict_to_chat(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_filter = Some(chat_id.into());
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.base_url, self.token)
    }

    /// POST a Bot API method and unwrap the response envelope.
    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T> {
        // reqwest errors embed the URL, which carries the bot token.
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| WardenError::Channel(format!("{method}: {}", e.without_url())))?;
        let status = resp.status();
        let envelope: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| WardenError::Channel(format!("{method} ({status}): {}", e.without_url())))?;

        if !envelope.ok {
            return Err(WardenError::Channel(format!(
                "{method} ({status}): {}",
                envelope.description.unwrap_or_else(|| "request failed".into())
            )));
        }
        envelope
            .result
            .ok_or_else(|| WardenError::Channel(format!("{method}: empty result")))
    }

    fn to_reply(&self, update: Update) -> Option<Reply> {
        if let Some(cb) = update.callback_query {
            let data = cb.data?;
            if let Some(filter) = &self.chat_filter {
                let chat = cb.message.as_ref().map(|m| m.chat.id.to_string());
                if chat.as_deref() != Some(filter.as_str()) {
                    return None;
                }
            }
            return Some(Reply {
                update_id: update.update_id,
                approver_id: cb.from.id.to_string(),
                date: None,
                kind: ReplyKind::Button {
                    data,
                    callback_id: cb.id,
                },
            });
        }

        let msg = update.message?;
        if let Some(filter) = &self.chat_filter {
            if msg.chat.id.to_string() != *filter {
                return None;
            }
        }
        tracing::trace!(message_id = msg.message_id, "text reply");
        Some(Reply {
            update_id: update.update_id,
            approver_id: msg.from?.id.to_string(),
            date: Some(msg.date),
            kind: ReplyKind::Text(msg.text?),
        })
    }
}

impl MessagingChannel for TelegramChannel {
    fn send_message<'a>(
        &'a self,
        chat_id: &'a str,
        text: &'a str,
        buttons: &'a [Button],
    ) -> BoxFuture<'a, Result<MessageId>> {
        Box::pin(async move {
            let keyboard: Vec<Value> = buttons
                .iter()
                .map(|b| json!({ "text": b.label, "callback_data": b.data }))
                .collect();
            let mut body = json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML",
            });
            if !keyboard.is_empty() {
                body["reply_markup"] = json!({ "inline_keyboard": [keyboard] });
            }
            let msg: Message = self.call("sendMessage", body).await?;
            Ok(msg.message_id)
        })
    }

    fn poll_replies(&self, since: i64) -> BoxFuture<'_, Result<Vec<Reply>>> {
        Box::pin(async move {
            let body = json!({
                "offset": since,
                "timeout": 0,
                "allowed_updates": ["message", "callback_query"],
            });
            let updates: Vec<Update> = self.call("getUpdates", body).await?;
            Ok(updates
                .into_iter()
                .filter_map(|u| self.to_reply(u))
                .collect())
        })
    }

    fn edit_message<'a>(
        &'a self,
        chat_id: &'a str,
        message_id: MessageId,
        text: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let body = json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "text": text,
                "parse_mode": "HTML",
            });
            // Result is the edited Message, or `true` for inline messages.
            let _: Value = self.call("editMessageText", body).await?;
            Ok(())
        })
    }

    fn acknowledge<'a>(&'a self, reply: &'a Reply) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let ReplyKind::Button { callback_id, .. } = &reply.kind else {
                return Ok(());
            };
            let _: Value = self
                .call("answerCallbackQuery", json!({ "callback_query_id": callback_id }))
                .await?;
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
