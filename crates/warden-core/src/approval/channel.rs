use crate::error::Result;
use futures::future::BoxFuture;

pub type MessageId = i64;

/// An inline action attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    /// Opaque payload echoed back in [`ReplyKind::Button`].
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyKind {
    /// An inline button was pressed.
    Button { data: String, callback_id: String },
    /// A plain text message.
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Monotonic cursor; pass `update_id + 1` as `since` to skip this reply.
    pub update_id: i64,
    pub approver_id: String,
    /// Unix seconds when the reply was sent, if the channel reports it.
    pub date: Option<i64>,
    pub kind: ReplyKind,
}

/// A chat service able to carry approval requests.
///
/// The gateway treats it as an opaque transport: it does not retry and does
/// not rely on delivery guarantees beyond what each call reports.
pub trait MessagingChannel: Send + Sync {
    fn send_message<'a>(
        &'a self,
        chat_id: &'a str,
        text: &'a str,
        buttons: &'a [Button],
    ) -> BoxFuture<'a, Result<MessageId>>;

    /// Replies with `update_id >= since`.
    fn poll_replies(&self, since: i64) -> BoxFuture<'_, Result<Vec<Reply>>>;

    /// Replace the text of a sent message and drop its buttons.
    fn edit_message<'a>(
        &'a self,
        chat_id: &'a str,
        message_id: MessageId,
        text: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Acknowledge a button press so the client stops its spinner.
    fn acknowledge<'a>(&'a self, _reply: &'a Reply) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
