//! Chat messages riding on the signaling connection.

use crate::connection::ConnectionManager;
use crate::error::SendError;
use chrono::{DateTime, Utc};
use sigcore::protocol::{Message, Payload};
use sigcore::types::events::{Event, StreamFilter, SubscriptionId};
use std::sync::Arc;

/// A received `chat_message`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub chat_id: Option<String>,
    pub sender_id: Option<String>,
    pub recipient_id: String,
    pub content: String,
    pub sent_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    fn from_message(message: &Message) -> Option<Self> {
        match &message.payload {
            Payload::ChatMessage {
                recipient_id,
                content,
                chat_id,
                sender_id,
            } => Some(Self {
                chat_id: chat_id.clone(),
                sender_id: sender_id.clone(),
                recipient_id: recipient_id.clone(),
                content: content.clone(),
                sent_at: message.sent_at(),
            }),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct ChatChannel {
    connection: Arc<ConnectionManager>,
}

impl ChatChannel {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    pub fn send(
        &self,
        recipient_id: &str,
        content: &str,
        chat_id: Option<&str>,
    ) -> Result<(), SendError> {
        self.connection.send(Message::new(Payload::ChatMessage {
            recipient_id: recipient_id.to_string(),
            content: content.to_string(),
            chat_id: chat_id.map(str::to_string),
            sender_id: None,
        }))
    }

    /// Calls `handler` for every message of `chat_id` dispatched from now on.
    pub fn subscribe<F>(&self, chat_id: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        self.connection.subscribe(
            format!("chat:{chat_id}"),
            StreamFilter::Chat(chat_id.to_string()),
            Arc::new(move |event: &Event| {
                if let Some(message) = event.message().and_then(ChatMessage::from_message) {
                    handler(&message);
                }
            }),
        )
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.connection.unsubscribe(id)
    }
}
