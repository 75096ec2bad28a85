//! Chat payload types.
//!
//! Outbound: [`OutboundMessage`] is the JSON body of a SEND to
//! [`crate::destination::SEND_MESSAGE`]. Inbound callbacks receive raw
//! `serde_json::Value`; the typed structs here are optional helpers for
//! consumers that want to deserialize them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Kind of chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Plain text.
    #[default]
    Text,
    /// Image reference.
    Image,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Text => "TEXT",
            Self::Image => "IMAGE",
        })
    }
}

/// Body of an outbound chat SEND.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    /// Target room; always positive.
    pub chat_room_id: i64,
    /// Trimmed, non-empty content.
    pub content: String,
    /// Message kind.
    pub message_type: MessageType,
}

/// What was handed to the transport by a successful send.
///
/// "Success" means the SEND frame reached the transport, not that the server
/// stored the message; the echo arrives later on the room topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Target room.
    pub room_id: i64,
    /// Trimmed content as sent.
    pub content: String,
    /// Message kind.
    pub message_type: MessageType,
    /// When the frame was handed to the transport.
    pub sent_at: DateTime<Utc>,
}

/// Structured failure handed to an `on_error` send callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    /// Why the send was refused.
    pub error: ChatError,
    /// Room id as passed by the caller.
    pub room_id: i64,
    /// Content as passed by the caller (untrimmed).
    pub content: String,
    /// Message kind.
    pub message_type: MessageType,
}

/// Inbound chat message on `/topic/chat/{roomId}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-assigned message id.
    pub id: i64,
    /// Room the message belongs to.
    pub chat_room_id: i64,
    /// Author id.
    pub sender_id: i64,
    /// Author display name.
    #[serde(default)]
    pub sender_nickname: String,
    /// Message kind.
    #[serde(default)]
    pub message_type: MessageType,
    /// Text content (caption for images).
    #[serde(default)]
    pub content: Option<String>,
    /// Uploaded file URL for image messages.
    #[serde(default)]
    pub file_url: Option<String>,
    /// Per-room ordering number.
    #[serde(default)]
    pub sequence_number: i64,
    /// Whether the other participant has read it.
    #[serde(default)]
    pub is_read: bool,
    /// Server timestamp as sent.
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Inbound read-status update on `/topic/chat/{roomId}/read`.
///
/// The server sends either a full object or just the reader's user id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ReadStatusUpdate {
    /// Full update with the highest read sequence number.
    Detailed {
        /// Room that was read.
        #[serde(rename = "chatRoomId")]
        chat_room_id: i64,
        /// Reader.
        #[serde(rename = "userId")]
        user_id: i64,
        /// Last sequence number read.
        #[serde(rename = "sequenceNumber")]
        sequence_number: i64,
    },
    /// Bare reader id.
    Reader(i64),
}

/// Kind of personal notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// A new mutual match.
    NewMatch,
    /// A chat message in a room the user is not looking at.
    NewMessage,
    /// Someone sent the user a mango (like).
    MangoReceived,
    /// External financial data was linked.
    #[serde(rename = "MYDATA_CONNECTED")]
    MyDataConnected,
}

/// Inbound personal notification on `/topic/notification/{userId}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatNotification {
    /// Notification kind.
    pub notification_type: NotificationKind,
    /// Related room, for message notifications.
    #[serde(default)]
    pub chat_room_id: Option<i64>,
    /// Preview of the last message.
    #[serde(default)]
    pub last_message: Option<String>,
    /// Sender display name.
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Sender id.
    #[serde(default)]
    pub sender_id: Option<i64>,
    /// Kind of the previewed message.
    #[serde(default)]
    pub message_type: Option<MessageType>,
    /// Server timestamp as sent.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Unread count for the room.
    #[serde(default)]
    pub unread_count: Option<u32>,
}
