//! Well-known destinations.
//!
//! ```text
//! /topic/chat/{roomId}          chat messages for a room
//! /topic/chat/{roomId}/read     read-receipt updates for a room
//! /topic/notification/{userId}  personal notifications
//! /app/chat-message             outbound chat messages
//! /app/chat-read                outbound read receipts
//! ```

/// Application destination for outbound chat messages.
pub const SEND_MESSAGE: &str = "/app/chat-message";

/// Application destination for outbound read receipts.
pub const MARK_READ: &str = "/app/chat-read";

const CHAT_PREFIX: &str = "/topic/chat/";
const READ_SUFFIX: &str = "/read";
const NOTIFICATION_PREFIX: &str = "/topic/notification/";

/// A subscribable destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Chat messages for a room.
    ChatRoom(i64),
    /// Read-status updates for a room.
    ReadStatus(i64),
    /// Personal notification channel for a user.
    Notifications(i64),
}

impl Destination {
    /// Parse an inbound `destination` header.
    ///
    /// Read-status is tested before chat-room: `/topic/chat/7/read` shares the
    /// room prefix, so the more specific pattern has to win.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(id) = raw
            .strip_prefix(CHAT_PREFIX)
            .and_then(|rest| rest.strip_suffix(READ_SUFFIX))
            .and_then(parse_id)
        {
            return Some(Self::ReadStatus(id));
        }
        if let Some(id) = raw.strip_prefix(CHAT_PREFIX).and_then(parse_id) {
            return Some(Self::ChatRoom(id));
        }
        raw.strip_prefix(NOTIFICATION_PREFIX)
            .and_then(parse_id)
            .map(Self::Notifications)
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChatRoom(id) => write!(f, "{CHAT_PREFIX}{id}"),
            Self::ReadStatus(id) => write!(f, "{CHAT_PREFIX}{id}{READ_SUFFIX}"),
            Self::Notifications(id) => write!(f, "{NOTIFICATION_PREFIX}{id}"),
        }
    }
}

/// Digits only; `+7`, `-7`, `07x` and empty strings are rejected.
fn parse_id(digits: &str) -> Option<i64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
