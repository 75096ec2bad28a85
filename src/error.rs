//! Error taxonomy for the chat client.
//!
//! Four families, matching how each one reaches the caller:
//!
//! - [`ConnectionError`] and [`ValidationError`] are returned synchronously
//!   from public API calls (or routed to an `on_error` callback).
//! - [`ProtocolError`] and transport-level [`ConnectionError`]s happen
//!   asynchronously; they tear the connection down, notify status listeners
//!   with `false` and are kept in [`crate::ChatClient::last_error`].
//! - [`PayloadError`] never leaves the dispatcher; it is logged and dropped.

use crate::frame::FrameError;

/// Top-level error returned by the chat client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The connection is missing, failed, or timed out.
    Connection(ConnectionError),
    /// The server sent an ERROR frame or an unparseable frame.
    Protocol(ProtocolError),
    /// Invalid arguments to a public API call.
    Validation(ValidationError),
    /// A MESSAGE body was not valid JSON.
    Payload(PayloadError),
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "Connection error: {e}"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
            Self::Validation(e) => write!(f, "Validation error: {e}"),
            Self::Payload(e) => write!(f, "Payload error: {e}"),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<ConnectionError> for ChatError {
    fn from(e: ConnectionError) -> Self {
        Self::Connection(e)
    }
}

impl From<ProtocolError> for ChatError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<ValidationError> for ChatError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<PayloadError> for ChatError {
    fn from(e: PayloadError) -> Self {
        Self::Payload(e)
    }
}

/// Connection-level failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The token provider returned no bearer token.
    MissingToken,
    /// The transport could not be opened.
    TransportOpen(String),
    /// No CONNECT attempt was answered in time.
    HandshakeTimedOut,
    /// An operation that needs a live session was called while not connected.
    NotConnected,
    /// The transport was closed by the remote side.
    Closed {
        /// WebSocket close code (1000 = normal, 1006 = abnormal).
        code: u16,
        /// Close reason as reported by the transport.
        reason: String,
    },
    /// The transport reported an error.
    Transport(String),
    /// Writing a frame to the transport failed.
    SendFailed(String),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingToken => write!(f, "no auth token available"),
            Self::TransportOpen(msg) => write!(f, "transport failed to open: {msg}"),
            Self::HandshakeTimedOut => write!(f, "CONNECT handshake timed out"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Closed { code, reason } => {
                if reason.is_empty() {
                    write!(f, "transport closed (code {code})")
                } else {
                    write!(f, "transport closed (code {code}): {reason}")
                }
            }
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::SendFailed(msg) => write!(f, "send failed: {msg}"),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Protocol-level failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The server sent an ERROR frame.
    ServerError {
        /// Value of the `message` header, if any.
        message: Option<String>,
        /// Frame body (often a longer description).
        body: String,
    },
    /// An inbound fragment could not be parsed as a frame.
    MalformedFrame(FrameError),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServerError { message, body } => match message {
                Some(message) => write!(f, "server ERROR frame: {message}"),
                None => write!(f, "server ERROR frame: {}", truncate(body, 120)),
            },
            Self::MalformedFrame(e) => write!(f, "malformed frame: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Invalid arguments to a public API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Room ids must be positive.
    InvalidRoomId(i64),
    /// User ids must be positive.
    InvalidUserId(i64),
    /// Message content was empty after trimming.
    EmptyContent,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRoomId(id) => write!(f, "invalid room id: {id}"),
            Self::InvalidUserId(id) => write!(f, "invalid user id: {id}"),
            Self::EmptyContent => write!(f, "message content is empty"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// A MESSAGE body that failed to parse as JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadError {
    /// Destination the message was addressed to.
    pub destination: String,
    /// Parser error message.
    pub reason: String,
}

impl std::fmt::Display for PayloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid JSON body for {}: {}", self.destination, self.reason)
    }
}

impl std::error::Error for PayloadError {}

/// Truncate for log/display output without splitting a UTF-8 character.
pub(crate) fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
