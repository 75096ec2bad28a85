//! Transport abstraction.
//!
//! A transport is a full-duplex text pipe. The client talks to it through
//! two traits:
//!
//! - [`TransportFactory::open`] starts a connection and returns a
//!   [`TransportSocket`] handle immediately; the outcome arrives later.
//! - Everything the transport observes (open, text, close, error) is posted
//!   through the [`EventSink`] it was given, tagged with the
//!   [`ConnectionId`] of that connection. Events from an older connection
//!   are recognisably stale and ignored by the client.
//!
//! Implementations:
//!
//! - [`websocket::WebSocketTransportFactory`]: tokio-tungstenite, one task
//!   per connection.
//! - [`memory::MemoryTransportFactory`]: in-process, records what was sent;
//!   used by tests and embedders.
//!
//! SockJS framing: outbound wrapping happens in the WebSocket transport;
//! inbound control tokens are pre-filtered by the client via
//! [`sockjs::classify`] before frame decoding.

pub mod memory;
pub mod sockjs;
pub mod websocket;

use crate::config::{ClientConfig, TransportKind};
use crate::events::{ClientEvent, EventSender};

/// Generation number of a transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What a transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// The connection is open and can carry text.
    Open,
    /// A text chunk arrived.
    Message(String),
    /// The connection closed.
    Close {
        /// WebSocket close code (1000 = normal, 1006 = abnormal).
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// The connection failed.
    Error(String),
}

/// A transport event tagged with its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    /// Connection that produced the event.
    pub connection: ConnectionId,
    /// The event payload.
    pub kind: TransportEventKind,
}

/// Where a transport posts its events.
#[derive(Debug, Clone)]
pub struct EventSink {
    connection: ConnectionId,
    tx: EventSender,
}

impl EventSink {
    /// Sink tagging every event with `connection`.
    #[must_use]
    pub fn new(connection: ConnectionId, tx: EventSender) -> Self {
        Self { connection, tx }
    }

    /// Connection this sink belongs to.
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Post an event. Returns `false` once the client side is gone.
    pub fn emit(&self, kind: TransportEventKind) -> bool {
        self.tx
            .send(ClientEvent::Transport(TransportEvent {
                connection: self.connection,
                kind,
            }))
            .is_ok()
    }
}

/// Parameters for opening a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    /// Full WebSocket URL.
    pub url: String,
    /// Handshake headers (e.g. `Authorization`).
    pub headers: Vec<(String, String)>,
    /// Framing on top of the socket.
    pub kind: TransportKind,
}

impl OpenRequest {
    /// Request for the endpoint described by `config`.
    ///
    /// SockJS URLs carry a fresh random server/session path each call.
    #[must_use]
    pub fn for_config(config: &ClientConfig, headers: Vec<(String, String)>) -> Self {
        let base = format!(
            "{}{}",
            http_to_ws_scheme(config.server_url.trim_end_matches('/')),
            config.endpoint_path
        );
        let url = match config.transport {
            TransportKind::Websocket => format!("{base}/websocket"),
            TransportKind::Sockjs => format!("{base}{}", sockjs::session_path()),
        };
        Self {
            url,
            headers,
            kind: config.transport,
        }
    }
}

/// Handle to an open (or opening) transport.
pub trait TransportSocket: Send {
    /// Queue a text chunk for sending.
    ///
    /// # Errors
    ///
    /// Fails when the transport is closed.
    fn send_text(&mut self, text: &str) -> anyhow::Result<()>;

    /// Close the transport. Idempotent.
    fn close(&mut self);
}

/// Opens transports.
pub trait TransportFactory: Send {
    /// Start opening a transport. Returns as soon as the attempt is under
    /// way; `Open` or `Error` is reported through `events` later.
    ///
    /// # Errors
    ///
    /// Fails when the attempt cannot even be started (bad URL, no runtime).
    fn open(
        &mut self,
        request: OpenRequest,
        events: EventSink,
    ) -> anyhow::Result<Box<dyn TransportSocket>>;
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}
