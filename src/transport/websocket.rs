//! WebSocket transport over `tokio-tungstenite`.
//!
//! # Architecture
//!
//! ```text
//!   WebSocketSocket (client side)        connection task (tokio)
//!         │                                     │
//!         │  send_text() ── Outgoing::Text ──►  │ ── writer ──► server
//!         │  close()     ── Outgoing::Close ─►  │
//!         │                                     │
//!   ClientEvent channel ◄── EventSink::emit ──  │ ◄── reader ── server
//! ```
//!
//! [`connect`] handles URL → request building, header insertion and the TLS
//! handshake, returning split ([`WsWriter`], [`WsReader`]) halves for the
//! task's `tokio::select!` loop. In SockJS mode outbound text is wrapped in
//! a JSON array; inbound text is passed through untouched.
//!
//! Rust guideline compliant 2025-01

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use super::{sockjs, EventSink, OpenRequest, TransportEventKind, TransportFactory, TransportSocket};
use crate::config::TransportKind;

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    /// Send a pong frame in response to a ping.
    pub async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Pong(data))
            .await
            .context("WebSocket send_pong failed")
    }

    /// Send a close frame.
    pub async fn send_close(&mut self) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Close(None))
            .await
            .context("WebSocket send_close failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Raw `Frame` variants are skipped internally.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(anyhow::anyhow!("WebSocket read error: {e}"))),
            };
            return Some(Ok(match message {
                tungstenite::Message::Text(text) => WsMessage::Text(text),
                tungstenite::Message::Binary(data) => WsMessage::Binary(data),
                tungstenite::Message::Ping(data) => WsMessage::Ping(data),
                tungstenite::Message::Pong(data) => WsMessage::Pong(data),
                tungstenite::Message::Close(close_frame) => {
                    let (code, reason) = close_frame
                        .map_or((1005, String::new()), |cf| (cf.code.into(), cf.reason.to_string()));
                    WsMessage::Close { code, reason }
                }
                tungstenite::Message::Frame(_) => continue,
            }));
        }
    }
}

/// Connect to a WebSocket URL with optional headers.
///
/// # Errors
///
/// Returns an error if the URL is invalid, header values are malformed,
/// or the WebSocket handshake fails.
pub async fn connect(url: &str, headers: &[(String, String)]) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    for (name, value) in headers {
        let header_name = tungstenite::http::HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name: {name}"))?;
        let header_value = tungstenite::http::HeaderValue::from_str(value)
            .with_context(|| format!("invalid header value for {name}"))?;
        request.headers_mut().insert(header_name, header_value);
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;

    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Outgoing command from the client to a connection task.
#[derive(Debug)]
enum Outgoing {
    /// Send a UTF-8 text frame.
    Text(String),
    /// Initiate a graceful close.
    Close,
}

/// Opens [`WebSocketSocket`]s, each backed by a task on the captured runtime.
#[derive(Debug, Clone)]
pub struct WebSocketTransportFactory {
    runtime: tokio::runtime::Handle,
}

impl WebSocketTransportFactory {
    /// Factory bound to the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails when called outside a tokio runtime.
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("WebSocketTransportFactory must be created inside a tokio runtime")?;
        Ok(Self { runtime })
    }
}

impl TransportFactory for WebSocketTransportFactory {
    fn open(&mut self, request: OpenRequest, events: EventSink) -> Result<Box<dyn TransportSocket>> {
        use tungstenite::client::IntoClientRequest;

        // Reject obviously bad URLs synchronously; handshake errors arrive as events.
        let client_request = request
            .url
            .as_str()
            .into_client_request()
            .with_context(|| format!("invalid WebSocket URL: {}", request.url))?;
        let uri = client_request.uri();
        if !matches!(uri.scheme_str(), Some("ws" | "wss")) || uri.host().is_none() {
            anyhow::bail!("invalid WebSocket URL: {} (expected ws:// or wss:// with a host)", request.url);
        }

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        log::info!("[Transport] Opening {} ({})", request.url, events.connection());
        self.runtime.spawn(run_connection(request, events, outgoing_rx));

        Ok(Box::new(WebSocketSocket {
            outgoing_tx,
            closed: false,
        }))
    }
}

/// Client-side handle for one WebSocket connection task.
#[derive(Debug)]
pub struct WebSocketSocket {
    outgoing_tx: mpsc::UnboundedSender<Outgoing>,
    closed: bool,
}

impl TransportSocket for WebSocketSocket {
    fn send_text(&mut self, text: &str) -> Result<()> {
        anyhow::ensure!(!self.closed, "WebSocket transport is closed");
        self.outgoing_tx
            .send(Outgoing::Text(text.to_string()))
            .context("WebSocket connection task has exited")
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.outgoing_tx.send(Outgoing::Close);
        }
    }
}

/// STOMP is text; a binary frame is accepted only when it holds UTF-8.
fn binary_text(data: Vec<u8>) -> Option<String> {
    match String::from_utf8(data) {
        Ok(text) => Some(text),
        Err(e) => {
            log::warn!(
                "[Transport] Dropping binary frame that is not UTF-8 ({} bytes): {}",
                e.as_bytes().len(),
                e.utf8_error()
            );
            None
        }
    }
}

/// Run one connection: handshake, then pump frames both ways until either
/// side closes.
async fn run_connection(
    request: OpenRequest,
    events: EventSink,
    mut outgoing_rx: mpsc::UnboundedReceiver<Outgoing>,
) {
    let (mut writer, mut reader) = match connect(&request.url, &request.headers).await {
        Ok(pair) => pair,
        Err(e) => {
            log::warn!("[Transport] Connection failed: {:#}", e);
            events.emit(TransportEventKind::Error(format!("{e:#}")));
            return;
        }
    };

    log::info!("[Transport] WebSocket connected ({})", events.connection());
    events.emit(TransportEventKind::Open);

    loop {
        tokio::select! {
            frame = reader.recv() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        log::trace!("[Transport] <- {} bytes", text.len());
                        events.emit(TransportEventKind::Message(text));
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        if let Some(text) = binary_text(data) {
                            events.emit(TransportEventKind::Message(text));
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = writer.send_pong(data).await;
                    }
                    Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        log::info!("[Transport] Closed by server (code {})", code);
                        events.emit(TransportEventKind::Close { code, reason });
                        return;
                    }
                    Some(Err(e)) => {
                        log::warn!("[Transport] WebSocket error: {}", e);
                        events.emit(TransportEventKind::Error(format!("{e:#}")));
                        return;
                    }
                    None => {
                        events.emit(TransportEventKind::Close {
                            code: 1006,
                            reason: "stream ended".to_string(),
                        });
                        return;
                    }
                }
            }
            outgoing = outgoing_rx.recv() => {
                match outgoing {
                    Some(Outgoing::Text(text)) => {
                        let wire = match request.kind {
                            TransportKind::Websocket => text,
                            TransportKind::Sockjs => sockjs::wrap_outbound(&text),
                        };
                        if let Err(e) = writer.send_text(&wire).await {
                            events.emit(TransportEventKind::Error(format!("{e:#}")));
                            return;
                        }
                    }
                    Some(Outgoing::Close) | None => {
                        let _ = writer.send_close().await;
                        events.emit(TransportEventKind::Close {
                            code: 1000,
                            reason: "client requested close".to_string(),
                        });
                        return;
                    }
                }
            }
        }
    }
}
