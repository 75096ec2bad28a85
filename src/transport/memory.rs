//! In-process transport.
//!
//! Records every chunk the client sends and lets the owner inject events as
//! if they came from a server. Clones share state: keep one clone, give the
//! other to the client.
//!
//! ```
//! use mango_chat::transport::memory::MemoryTransportFactory;
//! use mango_chat::transport::TransportEventKind;
//!
//! let transport = MemoryTransportFactory::new();
//! let observer = transport.clone();
//! // ... hand `transport` to a ChatClient, call connect() ...
//! assert_eq!(observer.open_count(), 0);
//! assert!(!observer.emit(TransportEventKind::Open)); // nothing opened yet
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};

use super::{ConnectionId, EventSink, OpenRequest, TransportEventKind, TransportFactory, TransportSocket};
use crate::frame::{self, Frame};

#[derive(Debug, Default)]
struct MemoryState {
    requests: Vec<OpenRequest>,
    sinks: Vec<EventSink>,
    sent: Vec<String>,
    closed: Vec<ConnectionId>,
    fail_next_open: Option<String>,
}

/// Factory for in-memory transports.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransportFactory {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransportFactory {
    /// New factory with nothing opened.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `open` call fail synchronously with `message`.
    pub fn fail_next_open(&self, message: impl Into<String>) {
        self.lock().fail_next_open = Some(message.into());
    }

    /// How many transports were opened.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// The most recent open request.
    #[must_use]
    pub fn last_request(&self) -> Option<OpenRequest> {
        self.lock().requests.last().cloned()
    }

    /// Connection id of the most recently opened transport.
    #[must_use]
    pub fn last_connection(&self) -> Option<ConnectionId> {
        self.lock().sinks.last().map(EventSink::connection)
    }

    /// Inject an event on the most recently opened transport.
    ///
    /// Returns `false` if nothing was opened or the receiver is gone.
    pub fn emit(&self, kind: TransportEventKind) -> bool {
        let sink = self.lock().sinks.last().cloned();
        sink.is_some_and(|sink| sink.emit(kind))
    }

    /// Inject an event on the transport with the given connection id.
    pub fn emit_to(&self, connection: ConnectionId, kind: TransportEventKind) -> bool {
        let sink = self
            .lock()
            .sinks
            .iter()
            .find(|s| s.connection() == connection)
            .cloned();
        sink.is_some_and(|sink| sink.emit(kind))
    }

    /// Inject a server frame on the most recent transport.
    pub fn deliver(&self, frame: &Frame) -> bool {
        self.emit(TransportEventKind::Message(frame.encode()))
    }

    /// Every chunk sent so far, across all transports.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    /// Sent chunks decoded as frames. Heart-beats and unparseable chunks
    /// are skipped.
    #[must_use]
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.lock()
            .sent
            .iter()
            .flat_map(|chunk| frame::decode(chunk))
            .filter_map(Result::ok)
            .collect()
    }

    /// Forget recorded sends.
    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }

    /// Whether the transport for `connection` was closed by the client.
    #[must_use]
    pub fn is_closed(&self, connection: ConnectionId) -> bool {
        self.lock().closed.contains(&connection)
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn open(&mut self, request: OpenRequest, events: EventSink) -> Result<Box<dyn TransportSocket>> {
        let mut state = self.lock();
        if let Some(message) = state.fail_next_open.take() {
            bail!(message);
        }
        let connection = events.connection();
        state.requests.push(request);
        state.sinks.push(events);
        drop(state);

        Ok(Box::new(MemorySocket {
            state: Arc::clone(&self.state),
            connection,
            closed: false,
        }))
    }
}

/// Socket handle returned by [`MemoryTransportFactory`].
#[derive(Debug)]
struct MemorySocket {
    state: Arc<Mutex<MemoryState>>,
    connection: ConnectionId,
    closed: bool,
}

impl TransportSocket for MemorySocket {
    fn send_text(&mut self, text: &str) -> Result<()> {
        if self.closed {
            bail!("memory transport {} is closed", self.connection);
        }
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .push(text.to_string());
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .closed
                .push(self.connection);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportKind;
    use crate::events::{event_channel, ClientEvent};
    use crate::frame::Command;

    fn request() -> OpenRequest {
        OpenRequest {
            url: "ws://test/ws-chat/websocket".to_string(),
            headers: vec![("Authorization".to_string(), "Bearer T".to_string())],
            kind: TransportKind::Websocket,
        }
    }

    #[test]
    fn test_records_sends_and_close() {
        let (tx, _rx) = event_channel();
        let mut factory = MemoryTransportFactory::new();
        let observer = factory.clone();

        let mut socket = factory
            .open(request(), EventSink::new(ConnectionId(1), tx))
            .expect("open");
        socket.send_text(&Frame::new(Command::Disconnect).encode()).expect("send");
        socket.close();
        socket.close();

        assert_eq!(observer.sent_frames()[0].command, Command::Disconnect);
        assert!(observer.is_closed(ConnectionId(1)));
        assert!(socket.send_text("late").is_err());
    }

    #[test]
    fn test_fail_next_open_is_one_shot() {
        let (tx, _rx) = event_channel();
        let mut factory = MemoryTransportFactory::new();
        factory.fail_next_open("refused");

        let err = factory
            .open(request(), EventSink::new(ConnectionId(1), tx.clone()))
            .err()
            .expect("first open fails");
        assert_eq!(err.to_string(), "refused");
        assert!(factory.open(request(), EventSink::new(ConnectionId(2), tx)).is_ok());
        assert_eq!(factory.open_count(), 1);
    }

    #[test]
    fn test_emit_targets_connection() {
        let (tx, mut rx) = event_channel();
        let mut factory = MemoryTransportFactory::new();
        let _a = factory.open(request(), EventSink::new(ConnectionId(1), tx.clone()));
        let _b = factory.open(request(), EventSink::new(ConnectionId(2), tx));

        assert!(factory.emit_to(ConnectionId(1), TransportEventKind::Open));
        assert!(factory.emit(TransportEventKind::Open));

        let first = rx.try_recv().expect("first");
        let second = rx.try_recv().expect("second");
        assert!(matches!(first, ClientEvent::Transport(e) if e.connection == ConnectionId(1)));
        assert!(matches!(second, ClientEvent::Transport(e) if e.connection == ConnectionId(2)));
    }
}
