//! Unified event channel for the chat client.
//!
//! Background producers (the WebSocket task, timer tasks) never touch client
//! state. They post a [`ClientEvent`] into one unbounded channel, and the
//! owner of the [`crate::ChatClient`] drains the receiver and calls
//! [`crate::ChatClient::handle_event`] for each, on a single task.

use tokio::sync::mpsc;

use crate::timer::TimerId;
use crate::transport::TransportEvent;

/// Event delivered to [`crate::ChatClient::handle_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Something happened on a transport (open, text, close, error).
    Transport(TransportEvent),
    /// A scheduled timer elapsed.
    TimerFired(TimerId),
}

/// Sending half of the client event channel.
pub type EventSender = mpsc::UnboundedSender<ClientEvent>;

/// Receiving half of the client event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<ClientEvent>;

/// Create a new client event channel.
#[must_use]
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
