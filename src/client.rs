//! Public chat client.
//!
//! # Driving the client
//!
//! `ChatClient` does no I/O of its own. Transports and timers post
//! [`ClientEvent`]s into a channel, and whoever owns the client drains it:
//!
//! ```ignore
//! let (mut client, mut events) = ChatClient::with_websocket(config, EnvToken::default())?;
//! client.on_connection_status_change(|connected| log::info!("connected: {connected}"));
//! client.connect()?;
//! while let Some(event) = events.recv().await {
//!     client.handle_event(event);
//! }
//! ```
//!
//! Callbacks run synchronously inside `handle_event` while the client is
//! mutably borrowed, so they cannot call back into it. Forward to a channel
//! instead and act on it from the driving loop.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::auth::TokenProvider;
use crate::config::{ClientConfig, TransportKind};
use crate::connection::{ConnectionManager, ConnectionState, TimerOutcome};
use crate::destination::{self, Destination};
use crate::dispatch::{DispatchStats, MessageDispatcher};
use crate::error::{ChatError, ConnectionError, PayloadError, ProtocolError, ValidationError};
use crate::events::{event_channel, ClientEvent, EventReceiver, EventSender};
use crate::frame::{Command, Frame};
use crate::message::{MessageType, OutboundMessage, SendFailure, SendReceipt};
use crate::subscription::{PayloadCallback, SubscriptionId, SubscriptionKey, SubscriptionRegistry, Upsert};
use crate::timer::{Scheduler, TimerId, TokioScheduler};
use crate::transport::sockjs::{self, Inbound};
use crate::transport::websocket::WebSocketTransportFactory;
use crate::transport::{TransportEvent, TransportEventKind, TransportFactory};

/// Listener for connection status changes.
pub type StatusListener = Box<dyn FnMut(bool) + Send>;

/// Invoked with the receipt of a successful send.
pub type SendSuccessCallback = Box<dyn FnOnce(SendReceipt) + Send>;

/// Invoked instead of returning an error from a failed send.
pub type SendErrorCallback = Box<dyn FnOnce(SendFailure) + Send>;

/// Snapshot returned by [`ChatClient::connection_status`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ConnectionStatus {
    /// Handshake complete.
    pub connected: bool,
    /// Connect in progress.
    pub connecting: bool,
}

/// Real-time chat client over STOMP.
pub struct ChatClient {
    connection: ConnectionManager,
    registry: SubscriptionRegistry,
    dispatcher: MessageDispatcher,
    listeners: Vec<StatusListener>,
    last_error: Option<ChatError>,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("connection", &self.connection)
            .field("subscriptions", &self.registry.len())
            .field("listeners", &self.listeners.len())
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl ChatClient {
    /// Client with injected collaborators.
    ///
    /// `events` must be the sending half of the channel the owner drains into
    /// [`Self::handle_event`]; the scheduler should post to the same channel.
    pub fn new(
        config: ClientConfig,
        tokens: impl TokenProvider + 'static,
        factory: impl TransportFactory + 'static,
        scheduler: impl Scheduler + 'static,
        events: EventSender,
    ) -> Self {
        Self {
            connection: ConnectionManager::new(
                config,
                Box::new(tokens),
                Box::new(factory),
                Box::new(scheduler),
                events,
            ),
            registry: SubscriptionRegistry::new(),
            dispatcher: MessageDispatcher::new(),
            listeners: Vec::new(),
            last_error: None,
        }
    }

    /// Client on the real WebSocket transport and tokio timers.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime.
    pub fn with_websocket(
        config: ClientConfig,
        tokens: impl TokenProvider + 'static,
    ) -> anyhow::Result<(Self, EventReceiver)> {
        let (tx, rx) = event_channel();
        let scheduler = TokioScheduler::new(tx.clone())?;
        let factory = WebSocketTransportFactory::new()?;
        Ok((Self::new(config, tokens, factory, scheduler, tx), rx))
    }

    // === Connection ===

    /// Start connecting. A no-op while connecting or connected.
    ///
    /// Completion is reported to status listeners once the server answers.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::MissingToken`] or [`ConnectionError::TransportOpen`];
    /// listeners are notified with `false` as well.
    pub fn connect(&mut self) -> Result<(), ChatError> {
        match self.connection.connect() {
            Ok(_) => Ok(()),
            Err(e) => {
                let error = ChatError::from(e);
                self.registry.clear();
                self.last_error = Some(error.clone());
                self.notify(false);
                Err(error)
            }
        }
    }

    /// Disconnect, dropping every subscription.
    pub fn disconnect(&mut self) {
        let was_live = self.connection.disconnect();
        let dropped = self.registry.clear();
        log::info!("[Chat] Disconnected ({} subscriptions dropped)", dropped);
        if was_live {
            self.notify(false);
        }
    }

    /// Current connection status.
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        let state = self.connection.state();
        ConnectionStatus {
            connected: state == ConnectionState::Connected,
            connecting: state == ConnectionState::Connecting,
        }
    }

    /// Whether the handshake has completed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Register a listener for connection status changes.
    pub fn on_connection_status_change(&mut self, listener: impl FnMut(bool) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// The most recent failure, synchronous or asynchronous.
    #[must_use]
    pub fn last_error(&self) -> Option<&ChatError> {
        self.last_error.as_ref()
    }

    // === Subscriptions ===

    /// Subscribe to a room's messages and, optionally, its read-status
    /// updates. Re-subscribing replaces the callbacks.
    ///
    /// # Errors
    ///
    /// Not connected, non-positive `room_id`, or SUBSCRIBE not sent.
    pub fn subscribe_to_room(
        &mut self,
        room_id: i64,
        on_message: PayloadCallback,
        on_read_status: Option<PayloadCallback>,
    ) -> Result<(), ChatError> {
        self.ensure_connected()?;
        if room_id <= 0 {
            return Err(ValidationError::InvalidRoomId(room_id).into());
        }

        self.install(SubscriptionKey::Room(room_id), Destination::ChatRoom(room_id), on_message)?;
        if let Some(on_read_status) = on_read_status {
            self.install(
                SubscriptionKey::ReadStatus(room_id),
                Destination::ReadStatus(room_id),
                on_read_status,
            )?;
        }
        Ok(())
    }

    /// Drop a room's subscriptions. A no-op for unknown rooms.
    pub fn unsubscribe_from_room(&mut self, room_id: i64) {
        self.uninstall(SubscriptionKey::Room(room_id));
        self.uninstall(SubscriptionKey::ReadStatus(room_id));
    }

    /// Subscribe to the personal notification channel of `user_id`.
    ///
    /// There is one personal channel: subscribing again for the same user
    /// replaces the callback, for another user moves the subscription.
    ///
    /// # Errors
    ///
    /// Not connected, non-positive `user_id`, or SUBSCRIBE not sent.
    pub fn subscribe_to_personal_notifications(
        &mut self,
        user_id: i64,
        on_notification: PayloadCallback,
    ) -> Result<(), ChatError> {
        self.ensure_connected()?;
        if user_id <= 0 {
            return Err(ValidationError::InvalidUserId(user_id).into());
        }
        self.install(
            SubscriptionKey::Personal,
            Destination::Notifications(user_id),
            on_notification,
        )
    }

    /// Drop the personal notification subscription, if any.
    pub fn unsubscribe_from_personal_notifications(&mut self) {
        self.uninstall(SubscriptionKey::Personal);
    }

    /// Room ids with an active chat subscription, ascending.
    #[must_use]
    pub fn subscribed_rooms(&self) -> Vec<i64> {
        self.registry.rooms()
    }

    /// Delivery counters.
    #[must_use]
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    // === Sending ===

    /// Send a chat message.
    ///
    /// Success means the SEND frame reached the transport. The stored
    /// message comes back on the room topic.
    ///
    /// # Errors
    ///
    /// Checked in order: not connected, non-positive `room_id`, blank
    /// `content`, transport refused the frame.
    pub fn send_message(
        &mut self,
        room_id: i64,
        content: &str,
        message_type: MessageType,
    ) -> Result<SendReceipt, ChatError> {
        self.ensure_connected()?;
        if room_id <= 0 {
            return Err(ValidationError::InvalidRoomId(room_id).into());
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyContent.into());
        }

        let outbound = OutboundMessage {
            chat_room_id: room_id,
            content: content.to_string(),
            message_type,
        };
        let body = serde_json::to_string(&outbound).map_err(|e| PayloadError {
            destination: destination::SEND_MESSAGE.to_string(),
            reason: e.to_string(),
        })?;

        self.connection.send_frame(
            &Frame::new(Command::Send)
                .header("destination", destination::SEND_MESSAGE)
                .header("content-type", "application/json")
                .body(body),
        )?;

        Ok(SendReceipt {
            room_id,
            content: outbound.content,
            message_type,
            sent_at: self.connection.now(),
        })
    }

    /// Callback form of [`Self::send_message`].
    ///
    /// On success `on_success` gets the receipt. On failure `on_error` gets a
    /// [`SendFailure`] and `Ok(())` is returned; without `on_error` the error
    /// is returned.
    ///
    /// # Errors
    ///
    /// As [`Self::send_message`], only when `on_error` is `None`.
    pub fn send_message_with(
        &mut self,
        room_id: i64,
        content: &str,
        message_type: MessageType,
        on_success: Option<SendSuccessCallback>,
        on_error: Option<SendErrorCallback>,
    ) -> Result<(), ChatError> {
        match self.send_message(room_id, content, message_type) {
            Ok(receipt) => {
                if let Some(on_success) = on_success {
                    on_success(receipt);
                }
                Ok(())
            }
            Err(error) => match on_error {
                Some(on_error) => {
                    on_error(SendFailure {
                        error,
                        room_id,
                        content: content.to_string(),
                        message_type,
                    });
                    Ok(())
                }
                None => Err(error),
            },
        }
    }

    /// Tell the server the user has read `room_id` up to now.
    ///
    /// # Errors
    ///
    /// Not connected, non-positive `room_id`, or transport refused the frame.
    pub fn mark_room_read(&mut self, room_id: i64) -> Result<(), ChatError> {
        self.ensure_connected()?;
        if room_id <= 0 {
            return Err(ValidationError::InvalidRoomId(room_id).into());
        }
        self.connection.send_frame(
            &Frame::new(Command::Send)
                .header("destination", destination::MARK_READ)
                .header("content-type", "application/json")
                .body(room_id.to_string()),
        )?;
        Ok(())
    }

    // === Event handling ===

    /// Process one event from the client channel.
    pub fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Transport(event) => self.handle_transport_event(event),
            ClientEvent::TimerFired(timer) => self.handle_timer(timer),
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        if !self.connection.is_current(event.connection) {
            log::trace!("[Chat] Ignoring event from stale {}", event.connection);
            return;
        }

        match event.kind {
            TransportEventKind::Open => {
                if let Err(e) = self.connection.handle_open() {
                    self.fail(e.into());
                }
            }
            TransportEventKind::Message(text) => self.handle_inbound(&text),
            TransportEventKind::Close { code, reason } => {
                self.fail(ConnectionError::Closed { code, reason }.into());
            }
            TransportEventKind::Error(message) => {
                self.fail(ConnectionError::Transport(message).into());
            }
        }
    }

    fn handle_inbound(&mut self, text: &str) {
        log::trace!("[Chat] <- {} bytes", text.len());
        if self.connection.config().transport != TransportKind::Sockjs {
            self.process_chunk(text);
            return;
        }
        match sockjs::classify(text) {
            Inbound::Control => {}
            Inbound::Payloads(payloads) => {
                for payload in &payloads {
                    if !self.process_chunk(payload) {
                        break;
                    }
                }
            }
            Inbound::Close { code, reason } => {
                self.fail(ConnectionError::Closed { code, reason }.into());
            }
            Inbound::Raw(raw) => {
                self.process_chunk(raw);
            }
        }
    }

    /// Decode and handle every frame in `chunk`. Returns `false` once the
    /// connection has been torn down.
    fn process_chunk(&mut self, chunk: &str) -> bool {
        let generation = self.connection.connection();
        for result in self.connection.decode(chunk) {
            match result {
                Ok(frame) => self.handle_frame(frame),
                Err(e) => {
                    self.fail(ProtocolError::MalformedFrame(e).into());
                    return false;
                }
            }
            if !self.connection.is_current(generation) {
                return false;
            }
        }
        true
    }

    fn handle_frame(&mut self, frame: Frame) {
        log::debug!("[Stomp] <<< {} {}", frame.command, frame.destination().unwrap_or(""));
        match frame.command {
            Command::Connected => {
                if self.connection.handle_connected(&frame) {
                    self.notify(true);
                }
            }
            Command::Message => {
                if !self.connection.is_connected() {
                    log::debug!("[Chat] MESSAGE before CONNECTED dropped");
                    return;
                }
                self.dispatcher.dispatch(&mut self.registry, &frame);
            }
            Command::Error => {
                let message = frame.headers.get("message").map(str::to_string);
                log::error!(
                    "[Stomp] ERROR frame: {}",
                    message.as_deref().unwrap_or(frame.body.as_str())
                );
                self.fail(
                    ProtocolError::ServerError {
                        message,
                        body: frame.body,
                    }
                    .into(),
                );
            }
            Command::Receipt => {
                log::debug!("[Stomp] RECEIPT {}", frame.headers.get("receipt-id").unwrap_or("?"));
            }
            other => log::warn!("[Stomp] Ignoring unexpected inbound {}", other),
        }
    }

    fn handle_timer(&mut self, timer: TimerId) {
        match self.connection.handle_timer(timer) {
            TimerOutcome::GaveUp => self.fail(ConnectionError::HandshakeTimedOut.into()),
            TimerOutcome::Failed(e) => self.fail(e.into()),
            TimerOutcome::Ignored | TimerOutcome::Retried | TimerOutcome::HeartbeatSent => {}
        }
    }

    // === Internals ===

    fn ensure_connected(&self) -> Result<(), ChatError> {
        if self.connection.is_connected() {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected.into())
        }
    }

    /// Upsert a subscription and send whatever frames the outcome needs.
    fn install(
        &mut self,
        key: SubscriptionKey,
        destination: Destination,
        callback: PayloadCallback,
    ) -> Result<(), ChatError> {
        match self.registry.upsert(key, destination, callback) {
            Upsert::Inserted(id) => self.send_subscribe(key, &id, destination),
            Upsert::Replaced => {
                log::debug!("[Chat] Replaced callback for {}", destination);
                Ok(())
            }
            Upsert::Retargeted { previous, current } => {
                self.send_unsubscribe(&previous);
                self.send_subscribe(key, &current, destination)
            }
        }
    }

    fn send_subscribe(
        &mut self,
        key: SubscriptionKey,
        id: &SubscriptionId,
        destination: Destination,
    ) -> Result<(), ChatError> {
        let frame = Frame::new(Command::Subscribe)
            .header("id", id.as_str())
            .header("destination", destination.to_string());
        if let Err(e) = self.connection.send_frame(&frame) {
            self.registry.remove(key);
            return Err(e.into());
        }
        log::info!("[Chat] Subscribed to {} ({})", destination, id);
        Ok(())
    }

    fn uninstall(&mut self, key: SubscriptionKey) {
        if let Some(subscription) = self.registry.remove(key) {
            self.send_unsubscribe(&subscription.id);
            log::info!("[Chat] Unsubscribed from {}", subscription.destination);
        }
    }

    fn send_unsubscribe(&mut self, id: &SubscriptionId) {
        let frame = Frame::new(Command::Unsubscribe).header("id", id.as_str());
        if let Err(e) = self.connection.send_frame(&frame) {
            log::debug!("[Chat] UNSUBSCRIBE {} not sent: {}", id, e);
        }
    }

    /// Asynchronous failure: tear down, record, notify.
    fn fail(&mut self, error: ChatError) {
        log::warn!("[Chat] Connection failed: {}", error);
        let was_live = self.connection.teardown();
        self.registry.clear();
        self.last_error = Some(error);
        if was_live {
            self.notify(false);
        }
    }

    fn notify(&mut self, connected: bool) {
        log::info!("[Chat] Connection status: {}", if connected { "connected" } else { "disconnected" });
        for listener in &mut self.listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(connected))).is_err() {
                log::error!("[Chat] Connection status listener panicked");
            }
        }
    }
}
