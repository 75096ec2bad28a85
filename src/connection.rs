//! Connection lifecycle and CONNECT handshake.
//!
//! # State machine
//!
//! ```text
//!   Idle ──connect()──► Connecting ──CONNECTED──► Connected
//!                          │  ▲                      │
//!                 timeout  │  │ alternate CONNECT    │ error / close /
//!                 (once)   └──┘                      │ disconnect()
//!                          │                         ▼
//!                          └──── give up ─────► Disconnected ──connect()──► Connecting
//! ```
//!
//! The manager owns the transport handle, the connect-timeout timer and the
//! heart-beat timer. It never calls back into the client: every method
//! returns what happened and the client decides whom to notify.
//!
//! Each `connect()` bumps the [`ConnectionId`] generation, so events from a
//! torn-down transport are recognisably stale.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::TokenProvider;
use crate::config::ClientConfig;
use crate::error::ConnectionError;
use crate::events::EventSender;
use crate::frame::{Command, Frame, FrameDecoder, FrameError, HEARTBEAT};
use crate::timer::{Scheduler, TimerId};
use crate::transport::{ConnectionId, EventSink, OpenRequest, TransportFactory, TransportSocket};

/// STOMP version offered by the primary CONNECT.
const PRIMARY_ACCEPT_VERSION: &str = "1.2";

/// Broader version list offered by the alternate CONNECT.
const ALTERNATE_ACCEPT_VERSION: &str = "1.0,1.1,1.2";

/// What to do when the first CONNECT goes unanswered.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeRetry {
    /// Resend CONNECT once with the alternate header set and a shorter
    /// timeout, then give up.
    #[default]
    OneAlternateRetry,
    /// Give up after the first timeout.
    NoRetry,
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never connected.
    #[default]
    Idle,
    /// Transport opening or CONNECT sent, waiting for CONNECTED.
    Connecting,
    /// Handshake complete.
    Connected,
    /// Torn down after a failure or an explicit disconnect.
    Disconnected,
}

/// Which CONNECT is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeAttempt {
    Primary,
    Alternate,
}

/// Result of [`ConnectionManager::handle_timer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerOutcome {
    /// Not one of ours (stale or already cancelled).
    Ignored,
    /// Primary CONNECT timed out; alternate CONNECT sent.
    Retried,
    /// Last CONNECT attempt timed out. The caller tears down.
    GaveUp,
    /// Heart-beat written and rescheduled.
    HeartbeatSent,
    /// Writing to the transport failed. The caller tears down.
    Failed(ConnectionError),
}

/// Owns the transport and drives the handshake.
pub struct ConnectionManager {
    config: ClientConfig,
    tokens: Box<dyn TokenProvider>,
    factory: Box<dyn TransportFactory>,
    scheduler: Box<dyn Scheduler>,
    events: EventSender,

    state: ConnectionState,
    transport: Option<Box<dyn TransportSocket>>,
    connection: ConnectionId,
    token: Option<String>,
    decoder: FrameDecoder,

    next_timer: u64,
    handshake: Option<(TimerId, HandshakeAttempt)>,
    heartbeat: Option<(TimerId, Duration)>,
    /// Send interval advertised in the CONNECT that is in flight.
    offered_send_ms: u64,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("connection", &self.connection)
            .field("handshake", &self.handshake)
            .field("heartbeat", &self.heartbeat)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Manager in the `Idle` state. Nothing is opened until [`Self::connect`].
    pub fn new(
        config: ClientConfig,
        tokens: Box<dyn TokenProvider>,
        factory: Box<dyn TransportFactory>,
        scheduler: Box<dyn Scheduler>,
        events: EventSender,
    ) -> Self {
        Self {
            config,
            tokens,
            factory,
            scheduler,
            events,
            state: ConnectionState::Idle,
            transport: None,
            connection: ConnectionId(0),
            token: None,
            decoder: FrameDecoder::new(),
            next_timer: 0,
            handshake: None,
            heartbeat: None,
            offered_send_ms: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the handshake has completed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Generation of the current (or last) transport.
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Whether `connection` is the live transport.
    #[must_use]
    pub fn is_current(&self, connection: ConnectionId) -> bool {
        self.transport.is_some() && connection == self.connection
    }

    /// Heart-beat interval negotiated with the server, if any.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat.map(|(_, interval)| interval)
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Wall-clock time from the scheduler.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.scheduler.now()
    }

    /// Start a connection cycle.
    ///
    /// Returns `Ok(false)` without side effects when already `Connecting` or
    /// `Connected`, `Ok(true)` when a transport is opening.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::MissingToken`] when the token provider has nothing,
    /// [`ConnectionError::TransportOpen`] when the factory refuses. The state
    /// is `Disconnected` afterwards.
    pub fn connect(&mut self) -> Result<bool, ConnectionError> {
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected) {
            log::debug!("[Stomp] connect() ignored, already {:?}", self.state);
            return Ok(false);
        }

        let Some(token) = self.tokens.auth_token().filter(|t| !t.is_empty()) else {
            log::warn!("[Stomp] No auth token, not connecting");
            self.state = ConnectionState::Disconnected;
            return Err(ConnectionError::MissingToken);
        };

        self.connection = ConnectionId(self.connection.0 + 1);
        self.decoder.reset();

        let request = OpenRequest::for_config(
            &self.config,
            vec![("Authorization".to_string(), format!("Bearer {token}"))],
        );
        log::info!("[Stomp] Connecting to {} ({})", request.url, self.connection);
        let sink = EventSink::new(self.connection, self.events.clone());

        match self.factory.open(request, sink) {
            Ok(transport) => {
                self.transport = Some(transport);
                self.token = Some(token);
                self.state = ConnectionState::Connecting;
                Ok(true)
            }
            Err(e) => {
                log::warn!("[Stomp] Transport failed to open: {:#}", e);
                self.state = ConnectionState::Disconnected;
                Err(ConnectionError::TransportOpen(format!("{e:#}")))
            }
        }
    }

    /// Transport reported open: send the primary CONNECT and start the
    /// connect timeout.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::SendFailed`] if the CONNECT could not be written.
    pub fn handle_open(&mut self) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Connecting || self.handshake.is_some() {
            log::debug!("[Stomp] Ignoring transport open in state {:?}", self.state);
            return Ok(());
        }
        self.send_connect(HandshakeAttempt::Primary)
    }

    /// Handle a CONNECTED frame. Returns `true` on the transition to
    /// `Connected`.
    pub fn handle_connected(&mut self, frame: &Frame) -> bool {
        if self.state != ConnectionState::Connecting {
            log::warn!("[Stomp] Unexpected CONNECTED in state {:?}", self.state);
            return false;
        }

        if let Some((timer, _)) = self.handshake.take() {
            self.scheduler.cancel(timer);
        }
        self.state = ConnectionState::Connected;
        log::info!(
            "[Stomp] Connected (version {}, server {})",
            frame.headers.get("version").unwrap_or("?"),
            frame.headers.get("server").unwrap_or("?")
        );

        let server = parse_heartbeat(frame.headers.get("heart-beat"));
        if let Some(interval) = negotiate_heartbeat(self.offered_send_ms, server.1) {
            log::debug!("[Stomp] Sending heart-beats every {:?}", interval);
            let timer = self.next_timer_id();
            self.scheduler.schedule(timer, interval);
            self.heartbeat = Some((timer, interval));
        }
        true
    }

    /// Handle a fired timer.
    pub fn handle_timer(&mut self, timer: TimerId) -> TimerOutcome {
        if let Some((pending, attempt)) = self.handshake {
            if pending == timer {
                self.handshake = None;
                if self.state != ConnectionState::Connecting {
                    return TimerOutcome::Ignored;
                }
                return match (attempt, self.config.handshake_retry) {
                    (HandshakeAttempt::Primary, HandshakeRetry::OneAlternateRetry) => {
                        log::warn!("[Stomp] CONNECT timed out, retrying with alternate headers");
                        match self.send_connect(HandshakeAttempt::Alternate) {
                            Ok(()) => TimerOutcome::Retried,
                            Err(e) => TimerOutcome::Failed(e),
                        }
                    }
                    _ => {
                        log::warn!("[Stomp] CONNECT timed out, giving up");
                        TimerOutcome::GaveUp
                    }
                };
            }
        }

        if let Some((pending, interval)) = self.heartbeat {
            if pending == timer {
                if self.state != ConnectionState::Connected {
                    self.heartbeat = None;
                    return TimerOutcome::Ignored;
                }
                if let Err(e) = self.send_text(HEARTBEAT) {
                    self.heartbeat = None;
                    return TimerOutcome::Failed(e);
                }
                let next = self.next_timer_id();
                self.scheduler.schedule(next, interval);
                self.heartbeat = Some((next, interval));
                return TimerOutcome::HeartbeatSent;
            }
        }

        log::trace!("[Stomp] Ignoring stale {}", timer);
        TimerOutcome::Ignored
    }

    /// Feed an inbound chunk to the streaming decoder.
    pub fn decode(&mut self, chunk: &str) -> Vec<Result<Frame, FrameError>> {
        self.decoder.push(chunk)
    }

    /// Encode and send a frame on the live transport.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotConnected`] without a transport,
    /// [`ConnectionError::SendFailed`] when the transport refuses.
    pub fn send_frame(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        log::debug!("[Stomp] >>> {} {}", frame.command, frame.destination().unwrap_or(""));
        self.send_text(&frame.encode())
    }

    /// Cancel timers, close the transport and move to `Disconnected`.
    ///
    /// Returns `true` when the previous state was `Connecting` or
    /// `Connected`.
    pub fn teardown(&mut self) -> bool {
        let was_live = matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected);

        if let Some((timer, _)) = self.handshake.take() {
            self.scheduler.cancel(timer);
        }
        if let Some((timer, _)) = self.heartbeat.take() {
            self.scheduler.cancel(timer);
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.token = None;
        self.offered_send_ms = 0;
        self.decoder.reset();

        if was_live {
            log::info!("[Stomp] Disconnected ({})", self.connection);
        }
        self.state = ConnectionState::Disconnected;
        was_live
    }

    /// Graceful shutdown: DISCONNECT when connected, then [`Self::teardown`].
    pub fn disconnect(&mut self) -> bool {
        if self.state == ConnectionState::Connected {
            if let Err(e) = self.send_frame(&Frame::new(Command::Disconnect)) {
                log::debug!("[Stomp] DISCONNECT not sent: {}", e);
            }
        }
        self.teardown()
    }

    fn send_connect(&mut self, attempt: HandshakeAttempt) -> Result<(), ConnectionError> {
        let token = self.token.clone().unwrap_or_default();
        let (frame, timeout, offered_send_ms) = match attempt {
            HandshakeAttempt::Primary => (
                Frame::new(Command::Connect)
                    .header("accept-version", PRIMARY_ACCEPT_VERSION)
                    .header(
                        "heart-beat",
                        format!("{},{}", self.config.heartbeat_send_ms, self.config.heartbeat_receive_ms),
                    )
                    .header("host", self.config.stomp_host())
                    .header("Authorization", format!("Bearer {token}")),
                self.config.connect_timeout(),
                self.config.heartbeat_send_ms,
            ),
            HandshakeAttempt::Alternate => (
                Frame::new(Command::Connect)
                    .header("accept-version", ALTERNATE_ACCEPT_VERSION)
                    .header("heart-beat", "0,0")
                    .header("Authorization", format!("Bearer {token}")),
                self.config.retry_timeout(),
                0,
            ),
        };

        self.send_frame(&frame)?;
        self.offered_send_ms = offered_send_ms;

        let timer = self.next_timer_id();
        self.scheduler.schedule(timer, timeout);
        self.handshake = Some((timer, attempt));
        Ok(())
    }

    fn send_text(&mut self, text: &str) -> Result<(), ConnectionError> {
        let transport = self.transport.as_mut().ok_or(ConnectionError::NotConnected)?;
        transport
            .send_text(text)
            .map_err(|e| ConnectionError::SendFailed(format!("{e:#}")))
    }

    fn next_timer_id(&mut self) -> TimerId {
        self.next_timer += 1;
        TimerId(self.next_timer)
    }
}

/// Parse a `heart-beat: sx,sy` header. Missing or malformed means `0,0`.
fn parse_heartbeat(header: Option<&str>) -> (u64, u64) {
    header
        .and_then(|value| value.split_once(','))
        .and_then(|(x, y)| Some((x.trim().parse::<u64>().ok()?, y.trim().parse::<u64>().ok()?)))
        .unwrap_or((0, 0))
}

/// Outgoing heart-beat interval: `max(cx, sy)` when both sides want one.
fn negotiate_heartbeat(client_send_ms: u64, server_receive_ms: u64) -> Option<Duration> {
    (client_send_ms > 0 && server_receive_ms > 0)
        .then(|| Duration::from_millis(client_send_ms.max(server_receive_ms)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::events::event_channel;
    use crate::timer::ManualScheduler;
    use crate::transport::memory::MemoryTransportFactory;

    struct Harness {
        manager: ConnectionManager,
        transport: MemoryTransportFactory,
        timers: ManualScheduler,
        _rx: crate::events::EventReceiver,
    }

    fn harness(config: ClientConfig, token: StaticToken) -> Harness {
        let (tx, rx) = event_channel();
        let transport = MemoryTransportFactory::new();
        let timers = ManualScheduler::new();
        let manager = ConnectionManager::new(
            config,
            Box::new(token),
            Box::new(transport.clone()),
            Box::new(timers.clone()),
            tx,
        );
        Harness {
            manager,
            transport,
            timers,
            _rx: rx,
        }
    }

    fn connected_frame(heart_beat: &str) -> Frame {
        Frame::new(Command::Connected)
            .header("version", "1.2")
            .header("heart-beat", heart_beat)
    }

    #[test]
    fn test_connect_opens_with_bearer_header() {
        let mut h = harness(ClientConfig::default(), StaticToken::new("T"));
        assert_eq!(h.manager.connect(), Ok(true));
        assert_eq!(h.manager.state(), ConnectionState::Connecting);

        let request = h.transport.last_request().expect("opened");
        assert_eq!(
            request.headers,
            vec![("Authorization".to_string(), "Bearer T".to_string())]
        );
        assert_eq!(request.url, "ws://localhost:8080/ws-chat/websocket");
    }

    #[test]
    fn test_connect_is_idempotent_while_connecting() {
        let mut h = harness(ClientConfig::default(), StaticToken::new("T"));
        assert_eq!(h.manager.connect(), Ok(true));
        assert_eq!(h.manager.connect(), Ok(false));
        assert_eq!(h.transport.open_count(), 1);
    }

    #[test]
    fn test_missing_token_fails_without_opening() {
        let mut h = harness(ClientConfig::default(), StaticToken::none());
        assert_eq!(h.manager.connect(), Err(ConnectionError::MissingToken));
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.transport.open_count(), 0);
    }

    #[test]
    fn test_factory_failure_is_transport_open_error() {
        let mut h = harness(ClientConfig::default(), StaticToken::new("T"));
        h.transport.fail_next_open("connection refused");
        assert_eq!(
            h.manager.connect(),
            Err(ConnectionError::TransportOpen("connection refused".to_string()))
        );
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_open_sends_primary_connect_and_schedules_timeout() {
        let mut h = harness(ClientConfig::default(), StaticToken::new("T"));
        h.manager.connect().expect("connect");
        h.manager.handle_open().expect("open");

        let frames = h.transport.sent_frames();
        assert_eq!(frames.len(), 1);
        let connect = &frames[0];
        assert_eq!(connect.command, Command::Connect);
        assert_eq!(connect.headers.get("accept-version"), Some("1.2"));
        assert_eq!(connect.headers.get("heart-beat"), Some("10000,10000"));
        assert_eq!(connect.headers.get("host"), Some("localhost"));
        assert_eq!(connect.headers.get("Authorization"), Some("Bearer T"));

        let pending = h.timers.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].delay, Duration::from_secs(10));
    }

    #[test]
    fn test_timeout_retries_once_with_alternate_headers() {
        let mut h = harness(ClientConfig::default(), StaticToken::new("T"));
        h.manager.connect().expect("connect");
        h.manager.handle_open().expect("open");

        let first = h.timers.take_next().expect("primary timeout");
        assert_eq!(h.manager.handle_timer(first.id), TimerOutcome::Retried);

        let frames = h.transport.sent_frames();
        assert_eq!(frames.len(), 2);
        let retry = &frames[1];
        assert_eq!(retry.headers.get("accept-version"), Some("1.0,1.1,1.2"));
        assert_eq!(retry.headers.get("heart-beat"), Some("0,0"));
        assert_eq!(retry.headers.get("Authorization"), Some("Bearer T"));
        assert_eq!(retry.headers.get("host"), None);

        let second = h.timers.take_next().expect("retry timeout");
        assert_eq!(second.delay, Duration::from_secs(5));
        assert_eq!(h.manager.handle_timer(second.id), TimerOutcome::GaveUp);
        assert_eq!(h.transport.sent_frames().len(), 2);
    }

    #[test]
    fn test_no_retry_policy_gives_up_immediately() {
        let config = ClientConfig {
            handshake_retry: HandshakeRetry::NoRetry,
            ..ClientConfig::default()
        };
        let mut h = harness(config, StaticToken::new("T"));
        h.manager.connect().expect("connect");
        h.manager.handle_open().expect("open");

        let first = h.timers.take_next().expect("timeout");
        assert_eq!(h.manager.handle_timer(first.id), TimerOutcome::GaveUp);
        assert_eq!(h.transport.sent_frames().len(), 1);
    }

    #[test]
    fn test_connected_cancels_timeout_and_negotiates_heartbeat() {
        let mut h = harness(ClientConfig::default(), StaticToken::new("T"));
        h.manager.connect().expect("connect");
        h.manager.handle_open().expect("open");
        let timeout = h.timers.pending()[0].id;

        assert!(h.manager.handle_connected(&connected_frame("0,20000")));
        assert!(h.manager.is_connected());
        assert_eq!(h.timers.cancelled(), vec![timeout]);
        assert_eq!(h.manager.heartbeat_interval(), Some(Duration::from_secs(20)));

        // A stale timeout delivered late is ignored.
        assert_eq!(h.manager.handle_timer(timeout), TimerOutcome::Ignored);
        assert!(h.manager.is_connected());
    }

    #[test]
    fn test_heartbeat_timer_sends_eol_and_reschedules() {
        let mut h = harness(ClientConfig::default(), StaticToken::new("T"));
        h.manager.connect().expect("connect");
        h.manager.handle_open().expect("open");
        h.manager.handle_connected(&connected_frame("10000,5000"));
        h.transport.clear_sent();

        let beat = h.timers.take_next().expect("heartbeat timer");
        assert_eq!(beat.delay, Duration::from_secs(10));
        assert_eq!(h.manager.handle_timer(beat.id), TimerOutcome::HeartbeatSent);
        assert_eq!(h.transport.sent(), vec!["\n".to_string()]);
        assert_eq!(h.timers.pending().len(), 1);
    }

    #[test]
    fn test_heartbeat_disabled_when_server_declines() {
        let mut h = harness(ClientConfig::default(), StaticToken::new("T"));
        h.manager.connect().expect("connect");
        h.manager.handle_open().expect("open");
        h.manager.handle_connected(&connected_frame("0,0"));
        assert_eq!(h.manager.heartbeat_interval(), None);
        assert!(h.timers.pending().is_empty());
    }

    #[test]
    fn test_connected_outside_connecting_is_ignored() {
        let mut h = harness(ClientConfig::default(), StaticToken::new("T"));
        assert!(!h.manager.handle_connected(&connected_frame("0,0")));
        assert_eq!(h.manager.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_disconnect_sends_frame_and_closes() {
        let mut h = harness(ClientConfig::default(), StaticToken::new("T"));
        h.manager.connect().expect("connect");
        h.manager.handle_open().expect("open");
        h.manager.handle_connected(&connected_frame("10000,10000"));
        let conn = h.manager.connection();

        assert!(h.manager.disconnect());
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert!(h.transport.is_closed(conn));
        assert!(!h.manager.is_current(conn));
        assert_eq!(
            h.transport.sent_frames().last().map(|f| f.command),
            Some(Command::Disconnect)
        );
        assert!(h.timers.pending().is_empty());

        // Nothing live any more.
        assert!(!h.manager.disconnect());
    }

    #[test]
    fn test_reconnect_bumps_generation() {
        let mut h = harness(ClientConfig::default(), StaticToken::new("T"));
        h.manager.connect().expect("connect");
        let first = h.manager.connection();
        h.manager.teardown();
        h.manager.connect().expect("reconnect");
        assert_ne!(h.manager.connection(), first);
        assert!(!h.manager.is_current(first));
    }

    #[test]
    fn test_parse_heartbeat() {
        assert_eq!(parse_heartbeat(Some("100, 200")), (100, 200));
        assert_eq!(parse_heartbeat(Some("garbage")), (0, 0));
        assert_eq!(parse_heartbeat(None), (0, 0));
    }

    #[test]
    fn test_negotiate_heartbeat() {
        assert_eq!(negotiate_heartbeat(10_000, 4_000), Some(Duration::from_secs(10)));
        assert_eq!(negotiate_heartbeat(0, 4_000), None);
        assert_eq!(negotiate_heartbeat(10_000, 0), None);
    }
}
