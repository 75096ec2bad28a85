//! Mango Chat - real-time chat transport client.
//!
//! Connects to a chat server over STOMP (on a plain WebSocket or a
//! SockJS-framed one), keeps per-room and personal subscriptions, and
//! delivers parsed JSON payloads to callbacks.
//!
//! # Architecture
//!
//! ```text
//!   transport task ─┐                      ┌─► SubscriptionRegistry ─► callbacks
//!   timer tasks ────┼─► ClientEvent ─► ChatClient
//!                   │   channel            └─► ConnectionManager ─► TransportSocket
//! ```
//!
//! Background tasks only post [`ClientEvent`]s; all state lives in
//! [`ChatClient`] and is mutated on the task that drains the channel.
//!
//! # Modules
//!
//! - [`frame`] - STOMP frame codec and streaming decoder
//! - [`connection`] - handshake state machine, timeouts, heart-beats
//! - [`subscription`] / [`dispatch`] - subscription table and MESSAGE routing
//! - [`transport`] - WebSocket, SockJS and in-memory transports
//! - [`config`] - configuration loading

pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod destination;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod frame;
pub mod message;
pub mod subscription;
pub mod timer;
pub mod transport;

// Re-export commonly used types
pub use auth::{EnvToken, StaticToken, TokenProvider};
pub use client::{ChatClient, ConnectionStatus};
pub use config::{ClientConfig, TransportKind};
pub use connection::HandshakeRetry;
pub use error::{ChatError, ConnectionError, PayloadError, ProtocolError, ValidationError};
pub use events::{ClientEvent, EventReceiver, EventSender};
pub use message::{ChatMessage, ChatNotification, MessageType, ReadStatusUpdate, SendFailure, SendReceipt};
pub use subscription::PayloadCallback;
