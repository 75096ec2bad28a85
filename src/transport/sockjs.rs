//! SockJS session framing.
//!
//! A SockJS server wraps everything it sends in a one-letter envelope:
//!
//! ```text
//! o                    session opened
//! h                    heartbeat
//! a["frame1","frame2"] one or more payload strings
//! c[3000,"Go away!"]   session closed
//! ```
//!
//! Clients send a JSON array of strings. Only the envelope is handled here;
//! the STOMP content inside is left to the frame decoder.

use rand::Rng;

/// Classification of one inbound transport chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// Open or heartbeat marker; nothing to decode.
    Control,
    /// Payload strings unwrapped from an `a[...]` (or bare `[...]`) array.
    Payloads(Vec<String>),
    /// Session close with code and reason.
    Close {
        /// SockJS close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// Not SockJS-framed; decode as-is.
    Raw(&'a str),
}

/// Classify an inbound chunk. Cheap for the common raw STOMP case.
#[must_use]
pub fn classify(raw: &str) -> Inbound<'_> {
    match raw {
        "o" | "h" => return Inbound::Control,
        _ => {}
    }

    if let Some(array) = raw.strip_prefix('a').filter(|rest| rest.starts_with('[')) {
        if let Ok(payloads) = serde_json::from_str::<Vec<String>>(array) {
            return Inbound::Payloads(payloads);
        }
        log::debug!("[SockJS] 'a' chunk is not a string array, decoding raw");
        return Inbound::Raw(raw);
    }

    if let Some(array) = raw.strip_prefix('c').filter(|rest| rest.starts_with('[')) {
        if let Ok((code, reason)) = serde_json::from_str::<(u16, String)>(array) {
            return Inbound::Close { code, reason };
        }
    }

    if raw.starts_with('[') {
        if let Ok(payloads) = serde_json::from_str::<Vec<String>>(raw) {
            return Inbound::Payloads(payloads);
        }
    }

    Inbound::Raw(raw)
}

/// Wrap an outbound chunk as a SockJS message array.
#[must_use]
pub fn wrap_outbound(text: &str) -> String {
    serde_json::Value::Array(vec![serde_json::Value::String(text.to_string())]).to_string()
}

/// Random `/{server}/{session}/websocket` suffix for a SockJS endpoint.
#[must_use]
pub fn session_path() -> String {
    let server: u16 = rand::rng().random_range(0..1000);
    let session = uuid::Uuid::new_v4().simple().to_string();
    format!("/{server:03}/{session}/websocket")
}
