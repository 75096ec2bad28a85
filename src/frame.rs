//! STOMP frame codec.
//!
//! Text frames, NUL-terminated:
//!
//! ```text
//! COMMAND\n
//! key:value\n      (zero or more)
//! \n
//! body\0
//! ```
//!
//! Header keys and values are escaped per STOMP 1.2 (`\\`, `\n`, `\r`, `\c`)
//! for every command except `CONNECT` and `CONNECTED`, which are sent raw.
//! Bare EOLs between frames are heart-beats and are skipped.
//!
//! [`decode`] parses a complete chunk. [`FrameDecoder`] is the streaming
//! variant: it buffers a trailing partial frame until its NUL arrives, so a
//! frame split across transport chunks still decodes.
//!
//! Rust guideline compliant 2025-01

/// Frame terminator.
pub const NUL: char = '\0';

/// A client heart-beat: a single EOL outside any frame.
pub const HEARTBEAT: &str = "\n";

/// Maximum bytes held for an unterminated frame before the buffer is dropped.
const MAX_BUFFERED_BYTES: usize = 1024 * 1024;

/// STOMP command token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client handshake.
    Connect,
    /// Server handshake acknowledgement.
    Connected,
    /// Register interest in a destination.
    Subscribe,
    /// Cancel a subscription by id.
    Unsubscribe,
    /// Publish to a destination.
    Send,
    /// Server delivery for a subscription.
    Message,
    /// Server acknowledgement of a `receipt` header.
    Receipt,
    /// Server-side failure; the server closes the session after sending it.
    Error,
    /// Graceful client shutdown.
    Disconnect,
}

impl Command {
    /// Wire token for this command.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Send => "SEND",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    /// Parse a wire token. Returns `None` for unknown commands.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "CONNECT" => Self::Connect,
            "CONNECTED" => Self::Connected,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "SEND" => Self::Send,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            "DISCONNECT" => Self::Disconnect,
            _ => return None,
        })
    }

    /// Whether header keys/values are escaped on the wire for this command.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered frame headers.
///
/// Repeated keys are kept in order; [`Headers::get`] returns the first one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// First value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate headers in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of header lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// One decoded or to-be-encoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command token.
    pub command: Command,
    /// Headers in wire order.
    pub headers: Headers,
    /// UTF-8 body, possibly empty.
    pub body: String,
}

impl Frame {
    /// Frame with no headers and an empty body.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Headers::new(),
            body: String::new(),
        }
    }

    /// Builder-style header append.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(key, value);
        self
    }

    /// Builder-style body setter.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// The `destination` header, if present.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.headers.get("destination")
    }

    /// Encode to wire format.
    #[must_use]
    pub fn encode(&self) -> String {
        encode(self.command, &self.headers, &self.body)
    }

    /// Parse a single NUL-stripped fragment.
    ///
    /// Leading EOLs (heart-beats) are skipped. Returns `Ok(None)` when the
    /// fragment holds nothing but heart-beats.
    pub fn parse(fragment: &str) -> Result<Option<Self>, FrameError> {
        let fragment = fragment.trim_start_matches(['\n', '\r']);
        if fragment.is_empty() {
            return Ok(None);
        }

        let (command_line, mut rest) = next_line(fragment);
        let command =
            Command::parse(command_line).ok_or_else(|| FrameError::UnknownCommand(command_line.to_string()))?;
        let escaped = command.escapes_headers();

        let mut headers = Headers::new();
        let mut body = "";
        while !rest.is_empty() {
            let (line, remainder) = next_line(rest);
            if line.is_empty() {
                body = remainder;
                break;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::InvalidHeader(line.to_string()))?;
            if escaped {
                headers.push(unescape(key)?, unescape(value)?);
            } else {
                headers.push(key, value);
            }
            rest = remainder;
        }

        Ok(Some(Self {
            command,
            headers,
            body: body.to_string(),
        }))
    }
}

/// Why a fragment could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// First line is not a known command.
    UnknownCommand(String),
    /// A header line has no `:` separator.
    InvalidHeader(String),
    /// A header contains an undefined `\x` escape.
    InvalidEscape(String),
    /// An unterminated frame grew past the buffer limit.
    Oversized(usize),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownCommand(cmd) => {
                write!(f, "unknown command {:?}", crate::error::truncate(cmd, 40))
            }
            Self::InvalidHeader(line) => {
                write!(f, "header line without ':' {:?}", crate::error::truncate(line, 80))
            }
            Self::InvalidEscape(raw) => write!(f, "invalid header escape in {raw:?}"),
            Self::Oversized(len) => write!(f, "unterminated frame exceeded {len} bytes"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Encode a frame: command line, header lines, blank line, body, NUL.
///
/// `CONNECT` and `CONNECTED` headers cannot carry escapes, so CR and LF are
/// dropped from their keys and values. Every other frame round-trips through
/// [`decode`] unchanged.
#[must_use]
pub fn encode(command: Command, headers: &Headers, body: &str) -> String {
    let mut out = String::with_capacity(command.as_str().len() + body.len() + 32 * headers.len() + 3);
    out.push_str(command.as_str());
    out.push('\n');
    for (key, value) in headers.iter() {
        if command.escapes_headers() {
            escape_into(&mut out, key);
            out.push(':');
            escape_into(&mut out, value);
        } else {
            push_raw(&mut out, key);
            out.push(':');
            push_raw(&mut out, value);
        }
        out.push('\n');
    }
    out.push('\n');
    out.push_str(body);
    out.push(NUL);
    out
}

/// Decode a complete chunk into frames.
///
/// Splits on NUL, skips empty and heart-beat-only fragments, and parses each
/// remaining fragment independently so one bad frame does not hide the rest.
#[must_use]
pub fn decode(raw: &str) -> Vec<Result<Frame, FrameError>> {
    raw.split(NUL)
        .filter_map(|fragment| Frame::parse(fragment).transpose())
        .collect()
}

/// Streaming decoder tolerant of arbitrary chunk boundaries.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    /// Empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame completed by it, in order.
    pub fn push(&mut self, chunk: &str) -> Vec<Result<Frame, FrameError>> {
        self.buffer.push_str(chunk);

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.find(NUL) {
            let result = Frame::parse(&self.buffer[..end]).transpose();
            self.buffer.drain(..=end);
            frames.extend(result);
        }

        if self.buffer.trim_start_matches(['\n', '\r']).is_empty() {
            self.buffer.clear();
        } else if self.buffer.len() > MAX_BUFFERED_BYTES {
            let len = self.buffer.len();
            self.buffer.clear();
            frames.push(Err(FrameError::Oversized(len)));
        }

        frames
    }

    /// Whether a partial frame is waiting for its terminator.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Drop any buffered partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Split off one line, tolerating CRLF. Returns (line, rest after newline).
fn next_line(s: &str) -> (&str, &str) {
    match s.find('\n') {
        Some(pos) => (s[..pos].trim_end_matches('\r'), &s[pos + 1..]),
        None => (s.trim_end_matches('\r'), ""),
    }
}

fn push_raw(out: &mut String, raw: &str) {
    out.extend(raw.chars().filter(|&c| c != '\n' && c != '\r'));
}

fn escape_into(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
}

fn unescape(raw: &str) -> Result<String, FrameError> {
    if !raw.contains('\\') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(raw: &str) -> Vec<Frame> {
        decode(raw)
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .expect("all fragments should parse")
    }

    #[test]
    fn test_encode_wire_layout() {
        let frame = Frame::new(Command::Send)
            .header("destination", "/app/chat-message")
            .header("content-type", "application/json")
            .body("{\"a\":1}");
        assert_eq!(
            frame.encode(),
            "SEND\ndestination:/app/chat-message\ncontent-type:application/json\n\n{\"a\":1}\0"
        );
    }

    #[test]
    fn test_encode_no_headers_no_body() {
        assert_eq!(Frame::new(Command::Disconnect).encode(), "DISCONNECT\n\n\0");
    }

    #[test]
    fn test_round_trip_preserves_command_headers_body() {
        let cases = [
            Frame::new(Command::Disconnect),
            Frame::new(Command::Message).body("multi\nline\n\nbody"),
            Frame::new(Command::Subscribe)
                .header("id", "sub-7-0")
                .header("destination", "/topic/chat/7"),
            Frame::new(Command::Send)
                .header("weird:key", "line1\nline2\\end")
                .body("x"),
            Frame::new(Command::Connect)
                .header("accept-version", "1.2")
                .header("Authorization", "Bearer a:b"),
        ];
        for frame in cases {
            let decoded = parsed(&frame.encode());
            assert_eq!(decoded, vec![frame]);
        }
    }

    #[test]
    fn test_header_value_splits_on_first_colon() {
        let frames = parsed("MESSAGE\ndestination:/topic/chat/1\ntime:12:30:00\n\n{}\0");
        assert_eq!(frames[0].headers.get("time"), Some("12:30:00"));
    }

    #[test]
    fn test_connected_headers_are_not_unescaped() {
        let frames = parsed("CONNECTED\nuser-name:a\\cb\n\n\0");
        assert_eq!(frames[0].headers.get("user-name"), Some("a\\cb"));
    }

    #[test]
    fn test_connect_header_line_breaks_are_dropped() {
        let frame = Frame::new(Command::Connect)
            .header("login", "a\nb")
            .header("pass\r", "c");
        let decoded = parsed(&frame.encode());
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].headers.get("login"), Some("ab"));
        assert_eq!(decoded[0].headers.get("pass"), Some("c"));
    }

    #[test]
    fn test_repeated_header_first_wins() {
        let frames = parsed("MESSAGE\nfoo:first\nfoo:second\n\n\0");
        assert_eq!(frames[0].headers.get("foo"), Some("first"));
        assert_eq!(frames[0].headers.len(), 2);
    }

    #[test]
    fn test_decode_batched_frames_in_order() {
        let raw = format!(
            "{}\n{}",
            Frame::new(Command::Connected).header("version", "1.2").encode(),
            Frame::new(Command::Message).header("destination", "/topic/chat/1").body("{}").encode()
        );
        let frames = parsed(&raw);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, Command::Connected);
        assert_eq!(frames[1].command, Command::Message);
    }

    #[test]
    fn test_decode_skips_heartbeats_and_empty_fragments() {
        assert!(decode("\n").is_empty());
        assert!(decode("\0\0\r\n").is_empty());
        assert!(decode("").is_empty());
    }

    #[test]
    fn test_decode_accepts_crlf_lines() {
        let frames = parsed("CONNECTED\r\nversion:1.2\r\n\r\n\0");
        assert_eq!(frames[0].command, Command::Connected);
        assert_eq!(frames[0].headers.get("version"), Some("1.2"));
    }

    #[test]
    fn test_headers_without_blank_line_leave_empty_body() {
        let frames = parsed("CONNECTED\nversion:1.2\0");
        assert_eq!(frames[0].headers.get("version"), Some("1.2"));
        assert_eq!(frames[0].body, "");
    }

    #[test]
    fn test_malformed_fragment_does_not_hide_others() {
        let results = decode("BOGUS\n\n\0MESSAGE\nnocolon\n\n\0RECEIPT\nreceipt-id:1\n\n\0");
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], Err(FrameError::UnknownCommand("BOGUS".to_string())));
        assert_eq!(results[1], Err(FrameError::InvalidHeader("nocolon".to_string())));
        assert!(matches!(&results[2], Ok(f) if f.command == Command::Receipt));
    }

    #[test]
    fn test_invalid_escape_rejected() {
        let results = decode("MESSAGE\nkey:bad\\t\n\n\0");
        assert!(matches!(results[0], Err(FrameError::InvalidEscape(_))));
    }

    #[test]
    fn test_streaming_decoder_joins_split_frame() {
        let wire = Frame::new(Command::Message)
            .header("destination", "/topic/chat/3")
            .body("{\"content\":\"hello\"}")
            .encode();
        let (a, b) = wire.split_at(17);

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(a).is_empty());
        assert!(decoder.has_partial());

        let frames = decoder.push(b);
        assert_eq!(frames.len(), 1);
        let frame = frames[0].as_ref().expect("frame parses");
        assert_eq!(frame.body, "{\"content\":\"hello\"}");
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_streaming_decoder_drops_trailing_heartbeats() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push("RECEIPT\nreceipt-id:9\n\n\0\n\n");
        assert_eq!(frames.len(), 1);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_streaming_decoder_reset() {
        let mut decoder = FrameDecoder::new();
        decoder.push("MESSAGE\ndest");
        decoder.reset();
        assert!(!decoder.has_partial());
        assert!(decoder.push("ination:x\n\n\0").iter().all(Result::is_err));
    }
}
