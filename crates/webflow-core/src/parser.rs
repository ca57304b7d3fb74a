//! Byte-at-a-time HTTP/1.1 request parser
//!
//! The scheduler hands the parser one byte per call straight off a
//! non-blocking socket. Only the request line and headers are parsed; the
//! body stays on the socket for the handler to stream.

use crate::request::{ParseState, Request, WEBSOCKET_KEY_LEN};
use arrayvec::ArrayString;
use tracing::debug;

const SUPPORTED_VERSION: &[u8] = b"HTTP/1.1\r";

/// Result of feeding one byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    NeedMore,
    HeadersComplete,
    /// Malformed request line or header framing
    Error(&'static str),
}

/// Server facts needed to interpret headers as they arrive
#[derive(Debug, Clone, Copy)]
pub struct HeaderContext<'a> {
    /// Our mDNS hostname, without `.local`
    pub hostname: &'a str,
    /// Pre-encoded Basic token, `None` when no password is configured
    pub auth_token: Option<&'a str>,
}

impl Request {
    /// Advance the state machine by one byte
    pub fn feed(&mut self, byte: u8, ctx: &HeaderContext<'_>) -> ParseOutcome {
        match self.state {
            ParseState::Method => {
                if byte == b' ' {
                    self.state = ParseState::Path;
                } else {
                    self.method.push(byte);
                }
            }
            ParseState::Path => {
                if byte == b' ' {
                    debug!(method = %self.method, path = %self.path, "request");
                    self.state = ParseState::Version;
                    self.version_offset = 0;
                } else {
                    self.path.push(byte);
                }
            }
            ParseState::Version => {
                if SUPPORTED_VERSION[self.version_offset] != byte {
                    return ParseOutcome::Error("unsupported HTTP version");
                }
                self.version_offset += 1;
                if self.version_offset == SUPPORTED_VERSION.len() {
                    self.header_key.clear();
                    self.state = ParseState::HeaderKey;
                }
            }
            ParseState::HeaderKey => match byte {
                b'\r' if self.header_key.is_empty() => self.state = ParseState::Body,
                b'\r' => return ParseOutcome::Error("header line without a colon"),
                b'\n' => {}
                b':' => {
                    self.header_value.clear();
                    self.value_started = false;
                    self.state = ParseState::HeaderValue;
                }
                _ => {
                    self.header_key.push(byte);
                }
            },
            ParseState::HeaderValue => {
                if !self.value_started {
                    if byte != b' ' {
                        return ParseOutcome::Error("header value must follow ': '");
                    }
                    self.value_started = true;
                } else if byte == b'\r' {
                    self.apply_header(ctx);
                    self.header_key.clear();
                    self.state = ParseState::HeaderKey;
                } else {
                    self.header_value.push(byte);
                }
            }
            ParseState::Body => {
                if self.done {
                    return ParseOutcome::HeadersComplete;
                }
                if byte != b'\n' {
                    return ParseOutcome::Error("blank line must end with CRLF");
                }
                self.done = true;
                return ParseOutcome::HeadersComplete;
            }
        }
        ParseOutcome::NeedMore
    }

    /// Interpret the header just completed. Unknown names are ignored.
    fn apply_header(&mut self, ctx: &HeaderContext<'_>) {
        let key = self.header_key.as_bytes();
        let value = self.header_value.as_bytes();
        debug!(key = %self.header_key, value = %self.header_value, "header");

        if key.eq_ignore_ascii_case(b"Authorization") {
            self.authenticated = !self.header_value.is_truncated()
                && match (ctx.auth_token, value.strip_prefix(b"Basic ")) {
                    (Some(token), Some(offered)) => token.as_bytes() == offered,
                    _ => false,
                };
        } else if key.eq_ignore_ascii_case(b"Host") {
            self.redirect = is_foreign_local_host(value, ctx.hostname);
        } else if key.eq_ignore_ascii_case(b"Content-Length") {
            self.content_length = parse_decimal(value);
        } else if key.eq_ignore_ascii_case(b"Expect") {
            self.expect = value.eq_ignore_ascii_case(b"100-continue");
        } else if key.eq_ignore_ascii_case(b"Accept") {
            self.json = value
                .split(|b| *b == b',')
                .any(|media| media.trim_ascii().starts_with(b"application/json"));
        } else if key.eq_ignore_ascii_case(b"Origin") {
            self.origin.copy_from(&self.header_value);
        } else if key.eq_ignore_ascii_case(b"X-Timestamp") {
            self.timestamp_ms = parse_decimal(value);
        } else if key.eq_ignore_ascii_case(b"Upgrade") {
            self.websocket = value.eq_ignore_ascii_case(b"websocket");
        } else if key.eq_ignore_ascii_case(b"Sec-WebSocket-Version") {
            self.websocket_version = parse_decimal(value).min(u32::MAX as u64) as u32;
        } else if key.eq_ignore_ascii_case(b"Sec-WebSocket-Key") {
            if value.len() == WEBSOCKET_KEY_LEN && !self.header_value.is_truncated() {
                self.websocket_key = std::str::from_utf8(value)
                    .ok()
                    .and_then(|key| ArrayString::from(key).ok());
            }
        }
    }
}

/// Leading decimal digits, saturating. Anything unparsable reads as 0.
pub(crate) fn parse_decimal(value: &[u8]) -> u64 {
    value
        .trim_ascii_start()
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0u64, |acc, digit| {
            acc.saturating_mul(10).saturating_add(u64::from(digit - b'0'))
        })
}

/// A `.local` host that is not ours, e.g. the generic `circuitpython.local`
/// alias every device answers to.
fn is_foreign_local_host(value: &[u8], hostname: &str) -> bool {
    let host = match value.iter().position(|b| *b == b':') {
        Some(colon) => &value[..colon],
        None => value,
    };
    let Some(name) = host.strip_suffix(b".local") else {
        return false;
    };
    !name.eq_ignore_ascii_case(hostname.as_bytes())
}
