//! HTTP request state
//!
//! One [`Request`] lives for the lifetime of the server and is reset, not
//! reallocated, between requests.

use crate::buffer::Bounded;
use arrayvec::ArrayString;

/// Capacity of the method field
pub const METHOD_CAPACITY: usize = 8;
/// Capacity of the path field
pub const PATH_CAPACITY: usize = 256;
/// Capacity of header names, header values and the stored origin
pub const HEADER_CAPACITY: usize = 64;
/// RFC 6455 keys are 16 random bytes, base64 encoded
pub const WEBSOCKET_KEY_LEN: usize = 24;

/// HTTP Method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Method {
    Get = 0,
    Post = 1,
    Put = 2,
    Delete = 3,
    Patch = 4,
    Head = 5,
    Options = 6,
    /// Anything else, including truncated method names
    Other = 255,
}

impl Method {
    /// Parse method from bytes - exact, case-sensitive match
    #[inline(always)]
    pub fn parse(bytes: &[u8]) -> Self {
        match bytes.first() {
            Some(b'G') if bytes == b"GET" => Method::Get,
            Some(b'P') => match bytes {
                b"POST" => Method::Post,
                b"PUT" => Method::Put,
                b"PATCH" => Method::Patch,
                _ => Method::Other,
            },
            Some(b'D') if bytes == b"DELETE" => Method::Delete,
            Some(b'H') if bytes == b"HEAD" => Method::Head,
            Some(b'O') if bytes == b"OPTIONS" => Method::Options,
            _ => Method::Other,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parser position within a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseState {
    #[default]
    Method,
    Path,
    Version,
    HeaderKey,
    HeaderValue,
    Body,
}

/// The in-flight HTTP request
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub(crate) state: ParseState,
    /// Bytes matched so far in the version literal
    pub(crate) version_offset: usize,
    /// The mandatory space after `:` has been seen
    pub(crate) value_started: bool,

    /// Request method, as received
    pub method: Bounded<METHOD_CAPACITY>,
    /// Request path, as received
    pub path: Bounded<PATH_CAPACITY>,
    pub(crate) header_key: Bounded<HEADER_CAPACITY>,
    pub(crate) header_value: Bounded<HEADER_CAPACITY>,

    /// Origin header, echoed back in CORS replies
    pub origin: Bounded<HEADER_CAPACITY>,
    /// Declared body length
    pub content_length: u64,
    /// X-Timestamp in milliseconds since the Unix epoch, 0 when absent
    pub timestamp_ms: u64,
    /// Host named a foreign `.local` alias; answer with a redirect
    pub redirect: bool,
    /// Authorization matched the configured Basic credential
    pub authenticated: bool,
    /// Client sent `Expect: 100-continue`
    pub expect: bool,
    /// Client asked for `application/json`
    pub json: bool,
    /// Client asked to upgrade to a WebSocket
    pub websocket: bool,
    pub websocket_version: u32,
    /// Only set when exactly 24 characters were received
    pub websocket_key: Option<ArrayString<WEBSOCKET_KEY_LEN>>,

    /// Headers are complete and the request is ready to route
    pub done: bool,
    /// At least one byte of this request has been received
    pub in_progress: bool,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed method
    pub fn method(&self) -> Method {
        if self.method.is_truncated() {
            return Method::Other;
        }
        Method::parse(self.method.as_bytes())
    }

    /// Current parser state
    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Return to the initial state for the next request
    pub fn reset(&mut self) {
        self.state = ParseState::Method;
        self.version_offset = 0;
        self.value_started = false;
        self.method.clear();
        self.path.clear();
        self.header_key.clear();
        self.header_value.clear();
        self.origin.clear();
        self.content_length = 0;
        self.timestamp_ms = 0;
        self.redirect = false;
        self.authenticated = false;
        self.expect = false;
        self.json = false;
        self.websocket = false;
        self.websocket_version = 0;
        self.websocket_key = None;
        self.done = false;
        self.in_progress = false;
    }

    /// Origin header value, if one was sent
    pub fn origin(&self) -> Option<&str> {
        self.origin.to_str().filter(|origin| !origin.is_empty())
    }
}
