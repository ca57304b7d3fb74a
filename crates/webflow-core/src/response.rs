//! Response emission
//!
//! Replies are written straight to the socket as a list of fragments; no
//! response object is ever assembled in memory. Every reply carries the CORS
//! pair when the request supplied an Origin.

use crate::error::Error;
use crate::handlers::StaticAsset;
use crate::net::{self, Connection};
use crate::request::Request;
use crate::Result;
use arrayvec::ArrayString;
use std::fmt::Write as _;

/// HTTP Status Code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    // 1xx Informational
    pub const CONTINUE: StatusCode = StatusCode(100);
    pub const SWITCHING_PROTOCOLS: StatusCode = StatusCode(101);

    // 2xx Success
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const NO_CONTENT: StatusCode = StatusCode(204);

    // 3xx Redirection
    pub const MOVED_PERMANENTLY: StatusCode = StatusCode(301);

    // 4xx Client Errors
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const CONFLICT: StatusCode = StatusCode(409);
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    pub const URI_TOO_LONG: StatusCode = StatusCode(414);
    pub const EXPECTATION_FAILED: StatusCode = StatusCode(417);

    // 5xx Server Errors
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);

    /// Get the numeric code
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Get the reason phrase
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            301 => "Moved Permanently",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            409 => "Conflict",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            417 => "Expectation Failed",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            _ => "Unknown",
        }
    }

    /// Check if this is a success status (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    /// Check if this is a client error status (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.0)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.0, self.reason_phrase())
    }
}

const PROTOCOL_ERROR: &[u8] = b"HTTP/1.1 501 Not Implemented\r\n\r\n";
const CONFLICT_BODY: &str = "USB storage active.";

/// Decimal rendering without touching the heap
pub(crate) fn decimal(n: u64) -> ArrayString<20> {
    let mut out = ArrayString::new();
    // u64::MAX has 20 digits
    let _ = write!(out, "{}", n);
    out
}

fn hex(n: usize) -> ArrayString<16> {
    let mut out = ArrayString::new();
    let _ = write!(out, "{:X}", n);
    out
}

/// Bare 501 for requests too malformed to route
pub fn reply_protocol_error<C: Connection + ?Sized>(conn: &mut C, max_attempts: u32) -> Result<()> {
    conn.set_nodelay(true);
    net::send_all(conn, PROTOCOL_ERROR, max_attempts)
}

/// Per-request writer: the peer socket, the CORS origin to echo, and what is
/// left of the declared body.
pub struct ResponseWriter<'a, C: Connection + ?Sized> {
    conn: &'a mut C,
    origin: Option<&'a str>,
    max_attempts: u32,
    body_remaining: u64,
    expect: bool,
    continue_sent: bool,
}

impl<'a, C: Connection + ?Sized> ResponseWriter<'a, C> {
    pub fn new(conn: &'a mut C, request: &'a Request, max_attempts: u32) -> Self {
        Self {
            conn,
            origin: request.origin(),
            max_attempts: max_attempts.max(1),
            body_remaining: request.content_length,
            expect: request.expect,
            continue_sent: false,
        }
    }

    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        net::send_all(&mut *self.conn, bytes, self.max_attempts)
    }

    /// Send fragments in order
    pub fn send_strs(&mut self, parts: &[&str]) -> Result<()> {
        for part in parts {
            self.send_raw(part.as_bytes())?;
        }
        Ok(())
    }

    fn status_line(&mut self, status: StatusCode) -> Result<()> {
        let code = decimal(u64::from(status.as_u16()));
        self.send_strs(&["HTTP/1.1 ", code.as_str(), " ", status.reason_phrase(), "\r\n"])
    }

    fn cors_headers(&mut self) -> Result<()> {
        if let Some(origin) = self.origin {
            self.send_strs(&[
                "Access-Control-Allow-Credentials: true\r\n",
                "Vary: Origin, Accept, Upgrade\r\n",
                "Access-Control-Allow-Origin: ",
                origin,
                "\r\n",
            ])?;
        }
        Ok(())
    }

    /// CORS headers then the blank line
    fn end_headers(&mut self) -> Result<()> {
        self.cors_headers()?;
        self.send_raw(b"\r\n")
    }

    /// Status line, `Content-Length: 0`, CORS, done
    pub fn reply_empty(&mut self, status: StatusCode) -> Result<()> {
        self.status_line(status)?;
        self.send_raw(b"Content-Length: 0\r\n")?;
        self.end_headers()
    }

    /// The reply a request-scoped error produces
    pub fn reply_error(&mut self, err: &Error, realm: &str) -> Result<()> {
        match err.status() {
            Some(StatusCode::UNAUTHORIZED) => self.reply_unauthorized(realm),
            Some(StatusCode::CONFLICT) => self.reply_conflict(),
            Some(status) => self.reply_empty(status),
            None => Ok(()),
        }
    }

    pub fn reply_unauthorized(&mut self, realm: &str) -> Result<()> {
        self.status_line(StatusCode::UNAUTHORIZED)?;
        self.send_strs(&[
            "Content-Length: 0\r\n",
            "WWW-Authenticate: Basic realm=\"",
            realm,
            "\"\r\n",
        ])?;
        self.end_headers()
    }

    pub fn reply_conflict(&mut self) -> Result<()> {
        let len = decimal(CONFLICT_BODY.len() as u64);
        self.status_line(StatusCode::CONFLICT)?;
        self.send_strs(&["Content-Length: ", len.as_str(), "\r\n"])?;
        self.end_headers()?;
        self.send_raw(CONFLICT_BODY.as_bytes())
    }

    /// Interim `100 Continue`, sent at most once
    pub fn reply_continue(&mut self) -> Result<()> {
        if self.continue_sent {
            return Ok(());
        }
        self.status_line(StatusCode::CONTINUE)?;
        self.end_headers()?;
        self.continue_sent = true;
        Ok(())
    }

    /// 301 to the canonical `<hostname>.local`
    pub fn reply_redirect(&mut self, websocket: bool, hostname: &str, path: &str) -> Result<()> {
        self.conn.set_nodelay(true);
        let scheme = if websocket { "ws" } else { "http" };
        self.status_line(StatusCode::MOVED_PERMANENTLY)?;
        self.send_strs(&[
            "Connection: close\r\n",
            "Content-Length: 0\r\n",
            "Location: ",
            scheme,
            "://",
            hostname,
            ".local",
            path,
            "\r\n",
        ])?;
        self.end_headers()
    }

    /// CORS preflight answer; write verbs only while storage is writable
    pub fn reply_access_control(&mut self, writable: bool) -> Result<()> {
        self.status_line(StatusCode::NO_CONTENT)?;
        self.send_strs(&[
            "Content-Length: 0\r\n",
            "Access-Control-Expose-Headers: Access-Control-Allow-Methods\r\n",
            "Access-Control-Allow-Headers: X-Timestamp, Content-Type\r\n",
            "Access-Control-Allow-Methods: GET, OPTIONS",
        ])?;
        if writable {
            self.send_raw(b", PUT, DELETE")?;
        }
        self.send_raw(b"\r\n")?;
        self.end_headers()
    }

    /// Headers for a fixed-length body the caller streams afterwards
    pub fn begin_body(&mut self, len: u64, content_type: &str) -> Result<()> {
        let len = decimal(len);
        self.status_line(StatusCode::OK)?;
        self.send_strs(&[
            "Content-Length: ",
            len.as_str(),
            "\r\n",
            "Content-Type: ",
            content_type,
            "\r\n",
        ])?;
        self.end_headers()
    }

    /// A compiled-in asset, in one go
    pub fn reply_static(&mut self, asset: &StaticAsset) -> Result<()> {
        let len = decimal(asset.body.len() as u64);
        self.status_line(StatusCode::OK)?;
        if let Some(encoding) = asset.encoding {
            self.send_strs(&["Content-Encoding: ", encoding, "\r\n"])?;
        }
        self.send_strs(&[
            "Content-Length: ",
            len.as_str(),
            "\r\n",
            "Content-Type: ",
            asset.content_type,
            "\r\n",
        ])?;
        self.end_headers()?;
        self.send_raw(&asset.body)
    }

    pub fn reply_switching_protocols(&mut self, accept: &str) -> Result<()> {
        self.status_line(StatusCode::SWITCHING_PROTOCOLS)?;
        self.send_strs(&[
            "Upgrade: websocket\r\n",
            "Connection: Upgrade\r\n",
            "Sec-WebSocket-Accept: ",
            accept,
            "\r\n",
        ])?;
        self.send_raw(b"\r\n")
    }

    /// 200 with a chunked JSON body to follow
    pub fn begin_chunked_json(&mut self) -> Result<()> {
        self.status_line(StatusCode::OK)?;
        self.send_strs(&[
            "Transfer-Encoding: chunked\r\n",
            "Content-Type: application/json\r\n",
        ])?;
        self.end_headers()
    }

    /// All fragments as one chunk. An empty list sends nothing, since a
    /// zero-length chunk would end the body.
    pub fn chunk(&mut self, parts: &[&str]) -> Result<()> {
        let total: usize = parts.iter().map(|part| part.len()).sum();
        if total == 0 {
            return Ok(());
        }
        let len = hex(total);
        self.send_strs(&[len.as_str(), "\r\n"])?;
        self.send_strs(parts)?;
        self.send_raw(b"\r\n")
    }

    /// Terminating zero-length chunk
    pub fn end_chunks(&mut self) -> Result<()> {
        self.send_raw(b"0\r\n\r\n")
    }

    /// Declared body bytes not yet read
    pub fn body_remaining(&self) -> u64 {
        self.body_remaining
    }

    /// Whether the client holds its body back until it sees `100 Continue`
    pub fn body_withheld(&self) -> bool {
        self.expect && !self.continue_sent
    }

    /// Read the next slice of the request body. Returns 0 once the declared
    /// length has been consumed.
    pub fn read_body(&mut self, buf: &mut [u8]) -> Result<usize> {
        let want = (buf.len() as u64).min(self.body_remaining) as usize;
        if want == 0 {
            return Ok(0);
        }
        let n = net::recv_some(&mut *self.conn, &mut buf[..want], self.max_attempts)?;
        self.body_remaining -= n as u64;
        Ok(n)
    }

    /// Throw away whatever is left of the body to stay aligned with the
    /// next request on this connection.
    pub fn discard_body(&mut self) -> Result<()> {
        let mut scratch = [0u8; 64];
        while self.read_body(&mut scratch)? > 0 {}
        Ok(())
    }

    pub fn connection(&mut self) -> &mut C {
        &mut *self.conn
    }
}
