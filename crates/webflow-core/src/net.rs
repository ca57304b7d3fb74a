//! Socket collaborator traits
//!
//! Both traits follow `std::io` conventions: a socket with nothing to offer
//! returns `ErrorKind::WouldBlock`, and `Ok(0)` from `recv` means the peer
//! closed its side.

use crate::{Error, Result};
use std::io;
use std::net::SocketAddr;
use tracing::warn;

/// One accepted peer socket
pub trait Connection {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn set_nonblocking(&mut self) -> io::Result<()>;
    fn is_connected(&self) -> bool;
    fn close(&mut self);

    /// Disable Nagle so short final replies leave immediately
    fn set_nodelay(&mut self, _nodelay: bool) {}

    /// Yield point between would-block retries
    fn yield_now(&mut self) {
        std::thread::yield_now();
    }
}

/// The single listening socket
pub trait Listener {
    type Stream: Connection;

    /// Accept one pending connection, `Ok(None)` when nothing is waiting
    fn accept(&mut self) -> io::Result<Option<(Self::Stream, SocketAddr)>>;
    fn close(&mut self);
}

/// Receive at least one byte, retrying would-block up to `max_attempts`
/// times. A closed peer is an error here because the caller is owed bytes.
pub fn recv_some<C: Connection + ?Sized>(
    conn: &mut C,
    buf: &mut [u8],
    max_attempts: u32,
) -> Result<usize> {
    let mut attempts = 0;
    loop {
        match conn.recv(buf) {
            Ok(0) => return Err(Error::Transport(io::ErrorKind::UnexpectedEof.into())),
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                attempts += 1;
                if attempts >= max_attempts || !conn.is_connected() {
                    return Err(Error::Transport(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "peer stopped sending",
                    )));
                }
                conn.yield_now();
            }
            Err(e) => return Err(Error::Transport(e)),
        }
    }
}

/// Send all of `buf`, retrying would-block while the peer stays connected
pub fn send_all<C: Connection + ?Sized>(
    conn: &mut C,
    mut buf: &[u8],
    max_attempts: u32,
) -> Result<()> {
    let mut attempts = 0;
    while !buf.is_empty() {
        match conn.send(buf) {
            Ok(0) => {
                warn!(remaining = buf.len(), "short send");
                return Err(Error::Transport(io::ErrorKind::WriteZero.into()));
            }
            Ok(n) => {
                buf = &buf[n..];
                attempts = 0;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                attempts += 1;
                if attempts >= max_attempts || !conn.is_connected() {
                    warn!(remaining = buf.len(), "short send, giving up");
                    return Err(Error::Transport(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "peer stopped reading",
                    )));
                }
                conn.yield_now();
            }
            Err(e) => {
                warn!(remaining = buf.len(), error = %e, "short send");
                return Err(Error::Transport(e));
            }
        }
    }
    Ok(())
}
