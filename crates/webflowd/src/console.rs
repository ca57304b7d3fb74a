//! Serial console over WebSocket
//!
//! Upgraded `/cp/serial/` sockets land here. A desktop host has no REPL, so
//! the console echoes what it receives and understands two commands that
//! drive the simulated USB host: `usb mount` and `usb eject`.

use crate::usb::UsbLock;
use bytes::{Buf, BytesMut};
use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use tracing::{debug, info, warn};
use webflow_core::net::send_all;
use webflow_core::{Connection, Frame, Opcode, WebSocketSink};

/// Largest unparsed input held per session before it is closed with 1009
pub const MAX_PENDING: usize = 4096;

const READ_CHUNK: usize = 256;

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_TOO_BIG: u16 = 1009;

struct Session<C> {
    conn: C,
    inbound: BytesMut,
    open: bool,
}

type Sessions<C> = Rc<RefCell<Vec<Session<C>>>>;

/// Owns the upgraded sockets and services them from the main loop
pub struct Console<C> {
    sessions: Sessions<C>,
    usb: UsbLock,
    max_send_attempts: u32,
}

/// Handed to the server; moves upgraded sockets into the [`Console`]
pub struct ConsoleSink<C> {
    sessions: Sessions<C>,
}

impl<C: Connection> WebSocketSink<C> for ConsoleSink<C> {
    fn handoff(&mut self, mut conn: C) {
        if let Err(e) = conn.set_nonblocking() {
            warn!(error = %e, "dropping console socket");
            conn.close();
            return;
        }
        info!("serial console attached");
        self.sessions.borrow_mut().push(Session {
            conn,
            inbound: BytesMut::with_capacity(READ_CHUNK),
            open: true,
        });
    }
}

impl<C: Connection> Console<C> {
    pub fn new(usb: UsbLock, max_send_attempts: u32) -> Self {
        Self {
            sessions: Rc::new(RefCell::new(Vec::new())),
            usb,
            max_send_attempts,
        }
    }

    pub fn sink(&self) -> ConsoleSink<C> {
        ConsoleSink {
            sessions: Rc::clone(&self.sessions),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.borrow().len()
    }

    /// Read whatever is available on every session and answer it
    pub fn poll(&mut self) {
        let mut sessions = self.sessions.borrow_mut();
        for session in sessions.iter_mut() {
            self.service(session);
        }
        sessions.retain(|session| session.open);
    }

    fn service(&self, session: &mut Session<C>) {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match session.conn.recv(&mut chunk) {
                Ok(0) => {
                    debug!("console peer hung up");
                    session.open = false;
                    session.conn.close();
                    return;
                }
                Ok(n) => session.inbound.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!(error = %e, "console read failed");
                    session.open = false;
                    session.conn.close();
                    return;
                }
            }
            if session.inbound.len() > MAX_PENDING {
                break;
            }
        }

        while session.open {
            let Some((frame, used)) = Frame::decode(&session.inbound) else {
                break;
            };
            session.inbound.advance(used);
            self.answer(session, frame);
        }

        if session.open && session.inbound.len() > MAX_PENDING {
            warn!(pending = session.inbound.len(), "console frame too large");
            self.hang_up(session, CLOSE_TOO_BIG, "too big");
        }
    }

    fn answer(&self, session: &mut Session<C>, frame: Frame) {
        match frame.opcode {
            Opcode::Close => self.hang_up(session, CLOSE_NORMAL, ""),
            Opcode::Ping => self.reply(session, Frame::pong(frame.payload)),
            Opcode::Pong => {}
            Opcode::Text if frame.fin => {
                let line = String::from_utf8_lossy(&frame.payload);
                let reply = match self.command(line.trim()) {
                    Some(status) => Frame::text(status),
                    None => Frame::text(line.into_owned()),
                };
                self.reply(session, reply);
            }
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                let echo = Frame {
                    mask: None,
                    ..frame
                };
                self.reply(session, echo);
            }
        }
    }

    fn command(&self, line: &str) -> Option<String> {
        let status = match line {
            "usb mount" if self.usb.set_host_mounted(true) => "usb: mounted",
            "usb mount" => "usb: busy",
            "usb eject" => {
                self.usb.set_host_mounted(false);
                "usb: ejected"
            }
            "usb" | "usb status" if self.usb.host_mounted() => "usb: mounted",
            "usb" | "usb status" => "usb: ejected",
            _ => return None,
        };
        Some(status.to_string())
    }

    fn reply(&self, session: &mut Session<C>, frame: Frame) {
        if send_all(&mut session.conn, &frame.encode(), self.max_send_attempts).is_err() {
            session.open = false;
            session.conn.close();
        }
    }

    fn hang_up(&self, session: &mut Session<C>, code: u16, reason: &str) {
        self.reply(session, Frame::close(code, reason));
        session.open = false;
        session.conn.close();
        info!(code, "serial console detached");
    }
}
