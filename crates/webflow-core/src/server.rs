//! Connection lifecycle and background scheduler
//!
//! One listening socket, at most one active connection, one in-flight
//! request. A newly accepted connection always replaces the active one.

use crate::config::ServerConfig;
use crate::discovery::{Discovery, StaticDiscovery, SERVICE_PROTOCOL, SERVICE_TYPE};
use crate::handlers::AssetTable;
use crate::net::{Connection, Listener};
use crate::parser::{HeaderContext, ParseOutcome};
use crate::request::Request;
use crate::response::reply_protocol_error;
use crate::router::{self, RouteContext, Routed};
use crate::storage::{MassStorageLock, NoMassStorage, Storage};
use crate::websocket::{CloseOnHandoff, WebSocketSink};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use tracing::{debug, error, info, warn};

/// The code runner's reload hook
pub trait Autoreload {
    /// Hold off reloads while a request is in flight
    fn suspend(&mut self);
    fn resume(&mut self);
    /// The filesystem changed; reload once nothing is suspended
    fn trigger(&mut self);
}

/// For hosts without a code runner
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAutoreload;

impl Autoreload for NoAutoreload {
    fn suspend(&mut self) {}
    fn resume(&mut self) {}
    fn trigger(&mut self) {}
}

/// Builder for [`Server`]
pub struct ServerBuilder<L: Listener, S: Storage> {
    config: ServerConfig,
    listener: L,
    storage: S,
    usb: Box<dyn MassStorageLock>,
    discovery: Box<dyn Discovery>,
    autoreload: Box<dyn Autoreload>,
    websockets: Box<dyn WebSocketSink<L::Stream>>,
    assets: AssetTable,
    ipv4: Ipv4Addr,
}

impl<L: Listener, S: Storage> ServerBuilder<L, S> {
    pub fn new(listener: L, storage: S) -> Self {
        Self {
            config: ServerConfig::default(),
            listener,
            storage,
            usb: Box::new(NoMassStorage),
            discovery: Box::new(StaticDiscovery::new("circuitpython")),
            autoreload: Box::new(NoAutoreload),
            websockets: Box::new(CloseOnHandoff),
            assets: AssetTable::new(),
            ipv4: Ipv4Addr::LOCALHOST,
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn mass_storage(mut self, lock: impl MassStorageLock + 'static) -> Self {
        self.usb = Box::new(lock);
        self
    }

    pub fn discovery(mut self, discovery: impl Discovery + 'static) -> Self {
        self.discovery = Box::new(discovery);
        self
    }

    pub fn autoreload(mut self, autoreload: impl Autoreload + 'static) -> Self {
        self.autoreload = Box::new(autoreload);
        self
    }

    pub fn websockets(mut self, sink: impl WebSocketSink<L::Stream> + 'static) -> Self {
        self.websockets = Box::new(sink);
        self
    }

    pub fn assets(mut self, assets: AssetTable) -> Self {
        self.assets = assets;
        self
    }

    /// Our address as peers see it
    pub fn ipv4(mut self, ipv4: Ipv4Addr) -> Self {
        self.ipv4 = ipv4;
        self
    }

    /// Advertise the service and return the ready server
    pub fn build(mut self) -> Server<L, S> {
        self.discovery.advertise(
            &self.config.board.board_name,
            SERVICE_TYPE,
            SERVICE_PROTOCOL,
            self.config.port,
        );
        info!(
            hostname = self.discovery.hostname(),
            port = self.config.port,
            auth = self.config.has_password(),
            "web workflow ready"
        );

        Server {
            config: self.config,
            listener: Some(self.listener),
            active: None,
            peer: None,
            request: Request::new(),
            storage: self.storage,
            usb: self.usb,
            discovery: self.discovery,
            autoreload: self.autoreload,
            websockets: self.websockets,
            assets: self.assets,
            ipv4: self.ipv4,
        }
    }
}

/// The web workflow server. Owns every piece of server state; nothing
/// else holds it beyond a call.
pub struct Server<L: Listener, S: Storage> {
    config: ServerConfig,
    listener: Option<L>,
    active: Option<L::Stream>,
    peer: Option<SocketAddr>,
    request: Request,
    storage: S,
    usb: Box<dyn MassStorageLock>,
    discovery: Box<dyn Discovery>,
    autoreload: Box<dyn Autoreload>,
    websockets: Box<dyn WebSocketSink<L::Stream>>,
    assets: AssetTable,
    ipv4: Ipv4Addr,
}

impl<L: Listener, S: Storage> Server<L, S> {
    pub fn builder(listener: L, storage: S) -> ServerBuilder<L, S> {
        ServerBuilder::new(listener, storage)
    }

    /// One background tick: accept at most one connection, then feed the
    /// parser whatever bytes are already waiting. Never blocks.
    pub fn background(&mut self) {
        self.poll_accept();
        if self.active.is_some() {
            self.pump();
        }
    }

    fn poll_accept(&mut self) {
        let Some(listener) = self.listener.as_mut() else {
            return;
        };
        match listener.accept() {
            Ok(None) => {}
            Ok(Some((mut conn, addr))) => {
                if let Err(e) = conn.set_nonblocking() {
                    warn!(peer = %addr, error = %e, "could not make socket non-blocking");
                    conn.close();
                    return;
                }
                if self.active.is_some() {
                    debug!(peer = ?self.peer, "dropping active connection for a new one");
                    self.drop_connection();
                }
                info!(peer = %addr, "accepted");
                self.request.reset();
                self.active = Some(conn);
                self.peer = Some(addr);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                error!(error = %e, "listener failed, closing it");
                listener.close();
                self.listener = None;
            }
        }
    }

    fn pump(&mut self) {
        let max_attempts = self.config.max_send_attempts;
        loop {
            let Some(conn) = self.active.as_mut() else {
                return;
            };
            if !conn.is_connected() {
                self.drop_connection();
                return;
            }

            let mut byte = [0u8; 1];
            match conn.recv(&mut byte) {
                Ok(0) => {
                    debug!(peer = ?self.peer, "peer closed");
                    self.drop_connection();
                    return;
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(peer = ?self.peer, error = %e, "recv failed");
                    self.drop_connection();
                    return;
                }
            }

            if !self.request.in_progress {
                self.autoreload.suspend();
                self.request.in_progress = true;
            }

            let ctx = HeaderContext {
                hostname: self.discovery.hostname(),
                auth_token: self.config.auth_token.as_ref().map(|token| token.as_str()),
            };
            match self.request.feed(byte[0], &ctx) {
                ParseOutcome::NeedMore => {}
                ParseOutcome::Error(reason) => {
                    warn!(peer = ?self.peer, reason, "malformed request");
                    if let Err(e) = reply_protocol_error(conn, max_attempts) {
                        debug!(error = %e, "could not send 501");
                    }
                    self.drop_connection();
                    return;
                }
                ParseOutcome::HeadersComplete => {
                    self.finish_request();
                    return;
                }
            }
        }
    }

    fn finish_request(&mut self) {
        let Some(conn) = self.active.as_mut() else {
            return;
        };
        let mut ctx = RouteContext {
            config: &self.config,
            storage: &mut self.storage,
            usb: &*self.usb,
            discovery: &mut *self.discovery,
            assets: &self.assets,
            ipv4: self.ipv4,
        };
        let outcome = router::route(&mut ctx, conn, &self.request);

        self.request.reset();
        self.autoreload.resume();

        match outcome {
            Ok(Routed::Done { reload, close }) => {
                if close {
                    self.close_active();
                }
                if reload {
                    self.autoreload.trigger();
                }
            }
            Ok(Routed::Upgraded) => {
                self.peer = None;
                if let Some(conn) = self.active.take() {
                    self.websockets.handoff(conn);
                }
            }
            Err(e) => {
                debug!(peer = ?self.peer, error = %e, "connection abandoned");
                self.close_active();
            }
        }
    }

    /// Close the active connection, releasing the autoreload hold of an
    /// unfinished request.
    fn drop_connection(&mut self) {
        if self.request.in_progress {
            self.autoreload.resume();
        }
        self.request.reset();
        self.close_active();
    }

    fn close_active(&mut self) {
        if let Some(mut conn) = self.active.take() {
            conn.close();
        }
        self.peer = None;
    }

    /// Close the active connection and stop listening
    pub fn shutdown(&mut self) {
        self.drop_connection();
        if let Some(mut listener) = self.listener.take() {
            listener.close();
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The request being parsed on the active connection
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn has_active_connection(&self) -> bool {
        self.active.is_some()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }
}
