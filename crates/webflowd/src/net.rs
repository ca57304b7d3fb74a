//! Non-blocking TCP sockets for the web workflow

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use tracing::debug;
use webflow_core::{Connection, Listener};

/// Create the listening socket: address reuse, non-blocking, and a backlog
/// of one since only one client is served at a time.
pub fn create_listener(addr: &SocketAddr) -> io::Result<Socket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // SO_REUSEADDR - restart without waiting out TIME_WAIT
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&(*addr).into())?;
    socket.listen(1)?;

    Ok(socket)
}

/// The single listening socket
pub struct TcpServerSocket {
    socket: Option<Socket>,
}

impl TcpServerSocket {
    pub fn bind(addr: &SocketAddr) -> io::Result<Self> {
        Ok(Self {
            socket: Some(create_listener(addr)?),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
            .and_then(|addr| addr.as_socket())
    }
}

impl Listener for TcpServerSocket {
    type Stream = TcpConnection;

    fn accept(&mut self) -> io::Result<Option<(TcpConnection, SocketAddr)>> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        match socket.accept() {
            Ok((peer, addr)) => {
                let Some(addr) = addr.as_socket() else {
                    debug!("dropping connection from a non-IP address");
                    return Ok(None);
                };
                Ok(Some((TcpConnection::new(peer.into()), addr)))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) {
        self.socket = None;
    }
}

/// An accepted peer
pub struct TcpConnection {
    stream: TcpStream,
    connected: bool,
}

impl TcpConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            connected: true,
        }
    }

    fn note(&mut self, result: io::Result<usize>) -> io::Result<usize> {
        match &result {
            Ok(0) => self.connected = false,
            Err(e)
                if !matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                self.connected = false
            }
            _ => {}
        }
        result
    }
}

impl Connection for TcpConnection {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.stream.read(buf);
        self.note(result)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.stream.write(buf);
        self.note(result)
    }

    fn set_nonblocking(&mut self) -> io::Result<()> {
        self.stream.set_nonblocking(true)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) {
        if self.connected {
            let _ = self.stream.shutdown(Shutdown::Both);
            self.connected = false;
        }
    }

    fn set_nodelay(&mut self, nodelay: bool) {
        let _ = self.stream.set_nodelay(nodelay);
    }
}
