//! webflow-core: on-device control-plane HTTP/1.1 + WebSocket engine
//!
//! A single-socket server meant to be driven from a device's cooperative
//! background loop. It never blocks and never spawns: every call to
//! [`Server::background`] performs at most one accept and then pumps the
//! bytes that are already available through the request parser.
//!
//! Everything outside the protocol engine is a collaborator trait:
//! - [`net::Listener`] / [`net::Connection`] - the socket layer
//! - [`storage::Storage`] / [`storage::MassStorageLock`] - the filesystem and
//!   the USB mass-storage exclusivity lock
//! - [`discovery::Discovery`] - mDNS hostname and peer lookup
//! - [`websocket::WebSocketSink`] - takes over upgraded sockets
//! - [`server::Autoreload`] - the code runner's reload hook

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod buffer;
pub mod config;
pub mod discovery;
pub mod error;
pub mod handlers;
pub mod net;
pub mod parser;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod storage;
pub mod websocket;

// Re-exports
pub use buffer::{Bounded, Push};
pub use config::{BasicAuthToken, BoardInfo, ServerConfig};
pub use discovery::{Discovery, Peer, PeerList, PeerQuery, StaticDiscovery};
pub use error::{Error, Rejection, Result};
pub use handlers::{AssetKind, AssetTable, StaticAsset};
pub use net::{Connection, Listener};
pub use parser::{HeaderContext, ParseOutcome};
pub use request::{Method, ParseState, Request};
pub use response::{ResponseWriter, StatusCode};
pub use router::{RouteContext, Routed};
pub use server::{Autoreload, NoAutoreload, Server, ServerBuilder};
pub use storage::{
    DirEntry, MassStorageLock, Metadata, OpenMode, Storage, StorageError, StorageFile,
    NoMassStorage, StorageResult, WriteLease,
};
pub use websocket::{accept_key, CloseOnHandoff, Frame, Opcode, WebSocketSink};
