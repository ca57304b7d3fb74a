//! In-memory collaborators for driving a whole server from tests

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;

use webflow_core::{
    AssetKind, AssetTable, Autoreload, Connection, DirEntry, Listener, MassStorageLock, Metadata,
    OpenMode, Peer, Server, ServerConfig, StaticAsset, StaticDiscovery, Storage, StorageError,
    StorageFile, StorageResult, WebSocketSink,
};

pub const HOSTNAME: &str = "cpy-123456";
pub const PASSWORD: &str = "password";
/// base64(":password")
pub const AUTH: &str = "Authorization: Basic OnBhc3N3b3Jk\r\n";
pub const IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 42);
/// FAT keeps modification times to two seconds
pub const FAT_RESOLUTION_NS: u64 = 2_000_000_000;
pub const CLOCK_NS: u64 = 1_600_000_000_000_000_000;

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Wire {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    closed: bool,
    /// Reads past the end of `inbound` report EOF instead of would-block
    hung_up: bool,
}

/// One end of a scripted TCP connection; clones share the same wire
#[derive(Clone, Default)]
pub struct MockConn(Rc<RefCell<Wire>>);

impl MockConn {
    pub fn push(&self, bytes: &[u8]) {
        self.0.borrow_mut().inbound.extend(bytes.iter().copied());
    }

    pub fn hang_up(&self) {
        self.0.borrow_mut().hung_up = true;
    }

    pub fn output(&self) -> Vec<u8> {
        self.0.borrow().outbound.clone()
    }

    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow().outbound).into_owned()
    }

    pub fn clear_output(&self) {
        self.0.borrow_mut().outbound.clear();
    }

    pub fn unread(&self) -> usize {
        self.0.borrow().inbound.len()
    }

    pub fn is_closed(&self) -> bool {
        self.0.borrow().closed
    }

    pub fn same_wire(&self, other: &MockConn) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Connection for MockConn {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut wire = self.0.borrow_mut();
        if wire.closed {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if wire.inbound.is_empty() {
            if wire.hung_up {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(wire.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(wire.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut wire = self.0.borrow_mut();
        if wire.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        wire.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn set_nonblocking(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.0.borrow().closed
    }

    fn close(&mut self) {
        self.0.borrow_mut().closed = true;
    }

    fn yield_now(&mut self) {}
}

#[derive(Clone, Default)]
pub struct MockListener {
    pending: Rc<RefCell<VecDeque<(MockConn, SocketAddr)>>>,
    closed: Rc<Cell<bool>>,
}

impl MockListener {
    /// Queue a client connection for the next accept
    pub fn connect(&self, port: u16) -> MockConn {
        let conn = MockConn::default();
        let addr = SocketAddr::from(([192, 168, 1, 7], port));
        self.pending.borrow_mut().push_back((conn.clone(), addr));
        conn
    }
}

impl Listener for MockListener {
    type Stream = MockConn;

    fn accept(&mut self) -> io::Result<Option<(MockConn, SocketAddr)>> {
        Ok(self.pending.borrow_mut().pop_front())
    }

    fn close(&mut self) {
        self.closed.set(true);
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

enum Node {
    Dir { modified_ns: u64 },
    File { data: Vec<u8>, modified_ns: u64 },
}

struct Volume {
    nodes: BTreeMap<String, Node>,
    time_override: Option<u64>,
    /// Largest size any one file may reach
    capacity: u64,
    /// Seeking past `capacity` fails with NoSpace instead of stopping short
    seek_errors: bool,
    /// Paths `unlink` refuses to remove
    pinned: Vec<String>,
}

impl Volume {
    fn now(&self) -> u64 {
        self.time_override.unwrap_or(CLOCK_NS)
    }

    fn parent_is_dir(&self, path: &str) -> bool {
        matches!(self.nodes.get(parent_of(path)), Some(Node::Dir { .. }))
    }
}

fn parent_of(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

/// A flat path map standing in for a FAT volume
#[derive(Clone)]
pub struct MemStorage(Rc<RefCell<Volume>>);

impl MemStorage {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir { modified_ns: 0 });
        Self(Rc::new(RefCell::new(Volume {
            nodes,
            time_override: None,
            capacity: u64::MAX,
            seek_errors: false,
            pinned: Vec::new(),
        })))
    }

    pub fn with_capacity(self, capacity: u64) -> Self {
        self.0.borrow_mut().capacity = capacity;
        self
    }

    /// Report a full volume as an error from `seek`, like a host filesystem
    pub fn with_seek_errors(self) -> Self {
        self.0.borrow_mut().seek_errors = true;
        self
    }

    /// Make `unlink` fail for `path`
    pub fn pin(&self, path: &str) {
        self.0.borrow_mut().pinned.push(path.to_string());
    }

    pub fn put_file(&self, path: &str, data: &[u8]) {
        self.0.borrow_mut().nodes.insert(
            path.to_string(),
            Node::File {
                data: data.to_vec(),
                modified_ns: CLOCK_NS,
            },
        );
    }

    pub fn put_dir(&self, path: &str) {
        self.0
            .borrow_mut()
            .nodes
            .insert(path.to_string(), Node::Dir { modified_ns: CLOCK_NS });
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.0.borrow().nodes.get(path) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.0.borrow().nodes.contains_key(path)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(self.0.borrow().nodes.get(path), Some(Node::Dir { .. }))
    }

    pub fn modified_ns(&self, path: &str) -> Option<u64> {
        match self.0.borrow().nodes.get(path)? {
            Node::Dir { modified_ns } | Node::File { modified_ns, .. } => Some(*modified_ns),
        }
    }

    pub fn time_override(&self) -> Option<u64> {
        self.0.borrow().time_override
    }
}

pub struct MemFile {
    volume: Rc<RefCell<Volume>>,
    path: String,
    pos: u64,
}

impl MemFile {
    fn seek_errors(&self) -> bool {
        self.volume.borrow().seek_errors
    }

    fn with_data<T>(&self, f: impl FnOnce(&mut Vec<u8>, &mut u64, u64, u64) -> T) -> StorageResult<T> {
        let mut volume = self.volume.borrow_mut();
        let now = volume.now();
        let capacity = volume.capacity;
        match volume.nodes.get_mut(&self.path) {
            Some(Node::File { data, modified_ns }) => Ok(f(data, modified_ns, now, capacity)),
            _ => Err(StorageError::NotFound),
        }
    }
}

impl StorageFile for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> StorageResult<usize> {
        let pos = self.pos as usize;
        let n = self.with_data(|data, _, _, _| {
            let rest = data.get(pos..).unwrap_or(&[]);
            let n = rest.len().min(buf.len());
            buf[..n].copy_from_slice(&rest[..n]);
            n
        })?;
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> StorageResult<usize> {
        let pos = self.pos;
        let n = self.with_data(|data, modified, now, capacity| {
            let room = capacity.saturating_sub(pos) as usize;
            let n = buf.len().min(room);
            let end = pos as usize + n;
            if data.len() < end {
                data.resize(end, 0);
            }
            data[pos as usize..end].copy_from_slice(&buf[..n]);
            *modified = now;
            n
        })?;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: u64) -> StorageResult<u64> {
        if self.seek_errors() && pos > self.volume.borrow().capacity {
            return Err(StorageError::NoSpace);
        }
        let reached = self.with_data(|data, _, _, capacity| {
            let reached = pos.min(capacity);
            if (data.len() as u64) < reached {
                data.resize(reached as usize, 0);
            }
            reached
        })?;
        self.pos = reached;
        Ok(reached)
    }

    fn truncate(&mut self) -> StorageResult<()> {
        let pos = self.pos as usize;
        self.with_data(|data, modified, now, _| {
            data.truncate(pos);
            *modified = now;
        })
    }

    fn len(&self) -> u64 {
        self.with_data(|data, _, _, _| data.len() as u64).unwrap_or(0)
    }
}

impl Storage for MemStorage {
    type File = MemFile;
    type ReadDir = std::vec::IntoIter<StorageResult<DirEntry>>;

    fn open(&mut self, path: &str, mode: OpenMode) -> StorageResult<MemFile> {
        let mut volume = self.0.borrow_mut();
        let is_dir = volume
            .nodes
            .get(path)
            .map(|node| matches!(node, Node::Dir { .. }));
        match is_dir {
            Some(true) => return Err(StorageError::Other("is a directory".into())),
            Some(false) => {}
            None if mode == OpenMode::CreateWrite => {
                if !volume.parent_is_dir(path) {
                    return Err(StorageError::NoPath);
                }
                let modified_ns = volume.now();
                volume.nodes.insert(
                    path.to_string(),
                    Node::File {
                        data: Vec::new(),
                        modified_ns,
                    },
                );
            }
            None if volume.parent_is_dir(path) => return Err(StorageError::NotFound),
            None => return Err(StorageError::NoPath),
        }
        Ok(MemFile {
            volume: Rc::clone(&self.0),
            path: path.to_string(),
            pos: 0,
        })
    }

    fn stat(&mut self, path: &str) -> StorageResult<Metadata> {
        let volume = self.0.borrow();
        match volume.nodes.get(path) {
            Some(Node::Dir { modified_ns }) => Ok(Metadata {
                is_dir: true,
                len: 0,
                modified_ns: *modified_ns,
            }),
            Some(Node::File { data, modified_ns }) => Ok(Metadata {
                is_dir: false,
                len: data.len() as u64,
                modified_ns: *modified_ns,
            }),
            None if volume.parent_is_dir(path) => Err(StorageError::NotFound),
            None => Err(StorageError::NoPath),
        }
    }

    fn read_dir(&mut self, path: &str) -> StorageResult<Self::ReadDir> {
        let volume = self.0.borrow();
        match volume.nodes.get(path) {
            Some(Node::Dir { .. }) => {}
            Some(Node::File { .. }) => return Err(StorageError::NotADirectory),
            None => return Err(StorageError::NotFound),
        }
        let entries: Vec<_> = volume
            .nodes
            .iter()
            .filter(|(child, _)| child.as_str() != "/" && parent_of(child) == path)
            .map(|(child, node)| {
                let name = child.rsplit('/').next().unwrap_or_default().to_string();
                Ok(match node {
                    Node::Dir { modified_ns } => DirEntry {
                        name,
                        is_dir: true,
                        len: 0,
                        modified_ns: *modified_ns,
                    },
                    Node::File { data, modified_ns } => DirEntry {
                        name,
                        is_dir: false,
                        len: data.len() as u64,
                        modified_ns: *modified_ns,
                    },
                })
            })
            .collect();
        Ok(entries.into_iter())
    }

    fn mkdir(&mut self, path: &str) -> StorageResult<()> {
        let mut volume = self.0.borrow_mut();
        if volume.nodes.contains_key(path) {
            return Err(StorageError::Exists);
        }
        if !volume.parent_is_dir(path) {
            return Err(StorageError::NoPath);
        }
        let modified_ns = volume.now();
        volume.nodes.insert(path.to_string(), Node::Dir { modified_ns });
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> StorageResult<()> {
        let mut volume = self.0.borrow_mut();
        if path == "/" {
            return Err(StorageError::Other("cannot remove the root".into()));
        }
        if !volume.nodes.contains_key(path) {
            return Err(StorageError::NotFound);
        }
        if volume.pinned.iter().any(|pinned| pinned == path) {
            return Err(StorageError::Other("entry is busy".into()));
        }
        let has_children = volume
            .nodes
            .keys()
            .any(|child| child.as_str() != "/" && parent_of(child) == path);
        if has_children {
            return Err(StorageError::Other("directory not empty".into()));
        }
        volume.nodes.remove(path);
        Ok(())
    }

    fn set_time_override(&mut self, modified_ns: Option<u64>) {
        self.0.borrow_mut().time_override = modified_ns;
    }

    fn timestamp_resolution_ns(&self) -> u64 {
        FAT_RESOLUTION_NS
    }
}

// ---------------------------------------------------------------------------
// Other collaborators
// ---------------------------------------------------------------------------

/// USB mass-storage lock whose host side the test controls
#[derive(Clone, Default)]
pub struct FakeUsb {
    usb_active: Rc<Cell<bool>>,
    held: Rc<Cell<bool>>,
    pub acquisitions: Rc<Cell<u32>>,
    pub releases: Rc<Cell<u32>>,
}

impl FakeUsb {
    pub fn set_usb_active(&self, active: bool) {
        self.usb_active.set(active);
    }

    pub fn is_held(&self) -> bool {
        self.held.get()
    }
}

impl MassStorageLock for FakeUsb {
    fn try_acquire(&self) -> bool {
        if self.usb_active.get() || self.held.get() {
            return false;
        }
        self.held.set(true);
        self.acquisitions.set(self.acquisitions.get() + 1);
        true
    }

    fn release(&self) {
        self.held.set(false);
        self.releases.set(self.releases.get() + 1);
    }
}

#[derive(Clone, Default)]
pub struct ReloadLog {
    pub suspended: Rc<Cell<u32>>,
    pub resumed: Rc<Cell<u32>>,
    pub triggered: Rc<Cell<u32>>,
}

impl Autoreload for ReloadLog {
    fn suspend(&mut self) {
        self.suspended.set(self.suspended.get() + 1);
    }

    fn resume(&mut self) {
        self.resumed.set(self.resumed.get() + 1);
    }

    fn trigger(&mut self) {
        self.triggered.set(self.triggered.get() + 1);
    }
}

/// Keeps handed-off sockets for inspection
#[derive(Clone, Default)]
pub struct SinkLog(pub Rc<RefCell<Vec<MockConn>>>);

impl WebSocketSink<MockConn> for SinkLog {
    fn handoff(&mut self, conn: MockConn) {
        self.0.borrow_mut().push(conn);
    }
}

pub fn test_assets() -> AssetTable {
    AssetTable::new()
        .with(
            AssetKind::WelcomeHtml,
            StaticAsset::new("text/html", &b"<h1>welcome</h1>"[..]).encoding("gzip"),
        )
        .with(
            AssetKind::DirectoryHtml,
            StaticAsset::new("text/html", &b"<h1>directory</h1>"[..]),
        )
        .with(
            AssetKind::SerialHtml,
            StaticAsset::new("text/html", &b"<h1>serial</h1>"[..]),
        )
        .with(
            AssetKind::Favicon,
            StaticAsset::new("image/x-icon", &b"ICO"[..]),
        )
}

pub fn test_peers() -> StaticDiscovery {
    StaticDiscovery::new(HOSTNAME)
        .peer(Peer {
            hostname: "cpy-aaaaaa".to_string(),
            instance_name: "Feather".to_string(),
            port: 80,
            ip: Ipv4Addr::new(192, 168, 1, 50),
        })
        .peer(Peer {
            hostname: "cpy-bbbbbb".to_string(),
            instance_name: "QT Py".to_string(),
            port: 8080,
            ip: Ipv4Addr::new(192, 168, 1, 51),
        })
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub server: Server<MockListener, MemStorage>,
    pub listener: MockListener,
    pub storage: MemStorage,
    pub usb: FakeUsb,
    pub reload: ReloadLog,
    pub sink: SinkLog,
    next_port: u16,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::new().api_password(PASSWORD))
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self::with_parts(config, MemStorage::new())
    }

    pub fn with_parts(config: ServerConfig, storage: MemStorage) -> Self {
        let listener = MockListener::default();
        let usb = FakeUsb::default();
        let reload = ReloadLog::default();
        let sink = SinkLog::default();
        let server = Server::builder(listener.clone(), storage.clone())
            .config(config)
            .mass_storage(usb.clone())
            .discovery(test_peers())
            .autoreload(reload.clone())
            .websockets(sink.clone())
            .assets(test_assets())
            .ipv4(IP)
            .build();
        Self {
            server,
            listener,
            storage,
            usb,
            reload,
            sink,
            next_port: 50000,
        }
    }

    /// Queue a new client connection
    pub fn connect(&mut self) -> MockConn {
        self.next_port += 1;
        self.listener.connect(self.next_port)
    }

    pub fn tick(&mut self) {
        self.server.background();
    }

    /// New connection, send `raw`, run one background tick
    pub fn exchange(&mut self, raw: &[u8]) -> Vec<Reply> {
        let conn = self.connect();
        conn.push(raw);
        self.tick();
        parse_replies(&conn.output())
    }

    /// Single-reply convenience over `exchange`
    pub fn send(&mut self, raw: &str) -> Reply {
        let mut replies = self.exchange(raw.as_bytes());
        assert_eq!(replies.len(), 1, "expected exactly one reply");
        replies.remove(0)
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_text(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Split raw server output into replies, undoing chunked framing
pub fn parse_replies(raw: &[u8]) -> Vec<Reply> {
    let mut replies = Vec::new();
    let mut rest = raw;
    while let Some(end) = find(rest, b"\r\n\r\n") {
        let head = std::str::from_utf8(&rest[..end]).unwrap();
        rest = &rest[end + 4..];

        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap();
        assert!(status_line.starts_with("HTTP/1.1 "), "bad status line {status_line:?}");
        let status = status_line[9..12].parse().unwrap();
        let headers = lines
            .map(|line| {
                let (key, value) = line.split_once(": ").unwrap();
                (key.to_string(), value.to_string())
            })
            .collect();
        let mut reply = Reply {
            status,
            headers,
            body: Vec::new(),
        };

        if let Some(len) = reply.header("Content-Length") {
            let len: usize = len.parse().unwrap();
            let take = len.min(rest.len());
            reply.body = rest[..take].to_vec();
            rest = &rest[take..];
        } else if reply.header("Transfer-Encoding") == Some("chunked") {
            loop {
                let line_end = find(rest, b"\r\n").unwrap();
                let size_text = std::str::from_utf8(&rest[..line_end]).unwrap();
                let size = usize::from_str_radix(size_text, 16).unwrap();
                rest = &rest[line_end + 2..];
                if size == 0 {
                    rest = &rest[2..];
                    break;
                }
                reply.body.extend_from_slice(&rest[..size]);
                assert_eq!(&rest[size..size + 2], b"\r\n");
                rest = &rest[size + 2..];
            }
        }
        replies.push(reply);
    }
    replies
}
