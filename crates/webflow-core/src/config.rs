//! Server configuration

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use std::time::Duration;

/// Firmware and board identity reported by `/cp/version.json`
#[derive(Debug, Clone, Serialize)]
pub struct BoardInfo {
    pub version: String,
    pub build_date: String,
    pub board_name: String,
    pub mcu_name: String,
    pub board_id: String,
    pub creator_id: u32,
    pub creation_id: u32,
}

impl Default for BoardInfo {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            build_date: String::new(),
            board_name: "Generic Device".to_string(),
            mcu_name: "unknown".to_string(),
            board_id: "generic".to_string(),
            creator_id: 0,
            creation_id: 0,
        }
    }
}

/// The `Authorization: Basic` token for a password with an empty user name
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuthToken(String);

impl BasicAuthToken {
    pub fn new(password: &str) -> Self {
        let mut credential = String::with_capacity(password.len() + 1);
        credential.push(':');
        credential.push_str(password);
        Self(STANDARD.encode(credential))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BasicAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BasicAuthToken(..)")
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port advertised over mDNS and reported in version.json
    pub port: u16,
    /// Pre-encoded credential; `None` forbids the filesystem API entirely
    pub auth_token: Option<BasicAuthToken>,
    pub board: BoardInfo,
    /// External hosts whose pages may call the API
    pub allowed_origins: Vec<String>,
    /// Realm named in `WWW-Authenticate`
    pub realm: String,
    /// Would-block retries before a send or body read gives up
    pub max_send_attempts: u32,
    /// Peers listed in devices.json
    pub max_peers: usize,
    pub peer_query_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 80,
            auth_token: None,
            board: BoardInfo::default(),
            allowed_origins: vec!["code.circuitpython.org".to_string()],
            realm: "CircuitPython".to_string(),
            max_send_attempts: 100_000,
            max_peers: 32,
            peer_query_timeout: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the API password. An empty password disables the API.
    pub fn api_password(mut self, password: &str) -> Self {
        self.auth_token = (!password.is_empty()).then(|| BasicAuthToken::new(password));
        self
    }

    pub fn board(mut self, board: BoardInfo) -> Self {
        self.board = board;
        self
    }

    pub fn allow_origin(mut self, host: impl Into<String>) -> Self {
        self.allowed_origins.push(host.into());
        self
    }

    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    pub fn max_send_attempts(mut self, attempts: u32) -> Self {
        self.max_send_attempts = attempts;
        self
    }

    pub fn max_peers(mut self, peers: usize) -> Self {
        self.max_peers = peers;
        self
    }

    pub fn peer_query_timeout(mut self, timeout: Duration) -> Self {
        self.peer_query_timeout = timeout;
        self
    }

    pub fn has_password(&self) -> bool {
        self.auth_token.is_some()
    }
}
