//! mDNS collaborator
//!
//! The responder owns our hostname and finds other devices offering the
//! same service.

use serde::Serialize;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Service type every device advertises
pub const SERVICE_TYPE: &str = "_circuitpython";
pub const SERVICE_PROTOCOL: &str = "_tcp";

/// A device found on the local network
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Peer {
    pub hostname: String,
    pub instance_name: String,
    pub port: u16,
    pub ip: Ipv4Addr,
}

/// What to look for
#[derive(Debug, Clone, Copy)]
pub struct PeerQuery {
    pub service_type: &'static str,
    pub protocol: &'static str,
    pub timeout: Duration,
    /// Most peers to return; `PeerList::total` still counts the rest
    pub limit: usize,
}

/// Lookup result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerList {
    /// Every responder that answered
    pub total: usize,
    pub peers: Vec<Peer>,
}

/// mDNS responder and resolver
pub trait Discovery {
    /// Our hostname, without `.local`
    fn hostname(&self) -> &str;
    fn advertise(&mut self, instance_name: &str, service_type: &str, protocol: &str, port: u16);
    fn find(&mut self, query: &PeerQuery) -> PeerList;
}

/// Fixed hostname and peer table, for hosts without a responder
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    hostname: String,
    peers: Vec<Peer>,
    advertised: Option<(String, u16)>,
}

impl StaticDiscovery {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            peers: Vec::new(),
            advertised: None,
        }
    }

    pub fn peer(mut self, peer: Peer) -> Self {
        self.peers.push(peer);
        self
    }

    /// Instance name and port from the last `advertise`
    pub fn advertised(&self) -> Option<(&str, u16)> {
        self.advertised
            .as_ref()
            .map(|(name, port)| (name.as_str(), *port))
    }
}

impl Discovery for StaticDiscovery {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn advertise(&mut self, instance_name: &str, _service_type: &str, _protocol: &str, port: u16) {
        self.advertised = Some((instance_name.to_string(), port));
    }

    fn find(&mut self, query: &PeerQuery) -> PeerList {
        PeerList {
            total: self.peers.len(),
            peers: self.peers.iter().take(query.limit).cloned().collect(),
        }
    }
}
