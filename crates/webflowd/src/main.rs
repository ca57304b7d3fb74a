//! webflowd: serve a host directory through the web workflow API
//!
//! Runs the same single-socket engine a board runs, driven from a plain
//! polling loop, so browser tooling can be developed without hardware.

mod assets;
mod console;
mod net;
mod storage;
mod usb;

use clap::Parser;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webflow_core::{Autoreload, BoardInfo, Peer, Server, ServerConfig, StaticDiscovery};

use crate::console::Console;
use crate::net::{TcpConnection, TcpServerSocket};
use crate::storage::{DirStorage, DEFAULT_MAX_FILE_SIZE};
use crate::usb::UsbLock;

/// FAT stores modification times in two-second steps
const FAT_RESOLUTION_NS: u64 = 2_000_000_000;

#[derive(Debug, Parser)]
#[command(name = "webflowd", version, about = "Web workflow server for a host directory")]
struct Args {
    /// API password; empty disables the filesystem API
    #[arg(long, env = "CIRCUITPY_WEB_API_PASSWORD", default_value = "")]
    password: String,

    #[arg(long, env = "CIRCUITPY_WEB_API_PORT", default_value_t = 80)]
    port: u16,

    /// Directory served as the device volume
    #[arg(long, env = "WEBFLOW_ROOT", default_value = ".")]
    root: PathBuf,

    /// mDNS hostname, without `.local`
    #[arg(long, env = "WEBFLOW_HOSTNAME", default_value = "cpy-000000")]
    hostname: String,

    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Address reported to clients; defaults to the bind address
    #[arg(long)]
    ip: Option<Ipv4Addr>,

    /// Largest file the volume accepts, in bytes
    #[arg(long, env = "WEBFLOW_CAPACITY", default_value_t = DEFAULT_MAX_FILE_SIZE)]
    capacity: u64,

    /// Round modification times to two seconds, like FAT
    #[arg(long)]
    fat_timestamps: bool,

    /// Devices listed by devices.json, as `hostname@ip[:port]`
    #[arg(long = "peer", env = "WEBFLOW_PEER", value_delimiter = ',', value_parser = parse_peer)]
    peers: Vec<Peer>,

    /// Start with the volume mounted by the simulated USB host
    #[arg(long)]
    usb_mounted: bool,

    /// Sleep between background passes, in milliseconds
    #[arg(long, default_value_t = 5)]
    tick_ms: u64,

    #[arg(long, default_value = "Generic Device")]
    board_name: String,
}

fn parse_peer(arg: &str) -> Result<Peer, String> {
    let (hostname, address) = arg
        .split_once('@')
        .ok_or_else(|| format!("expected hostname@ip[:port], got {arg:?}"))?;
    if hostname.is_empty() {
        return Err(format!("missing hostname in {arg:?}"));
    }
    let (ip, port) = match address.split_once(':') {
        Some((ip, port)) => (ip, port.parse::<u16>().map_err(|e| format!("bad port: {e}"))?),
        None => (address, 80),
    };
    let ip = ip.parse::<Ipv4Addr>().map_err(|e| format!("bad address {ip:?}: {e}"))?;
    Ok(Peer {
        hostname: hostname.to_string(),
        instance_name: hostname.to_string(),
        port,
        ip,
    })
}

/// The host has no code runner to restart, so reload requests are logged
struct LogAutoreload;

impl Autoreload for LogAutoreload {
    fn suspend(&mut self) {}

    fn resume(&mut self) {}

    fn trigger(&mut self) {
        info!("files changed, reload requested");
    }
}

fn main() -> io::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webflowd=info,webflow_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut storage = DirStorage::new(&args.root)?.max_file_size(args.capacity);
    if args.fat_timestamps {
        storage = storage.resolution_ns(FAT_RESOLUTION_NS);
    }

    let listener = TcpServerSocket::bind(&SocketAddr::new(args.bind, args.port))?;
    let local = listener
        .local_addr()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "listener has no address"))?;
    let ipv4 = args.ip.unwrap_or(match local.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => ip,
        _ => Ipv4Addr::LOCALHOST,
    });

    let board = BoardInfo {
        board_name: args.board_name.clone(),
        ..BoardInfo::default()
    };
    let config = ServerConfig::new()
        .port(local.port())
        .api_password(&args.password)
        .board(board);
    if !config.has_password() {
        info!("no password set, the filesystem API is disabled");
    }

    let discovery = args
        .peers
        .iter()
        .cloned()
        .fold(StaticDiscovery::new(&args.hostname), StaticDiscovery::peer);

    let usb = UsbLock::new(args.usb_mounted);
    let mut console: Console<TcpConnection> = Console::new(usb.clone(), config.max_send_attempts);

    info!(
        root = %storage.root().display(),
        address = %local,
        ip = %ipv4,
        hostname = %args.hostname,
        "webflowd starting"
    );

    let mut server = Server::builder(listener, storage)
        .config(config)
        .mass_storage(usb)
        .discovery(discovery)
        .autoreload(LogAutoreload)
        .websockets(console.sink())
        .assets(assets::bundled())
        .ipv4(ipv4)
        .build();

    let tick = Duration::from_millis(args.tick_ms);
    while server.is_listening() {
        server.background();
        console.poll();
        thread::sleep(tick);
    }

    Err(io::Error::new(
        io::ErrorKind::ConnectionAborted,
        "listening socket closed",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer() {
        let peer = parse_peer("cpy-aaaaaa@192.168.1.7:8080").unwrap();
        assert_eq!(peer.hostname, "cpy-aaaaaa");
        assert_eq!(peer.ip, Ipv4Addr::new(192, 168, 1, 7));
        assert_eq!(peer.port, 8080);

        assert_eq!(parse_peer("cpy-b@10.0.0.2").unwrap().port, 80);
    }

    #[test]
    fn test_parse_peer_rejects_garbage() {
        assert!(parse_peer("10.0.0.2").is_err());
        assert!(parse_peer("@10.0.0.2").is_err());
        assert!(parse_peer("x@not-an-ip").is_err());
        assert!(parse_peer("x@10.0.0.2:99999").is_err());
    }

    #[test]
    fn test_args_from_command_line() {
        let args = Args::try_parse_from([
            "webflowd",
            "--password",
            "secret",
            "--port",
            "8080",
            "--peer",
            "a@10.0.0.1,b@10.0.0.2:81",
        ])
        .unwrap();
        assert_eq!(args.port, 8080);
        assert_eq!(args.peers.len(), 2);
        assert_eq!(args.peers[1].port, 81);
        assert!(!args.usb_mounted);
    }
}
