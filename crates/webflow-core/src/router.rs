//! Request routing
//!
//! Security checks run first, in a fixed order: redirect, origin, path
//! length. Then the path prefix picks the handler:
//! - `/fs/...` - filesystem
//! - `/cp/...` - control plane
//! - anything else - static assets
//!
//! Whatever the handler does, the router leaves the connection aligned on
//! the next request: an unread body is drained, or the connection is marked
//! for closing when the client is still holding its body back.

use crate::config::ServerConfig;
use crate::discovery::Discovery;
use crate::error::{Error, Rejection};
use crate::handlers::{self, AssetTable};
use crate::net::Connection;
use crate::request::Request;
use crate::response::ResponseWriter;
use crate::storage::{MassStorageLock, Storage};
use crate::Result;
use std::net::Ipv4Addr;
use tracing::{debug, error, warn};

/// Everything a handler may touch while serving one request
pub struct RouteContext<'a, S: Storage> {
    pub config: &'a ServerConfig,
    pub storage: &'a mut S,
    pub usb: &'a dyn MassStorageLock,
    pub discovery: &'a mut dyn Discovery,
    pub assets: &'a AssetTable,
    /// Our address, for origin checks and version.json
    pub ipv4: Ipv4Addr,
}

/// What the scheduler does once a request has been answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Done {
        /// The filesystem changed; trigger an autoreload
        reload: bool,
        /// Hang up instead of waiting for another request
        close: bool,
    },
    /// The socket now belongs to the WebSocket sink
    Upgraded,
}

impl Routed {
    pub const fn done() -> Self {
        Routed::Done {
            reload: false,
            close: false,
        }
    }

    pub const fn reload() -> Self {
        Routed::Done {
            reload: true,
            close: false,
        }
    }

    pub const fn close() -> Self {
        Routed::Done {
            reload: false,
            close: true,
        }
    }
}

/// Answer a request whose headers are complete.
///
/// Only transport failures come back as `Err`; every other error has
/// already been turned into a reply.
pub fn route<S: Storage, C: Connection + ?Sized>(
    ctx: &mut RouteContext<'_, S>,
    conn: &mut C,
    req: &Request,
) -> Result<Routed> {
    let mut writer = ResponseWriter::new(conn, req, ctx.config.max_send_attempts);

    let routed = match dispatch(ctx, &mut writer, req) {
        Ok(routed) => routed,
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            match &err {
                Error::Storage(_) | Error::Json(_) => {
                    error!(error = %err, path = %req.path, "request failed")
                }
                Error::Validation(_) => debug!(error = %err, path = %req.path, "request rejected"),
                _ => warn!(error = %err, path = %req.path, "request refused"),
            }
            writer.reply_error(&err, &ctx.config.realm)?;
            Routed::done()
        }
    };

    match routed {
        Routed::Done { reload, close: false } if writer.body_remaining() > 0 => {
            if writer.body_withheld() {
                debug!(remaining = writer.body_remaining(), "body never requested, closing");
                return Ok(Routed::Done {
                    reload,
                    close: true,
                });
            }
            writer.discard_body()?;
            Ok(routed)
        }
        other => Ok(other),
    }
}

fn dispatch<S: Storage, C: Connection + ?Sized>(
    ctx: &mut RouteContext<'_, S>,
    writer: &mut ResponseWriter<'_, C>,
    req: &Request,
) -> Result<Routed> {
    if req.redirect {
        let path = req.path.to_str().unwrap_or("/");
        writer.reply_redirect(req.websocket, ctx.discovery.hostname(), path)?;
        return Ok(Routed::close());
    }

    if req.origin.is_truncated() {
        warn!(origin = %req.origin, "origin too long");
        return Err(Rejection::Forbidden.into());
    }
    if let Some(origin) = req.origin() {
        let hostname = ctx.discovery.hostname();
        if !origin_allowed(origin, hostname, ctx.ipv4, &ctx.config.allowed_origins) {
            warn!(origin, "bad origin");
            return Err(Rejection::Forbidden.into());
        }
    }

    if req.path.is_truncated() {
        return Err(Rejection::UriTooLong.into());
    }
    let path = req.path.to_str().ok_or(Rejection::BadRequest)?;

    if path.starts_with("/fs/") {
        require_auth(ctx.config, req)?;
        handlers::fs::handle(ctx, writer, req, &path[3..])
    } else if path.starts_with("/cp/") {
        handlers::control::handle(ctx, writer, req, &path[3..])
    } else {
        handlers::assets::handle(ctx.assets, writer, req, path)
    }
}

/// Credentials gate for `/fs/` and the serial console. Without a configured
/// password there is nothing to authenticate against, so the answer is 403
/// rather than a challenge.
pub(crate) fn require_auth(config: &ServerConfig, req: &Request) -> Result<()> {
    if req.authenticated {
        return Ok(());
    }
    if config.has_password() {
        Err(Rejection::Unauthorized.into())
    } else {
        Err(Rejection::Forbidden.into())
    }
}

/// Whether a page served from `origin` may call the API.
///
/// Accepted: `http://<hostname>.local[:port]`, `http://<our ip>[:port]`,
/// `http://127.0.0.1:<port>`, and the allow-listed hosts over http or https.
pub fn origin_allowed(origin: &str, hostname: &str, ip: Ipv4Addr, allowed: &[String]) -> bool {
    let external = origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"));
    if let Some(host) = external {
        if allowed.iter().any(|ok| ok == host) {
            return true;
        }
    }

    let Some(host) = origin.strip_prefix("http://") else {
        return false;
    };
    let (name, port) = match host.split_once(':') {
        Some((name, port)) => (name, Some(port)),
        None => (host, None),
    };
    if let Some(port) = port {
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
    }

    if let Some(local) = name.strip_suffix(".local") {
        if local.eq_ignore_ascii_case(hostname) {
            return true;
        }
    }
    if name.parse::<Ipv4Addr>().is_ok_and(|addr| addr == ip) {
        return true;
    }
    name == "127.0.0.1" && port.is_some()
}
