//! Control plane under `/cp/`: version and peer documents, serial console

use crate::config::BoardInfo;
use crate::discovery::{Peer, PeerQuery, SERVICE_PROTOCOL, SERVICE_TYPE};
use crate::error::Rejection;
use crate::handlers::AssetKind;
use crate::net::Connection;
use crate::request::{Method, Request};
use crate::response::ResponseWriter;
use crate::router::{require_auth, RouteContext, Routed};
use crate::storage::Storage;
use crate::websocket::accept_key;
use crate::Result;
use serde::Serialize;
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// Bumped when the HTTP API changes incompatibly
pub const WEB_API_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct VersionDoc<'a> {
    web_api_version: u32,
    #[serde(flatten)]
    board: &'a BoardInfo,
    hostname: &'a str,
    port: u16,
    ip: Ipv4Addr,
}

#[derive(Debug, Serialize)]
struct DevicesDoc<'a> {
    total: usize,
    devices: &'a [Peer],
}

/// Serve a request whose path started with `/cp`
pub fn handle<S: Storage, C: Connection + ?Sized>(
    ctx: &mut RouteContext<'_, S>,
    writer: &mut ResponseWriter<'_, C>,
    req: &Request,
    path: &str,
) -> Result<Routed> {
    if req.method() != Method::Get {
        return Err(Rejection::MethodNotAllowed.into());
    }
    match path {
        "/devices.json" => devices_json(ctx, writer),
        "/version.json" => version_json(ctx, writer),
        "/serial/" => serial(ctx, writer, req),
        _ => Err(Rejection::NotFound.into()),
    }
}

fn version_json<S: Storage, C: Connection + ?Sized>(
    ctx: &mut RouteContext<'_, S>,
    writer: &mut ResponseWriter<'_, C>,
) -> Result<Routed> {
    let doc = serde_json::to_string(&VersionDoc {
        web_api_version: WEB_API_VERSION,
        board: &ctx.config.board,
        hostname: ctx.discovery.hostname(),
        port: ctx.config.port,
        ip: ctx.ipv4,
    })?;

    writer.begin_chunked_json()?;
    writer.chunk(&[doc.as_str()])?;
    writer.end_chunks()?;
    Ok(Routed::done())
}

fn devices_json<S: Storage, C: Connection + ?Sized>(
    ctx: &mut RouteContext<'_, S>,
    writer: &mut ResponseWriter<'_, C>,
) -> Result<Routed> {
    let query = PeerQuery {
        service_type: SERVICE_TYPE,
        protocol: SERVICE_PROTOCOL,
        timeout: ctx.config.peer_query_timeout,
        limit: ctx.config.max_peers,
    };
    let mut found = ctx.discovery.find(&query);
    found.peers.truncate(ctx.config.max_peers);
    debug!(total = found.total, listed = found.peers.len(), "peer lookup");

    let doc = serde_json::to_string(&DevicesDoc {
        total: found.total,
        devices: &found.peers,
    })?;

    writer.begin_chunked_json()?;
    writer.chunk(&[doc.as_str()])?;
    writer.end_chunks()?;
    Ok(Routed::done())
}

fn serial<S: Storage, C: Connection + ?Sized>(
    ctx: &mut RouteContext<'_, S>,
    writer: &mut ResponseWriter<'_, C>,
    req: &Request,
) -> Result<Routed> {
    require_auth(ctx.config, req)?;

    if req.websocket {
        let key = req.websocket_key.as_ref().ok_or(Rejection::BadRequest)?;
        writer.reply_switching_protocols(&accept_key(key))?;
        info!(version = req.websocket_version, "serial console upgraded");
        return Ok(Routed::Upgraded);
    }

    let page = ctx
        .assets
        .get(AssetKind::SerialHtml)
        .ok_or(Rejection::NotFound)?;
    writer.reply_static(page)?;
    Ok(Routed::done())
}
