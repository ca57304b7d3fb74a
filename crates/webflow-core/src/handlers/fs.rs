//! Filesystem API under `/fs/`
//!
//! A trailing `/` addresses a directory, anything else a file. Writes hold
//! the USB mass-storage lease for their whole duration and answer 409 while
//! the USB host owns the volume.

use crate::error::{Error, Rejection};
use crate::handlers::AssetKind;
use crate::net::Connection;
use crate::request::{Method, Request, PATH_CAPACITY};
use crate::response::{ResponseWriter, StatusCode};
use crate::router::{RouteContext, Routed};
use crate::storage::{
    timestamp_from_millis, truncate_timestamp, with_time_override, OpenMode, Storage,
    StorageError, StorageFile, StorageResult, WriteLease,
};
use crate::Result;
use arrayvec::{ArrayString, ArrayVec};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Bytes moved per storage or socket call
const BLOCK_SIZE: usize = 64;

const CONTENT_TYPES: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("py", "text/plain"),
    ("js", "text/javascript"),
    ("html", "text/html"),
    ("json", "application/json"),
    ("css", "text/css"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("ico", "image/x-icon"),
];

/// Content type for a file, from its extension
pub fn content_type_for(path: &str) -> &'static str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.')
        .and_then(|(_, ext)| {
            CONTENT_TYPES
                .iter()
                .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        })
        .map(|(_, content_type)| *content_type)
        .unwrap_or("application/octet-stream")
}

/// A decoded `/fs` path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Storage path: absolute, no trailing `/` except for the root
    pub path: ArrayString<PATH_CAPACITY>,
    pub directory: bool,
}

impl Target {
    /// Decode the part of the request path after `/fs`
    pub fn parse(raw: &str) -> Result<Self> {
        if !raw.starts_with('/') {
            return Err(Rejection::NotFound.into());
        }
        let directory = raw.ends_with('/');

        let mut decoded: ArrayVec<u8, PATH_CAPACITY> = ArrayVec::new();
        let mut bytes = raw.bytes();
        while let Some(byte) = bytes.next() {
            let byte = match byte {
                b'%' => {
                    let hi = bytes.next().and_then(hex_value);
                    let lo = bytes.next().and_then(hex_value);
                    match (hi, lo) {
                        (Some(hi), Some(lo)) => (hi << 4) | lo,
                        _ => return Err(Rejection::BadRequest.into()),
                    }
                }
                other => other,
            };
            decoded
                .try_push(byte)
                .map_err(|_| Error::from(Rejection::UriTooLong))?;
        }
        if directory && decoded.len() > 1 {
            decoded.pop();
        }

        let text = std::str::from_utf8(&decoded).map_err(|_| Error::from(Rejection::BadRequest))?;
        if text.split('/').any(|segment| segment == "..") {
            return Err(Rejection::Forbidden.into());
        }
        let path = ArrayString::from(text).map_err(|_| Error::from(Rejection::UriTooLong))?;
        Ok(Self { path, directory })
    }
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// One entry of the JSON directory listing
#[derive(Debug, Serialize)]
struct ListingEntry<'a> {
    name: &'a str,
    directory: bool,
    modified_ns: u64,
    file_size: u64,
}

/// Serve a request whose path started with `/fs`
pub fn handle<S: Storage, C: Connection + ?Sized>(
    ctx: &mut RouteContext<'_, S>,
    writer: &mut ResponseWriter<'_, C>,
    req: &Request,
    raw: &str,
) -> Result<Routed> {
    let target = Target::parse(raw)?;
    let path = target.path.as_str();

    match (req.method(), target.directory) {
        (Method::Options, _) => {
            let lease = WriteLease::acquire(ctx.usb);
            writer.reply_access_control(lease.is_some())?;
            Ok(Routed::done())
        }
        (Method::Delete, _) => delete(ctx, writer, path),
        (Method::Get, true) => list_directory(ctx, writer, req, path),
        (Method::Put, true) => make_directory(ctx, writer, req, path),
        (Method::Get, false) => send_file(ctx, writer, path),
        (Method::Put, false) => receive_file(ctx, writer, req, path),
        _ => Err(Rejection::MethodNotAllowed.into()),
    }
}

fn delete<S: Storage, C: Connection + ?Sized>(
    ctx: &mut RouteContext<'_, S>,
    writer: &mut ResponseWriter<'_, C>,
    path: &str,
) -> Result<Routed> {
    // The volume root is never removed, not even its contents
    if path == "/" {
        return Err(Rejection::Forbidden.into());
    }
    let _lease = WriteLease::acquire(ctx.usb).ok_or(Error::Conflict)?;

    let meta = ctx.storage.stat(path)?;
    let mut removed = 0;
    let result = if meta.is_dir {
        remove_contents(ctx.storage, path, &mut removed)
    } else {
        Ok(())
    }
    .and_then(|()| Ok(ctx.storage.unlink(path)?));

    match result {
        Ok(()) => {
            info!(path, "deleted");
            writer.reply_empty(StatusCode::NO_CONTENT)?;
            Ok(Routed::reload())
        }
        // Entries are already gone, so the code runner still has to see it
        Err(err) if removed > 0 => {
            error!(path, removed, error = %err, "delete stopped part way");
            writer.reply_error(&err, &ctx.config.realm)?;
            Ok(Routed::reload())
        }
        Err(err) => Err(err),
    }
}

/// Depth-first removal of everything below `dir`, counting what went
fn remove_contents<S: Storage + ?Sized>(
    storage: &mut S,
    dir: &str,
    removed: &mut usize,
) -> Result<()> {
    let entries = storage
        .read_dir(dir)?
        .collect::<StorageResult<Vec<_>>>()?;
    for entry in entries {
        let child = join(dir, &entry.name);
        if entry.is_dir {
            remove_contents(storage, &child, removed)?;
        }
        storage.unlink(&child)?;
        *removed += 1;
    }
    Ok(())
}

fn list_directory<S: Storage, C: Connection + ?Sized>(
    ctx: &mut RouteContext<'_, S>,
    writer: &mut ResponseWriter<'_, C>,
    req: &Request,
    path: &str,
) -> Result<Routed> {
    let entries = match ctx.storage.read_dir(path) {
        Ok(entries) => entries,
        Err(StorageError::NotFound | StorageError::NoPath | StorageError::NotADirectory) => {
            return Err(Rejection::NotFound.into())
        }
        Err(e) => return Err(e.into()),
    };

    if !req.json {
        let page = ctx
            .assets
            .get(AssetKind::DirectoryHtml)
            .ok_or(Rejection::NotFound)?;
        writer.reply_static(page)?;
        return Ok(Routed::done());
    }

    let resolution = ctx.storage.timestamp_resolution_ns();
    writer.begin_chunked_json()?;
    writer.chunk(&["["])?;
    let mut first = true;
    for entry in entries {
        // Headers are out, so a failure can only cut the listing short
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                error!(path, error = %e, "listing stopped");
                break;
            }
        };
        let json = match serde_json::to_string(&ListingEntry {
            name: &entry.name,
            directory: entry.is_dir,
            modified_ns: truncate_timestamp(entry.modified_ns, resolution),
            file_size: if entry.is_dir { 0 } else { entry.len },
        }) {
            Ok(json) => json,
            Err(e) => {
                error!(path, error = %e, "listing stopped");
                break;
            }
        };
        writer.chunk(&[if first { "" } else { "," }, json.as_str()])?;
        first = false;
    }
    writer.chunk(&["]"])?;
    writer.end_chunks()?;
    Ok(Routed::done())
}

fn make_directory<S: Storage, C: Connection + ?Sized>(
    ctx: &mut RouteContext<'_, S>,
    writer: &mut ResponseWriter<'_, C>,
    req: &Request,
    path: &str,
) -> Result<Routed> {
    let _lease = WriteLease::acquire(ctx.usb).ok_or(Error::Conflict)?;

    let modified = timestamp_from_millis(req.timestamp_ms, ctx.storage.timestamp_resolution_ns());
    match with_time_override(&mut *ctx.storage, modified, |storage| storage.mkdir(path)) {
        Ok(()) => {
            info!(path, "directory created");
            writer.reply_empty(StatusCode::CREATED)?;
            Ok(Routed::reload())
        }
        Err(StorageError::Exists) => {
            writer.reply_empty(StatusCode::NO_CONTENT)?;
            Ok(Routed::done())
        }
        Err(e) => Err(e.into()),
    }
}

fn send_file<S: Storage, C: Connection + ?Sized>(
    ctx: &mut RouteContext<'_, S>,
    writer: &mut ResponseWriter<'_, C>,
    path: &str,
) -> Result<Routed> {
    let mut file = ctx.storage.open(path, OpenMode::Read).map_err(|e| {
        debug!(path, error = %e, "open for read failed");
        Error::from(Rejection::NotFound)
    })?;

    let len = file.len();
    writer.begin_body(len, content_type_for(path))?;

    let mut block = [0u8; BLOCK_SIZE];
    let mut sent = 0u64;
    while sent < len {
        let n = match file.read(&mut block) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                error!(path, error = %e, "file read failed");
                break;
            }
        };
        writer.send_raw(&block[..n])?;
        sent += n as u64;
    }

    if sent < len {
        // The declared length can no longer be honoured
        warn!(path, sent, len, "file shorter than announced");
        return Ok(Routed::close());
    }
    Ok(Routed::done())
}

fn receive_file<S: Storage, C: Connection + ?Sized>(
    ctx: &mut RouteContext<'_, S>,
    writer: &mut ResponseWriter<'_, C>,
    req: &Request,
    path: &str,
) -> Result<Routed> {
    let _lease = WriteLease::acquire(ctx.usb).ok_or(Error::Conflict)?;

    let modified = timestamp_from_millis(req.timestamp_ms, ctx.storage.timestamp_resolution_ns());
    with_time_override(&mut *ctx.storage, modified, |storage| {
        write_file(storage, writer, req, path)
    })
}

fn write_file<S: Storage, C: Connection + ?Sized>(
    storage: &mut S,
    writer: &mut ResponseWriter<'_, C>,
    req: &Request,
    path: &str,
) -> Result<Routed> {
    let (mut file, created) = match storage.open(path, OpenMode::Write) {
        Ok(file) => (file, false),
        Err(StorageError::NotFound) => (storage.open(path, OpenMode::CreateWrite)?, true),
        Err(e) => return Err(e.into()),
    };
    if req.expect {
        writer.reply_continue()?;
    }

    // Reserve the full length up front so a full volume is refused before
    // any of the old contents are lost.
    let len = req.content_length;
    let too_big = Error::Capacity {
        requested: len,
        expected: req.expect,
    };
    match file.seek(len) {
        Ok(reached) if reached < len => return Err(too_big),
        Err(StorageError::NoSpace) => return Err(too_big),
        Ok(_) => {}
        Err(e) => return Err(e.into()),
    }
    file.truncate()?;
    file.seek(0)?;

    let mut block = [0u8; BLOCK_SIZE];
    loop {
        let n = writer.read_body(&mut block)?;
        if n == 0 {
            break;
        }
        let written = file.write(&block[..n])?;
        if written < n {
            error!(path, written, expected = n, "short write");
            return Err(StorageError::NoSpace.into());
        }
    }
    drop(file);

    info!(path, bytes = len, created, "file written");
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::NO_CONTENT
    };
    writer.reply_empty(status)?;
    Ok(Routed::reload())
}
