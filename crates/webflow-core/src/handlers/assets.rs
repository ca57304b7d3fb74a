//! Compiled-in pages outside `/fs/` and `/cp/`

use crate::error::Rejection;
use crate::handlers::{AssetKind, AssetTable};
use crate::net::Connection;
use crate::request::{Method, Request};
use crate::response::ResponseWriter;
use crate::router::Routed;
use crate::Result;

/// Exact-path GET lookup in the asset table
pub fn handle<C: Connection + ?Sized>(
    assets: &AssetTable,
    writer: &mut ResponseWriter<'_, C>,
    req: &Request,
    path: &str,
) -> Result<Routed> {
    if req.method() != Method::Get {
        return Err(Rejection::MethodNotAllowed.into());
    }
    let asset = AssetKind::for_path(path)
        .and_then(|kind| assets.get(kind))
        .ok_or(Rejection::NotFound)?;
    writer.reply_static(asset)?;
    Ok(Routed::done())
}
