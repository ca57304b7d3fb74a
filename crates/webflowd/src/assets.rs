//! Pages and scripts compiled into the binary

use bytes::Bytes;
use webflow_core::{AssetKind, AssetTable, StaticAsset};

const HTML: &str = "text/html";
const JS: &str = "text/javascript";

fn asset(content_type: &'static str, body: &'static [u8]) -> StaticAsset {
    StaticAsset::new(content_type, Bytes::from_static(body))
}

pub fn bundled() -> AssetTable {
    AssetTable::new()
        .with(
            AssetKind::WelcomeHtml,
            asset(HTML, include_bytes!("../assets/welcome.html")),
        )
        .with(
            AssetKind::WelcomeJs,
            asset(JS, include_bytes!("../assets/welcome.js")),
        )
        .with(
            AssetKind::DirectoryHtml,
            asset(HTML, include_bytes!("../assets/directory.html")),
        )
        .with(
            AssetKind::DirectoryJs,
            asset(JS, include_bytes!("../assets/directory.js")),
        )
        .with(
            AssetKind::SerialHtml,
            asset(HTML, include_bytes!("../assets/serial.html")),
        )
        .with(
            AssetKind::SerialJs,
            asset(JS, include_bytes!("../assets/serial.js")),
        )
        .with(
            AssetKind::Favicon,
            asset("image/x-icon", include_bytes!("../assets/favicon.ico")),
        )
}
