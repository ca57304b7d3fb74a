//! Resource handlers
//!
//! One module per route family. Each handler writes its complete reply
//! through the [`ResponseWriter`](crate::ResponseWriter) and reports what the
//! scheduler has to do next as a [`Routed`](crate::Routed).

pub mod assets;
pub mod control;
pub mod fs;

use bytes::Bytes;
use smallvec::SmallVec;

/// A compiled-in page or script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticAsset {
    pub content_type: &'static str,
    /// `Content-Encoding` of `body`, e.g. `gzip`
    pub encoding: Option<&'static str>,
    pub body: Bytes,
}

impl StaticAsset {
    pub fn new(content_type: &'static str, body: impl Into<Bytes>) -> Self {
        Self {
            content_type,
            encoding: None,
            body: body.into(),
        }
    }

    pub fn encoding(mut self, encoding: &'static str) -> Self {
        self.encoding = Some(encoding);
        self
    }
}

/// The pages and scripts the device serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    WelcomeHtml,
    WelcomeJs,
    DirectoryHtml,
    DirectoryJs,
    SerialHtml,
    SerialJs,
    Favicon,
}

impl AssetKind {
    /// The asset served at a top-level path. The directory and serial
    /// pages only appear under `/fs/` and `/cp/serial/`.
    pub fn for_path(path: &str) -> Option<Self> {
        match path {
            "/" => Some(AssetKind::WelcomeHtml),
            "/welcome.js" => Some(AssetKind::WelcomeJs),
            "/directory.js" => Some(AssetKind::DirectoryJs),
            "/serial.js" => Some(AssetKind::SerialJs),
            "/favicon.ico" => Some(AssetKind::Favicon),
            _ => None,
        }
    }
}

/// Lookup table from asset kind to bytes
#[derive(Debug, Clone, Default)]
pub struct AssetTable {
    entries: SmallVec<[(AssetKind, StaticAsset); 8]>,
}

impl AssetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an asset
    pub fn insert(&mut self, kind: AssetKind, asset: StaticAsset) {
        match self.entries.iter_mut().find(|(k, _)| *k == kind) {
            Some(entry) => entry.1 = asset,
            None => self.entries.push((kind, asset)),
        }
    }

    pub fn with(mut self, kind: AssetKind, asset: StaticAsset) -> Self {
        self.insert(kind, asset);
        self
    }

    pub fn get(&self, kind: AssetKind) -> Option<&StaticAsset> {
        self.entries
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, asset)| asset)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
