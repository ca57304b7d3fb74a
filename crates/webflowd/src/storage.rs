//! A host directory served as the device volume

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;
use webflow_core::{
    DirEntry, Metadata, OpenMode, Storage, StorageError, StorageFile, StorageResult,
};

fn to_ns(time: io::Result<SystemTime>) -> u64 {
    time.ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|age| u64::try_from(age.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn from_ns(ns: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(ns)
}

fn storage_error(e: io::Error) -> StorageError {
    match e.kind() {
        io::ErrorKind::NotFound => StorageError::NotFound,
        io::ErrorKind::AlreadyExists => StorageError::Exists,
        io::ErrorKind::StorageFull | io::ErrorKind::FileTooLarge => StorageError::NoSpace,
        _ => StorageError::Other(e.to_string()),
    }
}

/// Largest file a volume accepts unless told otherwise
pub const DEFAULT_MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Serves `root` as the volume. Paths arrive absolute (`/lib/a.py`) and
/// free of `..` segments. Symlinks are followed only while they stay
/// inside the root; anything leading out of it reads as missing.
#[derive(Debug, Clone)]
pub struct DirStorage {
    root: PathBuf,
    time_override: Option<u64>,
    max_file_size: u64,
    resolution_ns: u64,
}

impl DirStorage {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().canonicalize()?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(Self {
            root,
            time_override: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            resolution_ns: 1,
        })
    }

    /// Emulate a small volume: files cannot grow past `bytes`
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Granularity of stored modification times, e.g. two seconds for FAT
    pub fn resolution_ns(mut self, ns: u64) -> Self {
        self.resolution_ns = ns.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let full = self.root.join(path.trim_start_matches('/'));
        self.contain(&full)?;
        Ok(full)
    }

    /// The nearest existing ancestor of `full` must resolve inside the root
    fn contain(&self, full: &Path) -> StorageResult<()> {
        for existing in full.ancestors() {
            match existing.canonicalize() {
                Ok(real) if real.starts_with(&self.root) => return Ok(()),
                Ok(real) => {
                    warn!(path = %full.display(), target = %real.display(), "link leaves the volume");
                    return Err(StorageError::NotFound);
                }
                // Dangling link: following it could create a file anywhere
                Err(_) if fs::symlink_metadata(existing).is_ok() => {
                    warn!(path = %full.display(), "unresolvable link");
                    return Err(StorageError::NotFound);
                }
                Err(_) => continue,
            }
        }
        Err(StorageError::NotFound)
    }

    /// NotFound for a missing leaf, NoPath when the parent is missing too
    fn missing(&self, full: &Path) -> StorageError {
        match full.parent() {
            Some(parent) if parent.is_dir() => StorageError::NotFound,
            _ => StorageError::NoPath,
        }
    }

    fn lookup_error(&self, full: &Path, e: io::Error) -> StorageError {
        if e.kind() == io::ErrorKind::NotFound {
            self.missing(full)
        } else {
            storage_error(e)
        }
    }

    fn stamp(&self, full: &Path) {
        let Some(ns) = self.time_override else {
            return;
        };
        let result = File::open(full).and_then(|handle| handle.set_modified(from_ns(ns)));
        if let Err(e) = result {
            warn!(path = %full.display(), error = %e, "could not set modification time");
        }
    }
}

impl Storage for DirStorage {
    type File = DirFile;
    type ReadDir = std::vec::IntoIter<StorageResult<DirEntry>>;

    fn open(&mut self, path: &str, mode: OpenMode) -> StorageResult<DirFile> {
        let full = self.resolve(path)?;
        if full.is_dir() {
            return Err(StorageError::Other("is a directory".to_string()));
        }
        let file = match mode {
            OpenMode::Read => File::open(&full),
            OpenMode::Write => OpenOptions::new().read(true).write(true).open(&full),
            OpenMode::CreateWrite => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&full),
        }
        .map_err(|e| self.lookup_error(&full, e))?;

        let file = DirFile {
            file,
            pos: 0,
            max_len: self.max_file_size,
            modified: self.time_override.map(from_ns),
            dirty: false,
        };
        Ok(file)
    }

    fn stat(&mut self, path: &str) -> StorageResult<Metadata> {
        let full = self.resolve(path)?;
        let meta = fs::metadata(&full).map_err(|e| self.lookup_error(&full, e))?;
        Ok(Metadata {
            is_dir: meta.is_dir(),
            len: if meta.is_dir() { 0 } else { meta.len() },
            modified_ns: to_ns(meta.modified()),
        })
    }

    fn read_dir(&mut self, path: &str) -> StorageResult<Self::ReadDir> {
        let full = self.resolve(path)?;
        if full.is_file() {
            return Err(StorageError::NotADirectory);
        }
        let mut entries: Vec<StorageResult<DirEntry>> = fs::read_dir(&full)
            .map_err(|e| self.lookup_error(&full, e))?
            .map(|entry| {
                let entry = entry.map_err(storage_error)?;
                let meta = entry.metadata().map_err(storage_error)?;
                Ok(DirEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    is_dir: meta.is_dir(),
                    len: if meta.is_dir() { 0 } else { meta.len() },
                    modified_ns: to_ns(meta.modified()),
                })
            })
            .collect();
        entries.sort_by(|a, b| match (a, b) {
            (Ok(a), Ok(b)) => a.name.cmp(&b.name),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => std::cmp::Ordering::Equal,
        });
        Ok(entries.into_iter())
    }

    fn mkdir(&mut self, path: &str) -> StorageResult<()> {
        let full = self.resolve(path)?;
        fs::create_dir(&full).map_err(|e| self.lookup_error(&full, e))?;
        self.stamp(&full);
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> StorageResult<()> {
        // The entry itself may be a link; only where it lives has to be inside
        let full = self.root.join(path.trim_start_matches('/'));
        if full == self.root {
            return Err(StorageError::Other("cannot remove the volume root".to_string()));
        }
        if let Some(parent) = full.parent() {
            self.contain(parent)?;
        }
        let meta = fs::symlink_metadata(&full).map_err(|e| self.lookup_error(&full, e))?;
        if meta.is_dir() {
            fs::remove_dir(&full)
        } else {
            fs::remove_file(&full)
        }
        .map_err(storage_error)
    }

    fn set_time_override(&mut self, modified_ns: Option<u64>) {
        self.time_override = modified_ns;
    }

    fn timestamp_resolution_ns(&self) -> u64 {
        self.resolution_ns
    }
}

/// An open file. A pending time override is applied when the handle is
/// dropped, after the last write.
#[derive(Debug)]
pub struct DirFile {
    file: File,
    pos: u64,
    max_len: u64,
    modified: Option<SystemTime>,
    dirty: bool,
}

impl StorageFile for DirFile {
    fn read(&mut self, buf: &mut [u8]) -> StorageResult<usize> {
        let n = self.file.read(buf).map_err(storage_error)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> StorageResult<usize> {
        let room = self.max_len.saturating_sub(self.pos);
        let take = buf.len().min(usize::try_from(room).unwrap_or(usize::MAX));
        let n = self.file.write(&buf[..take]).map_err(storage_error)?;
        self.pos += n as u64;
        self.dirty = true;
        Ok(n)
    }

    fn seek(&mut self, pos: u64) -> StorageResult<u64> {
        let reached = pos.min(self.max_len);
        let len = self.file.metadata().map_err(storage_error)?.len();
        if len < reached {
            self.file.set_len(reached).map_err(storage_error)?;
            self.dirty = true;
        }
        self.pos = self
            .file
            .seek(SeekFrom::Start(reached))
            .map_err(storage_error)?;
        Ok(self.pos)
    }

    fn truncate(&mut self) -> StorageResult<()> {
        self.file.set_len(self.pos).map_err(storage_error)?;
        self.dirty = true;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.file.metadata().map(|meta| meta.len()).unwrap_or(0)
    }
}

impl Drop for DirFile {
    fn drop(&mut self) {
        if !self.dirty {
            return;
        }
        if let Some(time) = self.modified {
            if let Err(e) = self.file.set_modified(time) {
                warn!(error = %e, "could not set modification time");
            }
        }
    }
}
