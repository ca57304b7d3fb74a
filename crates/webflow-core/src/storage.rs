//! Storage collaborator traits
//!
//! A POSIX-flavoured view of the device filesystem plus the device-wide
//! USB mass-storage exclusivity lock. Paths are absolute within the volume
//! (`/`, `/lib`, `/code.py`) and never end in `/` except for the root.

use thiserror::Error;

/// Storage failures, as reported by the filesystem
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("no such file")]
    NotFound,
    /// A parent directory is missing
    #[error("no such path")]
    NoPath,
    #[error("already exists")]
    Exists,
    #[error("no space left")]
    NoSpace,
    #[error("not a directory")]
    NotADirectory,
    #[error("{0}")]
    Other(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// How to open a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Existing files only
    Write,
    /// Create if missing
    CreateWrite,
}

/// Result of `stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub is_dir: bool,
    pub len: u64,
    /// Nanoseconds since the Unix epoch, at the storage's own resolution
    pub modified_ns: u64,
}

/// One directory listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub len: u64,
    pub modified_ns: u64,
}

/// An open file
pub trait StorageFile {
    fn read(&mut self, buf: &mut [u8]) -> StorageResult<usize>;
    fn write(&mut self, buf: &[u8]) -> StorageResult<usize>;

    /// Move to `pos`, growing the file if needed. Returns the position
    /// actually reached, which is short of `pos` when the volume is full.
    fn seek(&mut self, pos: u64) -> StorageResult<u64>;

    /// Cut the file at the current position
    fn truncate(&mut self) -> StorageResult<()>;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The filesystem
pub trait Storage {
    type File: StorageFile;
    type ReadDir: Iterator<Item = StorageResult<DirEntry>>;

    fn open(&mut self, path: &str, mode: OpenMode) -> StorageResult<Self::File>;
    fn stat(&mut self, path: &str) -> StorageResult<Metadata>;
    fn read_dir(&mut self, path: &str) -> StorageResult<Self::ReadDir>;
    fn mkdir(&mut self, path: &str) -> StorageResult<()>;

    /// Remove a file or an empty directory
    fn unlink(&mut self, path: &str) -> StorageResult<()>;

    /// Stamp subsequent writes with this time instead of the clock.
    /// `None` goes back to the clock.
    fn set_time_override(&mut self, modified_ns: Option<u64>);

    /// Granularity of stored modification times, in nanoseconds
    fn timestamp_resolution_ns(&self) -> u64 {
        1
    }
}

/// Device-wide lock shared with USB mass storage
pub trait MassStorageLock {
    /// Take the storage for a web write. Fails while the USB host has it.
    fn try_acquire(&self) -> bool;
    fn release(&self);
}

/// For devices without USB mass storage: the web always owns the volume
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMassStorage;

impl MassStorageLock for NoMassStorage {
    fn try_acquire(&self) -> bool {
        true
    }

    fn release(&self) {}
}

/// Holds the mass-storage lock and releases it when dropped, on every path
pub struct WriteLease<'a> {
    lock: &'a dyn MassStorageLock,
}

impl<'a> WriteLease<'a> {
    pub fn acquire(lock: &'a dyn MassStorageLock) -> Option<Self> {
        lock.try_acquire().then_some(Self { lock })
    }
}

impl Drop for WriteLease<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Run `f` with writes stamped at `modified_ns`, clearing the override
/// afterwards whatever `f` returns.
pub fn with_time_override<S: Storage + ?Sized, T>(
    storage: &mut S,
    modified_ns: Option<u64>,
    f: impl FnOnce(&mut S) -> T,
) -> T {
    if modified_ns.is_some() {
        storage.set_time_override(modified_ns);
    }
    let out = f(storage);
    if modified_ns.is_some() {
        storage.set_time_override(None);
    }
    out
}

/// Round a timestamp down to what the storage can represent
pub fn truncate_timestamp(ns: u64, resolution_ns: u64) -> u64 {
    if resolution_ns <= 1 {
        return ns;
    }
    ns - ns % resolution_ns
}

/// Milliseconds from `X-Timestamp` to storage nanoseconds
pub fn timestamp_from_millis(ms: u64, resolution_ns: u64) -> Option<u64> {
    if ms == 0 {
        return None;
    }
    Some(truncate_timestamp(ms.saturating_mul(1_000_000), resolution_ns))
}
