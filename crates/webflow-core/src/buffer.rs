//! Fixed-capacity byte buffers for request fields
//!
//! Request fields never grow past their capacity. Bytes that do not fit are
//! dropped, and the buffer remembers that it lost data so callers can tell a
//! truncated field from a complete one.

use arrayvec::ArrayVec;
use std::fmt;

/// Outcome of pushing one byte into a [`Bounded`] buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    Stored,
    Truncated,
}

/// A byte buffer of at most `N` bytes that records overflow
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Bounded<const N: usize> {
    bytes: ArrayVec<u8, N>,
    truncated: bool,
}

impl<const N: usize> Bounded<N> {
    pub fn new() -> Self {
        Self {
            bytes: ArrayVec::new(),
            truncated: false,
        }
    }

    /// Append one byte, dropping it once the buffer is full
    #[inline]
    pub fn push(&mut self, byte: u8) -> Push {
        match self.bytes.try_push(byte) {
            Ok(()) => Push::Stored,
            Err(_) => {
                self.truncated = true;
                Push::Truncated
            }
        }
    }

    /// Replace the contents with `src`, keeping as much as fits
    pub fn set(&mut self, src: &[u8]) -> Push {
        self.clear();
        let keep = src.len().min(N);
        // keep <= N so this never fails
        let _ = self.bytes.try_extend_from_slice(&src[..keep]);
        if keep < src.len() {
            self.truncated = true;
            Push::Truncated
        } else {
            Push::Stored
        }
    }

    /// Copy another buffer, carrying over its truncation
    pub fn copy_from<const M: usize>(&mut self, other: &Bounded<M>) -> Push {
        let pushed = self.set(other.as_bytes());
        if other.is_truncated() {
            self.truncated = true;
            return Push::Truncated;
        }
        pushed
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.truncated = false;
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Contents as UTF-8, if they are valid UTF-8
    pub fn to_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True once any byte has been dropped since the last clear
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> fmt::Debug for Bounded<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.bytes))?;
        if self.truncated {
            f.write_str("...")?;
        }
        Ok(())
    }
}

impl<const N: usize> fmt::Display for Bounded<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}
