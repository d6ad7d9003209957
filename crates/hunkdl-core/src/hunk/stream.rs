//! Byte source abstraction for the hunk walker.
//!
//! The walker needs two things a plain `io::Read` does not give it: short
//! reads it can classify at the exact field that broke, and relative seeks
//! that fail when they would leave the stream. On the filesystems this
//! format is native to, seeking past end-of-file is an error that leaves
//! the cursor in place, and several of the walker's structural checks
//! depend on observing exactly that.

use core::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// A read failure or an out-of-bounds seek.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The requested relative move would leave `[0, len]`.
    OutOfBounds { position: u64, offset: i64 },
    /// Underlying I/O failure (file-backed streams only).
    Io { kind: std::io::ErrorKind },
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::OutOfBounds { position, offset } => {
                write!(f, "seek of {offset:+} bytes from byte {position} is out of bounds")
            }
            StreamError::Io { kind } => write!(f, "stream i/o error: {kind}"),
        }
    }
}

impl std::error::Error for StreamError {}

/// Sequential, seekable byte source.
///
/// The cursor starts at byte 0 and may sit anywhere in `[0, len]`;
/// position `len` is valid (nothing left to read), anything beyond is not.
pub trait ByteStream {
    /// Read up to `buf.len()` bytes. `Ok(n)` with `n < buf.len()` is a
    /// short read; `Ok(0)` on a non-empty buffer means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError>;

    /// Move the cursor relative to its current position and return the new
    /// absolute position. On failure the cursor does not move.
    fn seek_relative(&mut self, offset: i64) -> Result<u64, StreamError>;

    /// Current cursor position in bytes from the start of the stream.
    fn position(&self) -> u64;
}

/// In-memory [`ByteStream`] over anything that derefs to bytes.
#[derive(Debug, Clone)]
pub struct MemoryStream<T> {
    data: T,
    pos: u64,
}

impl<T: AsRef<[u8]>> MemoryStream<T> {
    pub fn new(data: T) -> Self {
        Self { data, pos: 0 }
    }

    fn len(&self) -> u64 {
        self.data.as_ref().len() as u64
    }
}

impl<T: AsRef<[u8]>> ByteStream for MemoryStream<T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let data = self.data.as_ref();
        let start = self.pos as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn seek_relative(&mut self, offset: i64) -> Result<u64, StreamError> {
        let target = self
            .pos
            .checked_add_signed(offset)
            .filter(|&t| t <= self.len())
            .ok_or(StreamError::OutOfBounds {
                position: self.pos,
                offset,
            })?;
        self.pos = target;
        Ok(self.pos)
    }

    fn position(&self) -> u64 {
        self.pos
    }
}

/// File-backed [`ByteStream`].
///
/// The length is snapshotted at open so a relative seek past the end
/// fails without moving, exactly like [`MemoryStream`]. The OS itself is
/// happy to seek a file past its end; the walker's structural checks
/// need the failure instead.
#[derive(Debug)]
pub struct FileStream {
    file: File,
    len: u64,
    pos: u64,
}

impl FileStream {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len, pos: 0 })
    }
}

impl ByteStream for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let n = self
            .file
            .read(buf)
            .map_err(|err| StreamError::Io { kind: err.kind() })?;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek_relative(&mut self, offset: i64) -> Result<u64, StreamError> {
        let target = self
            .pos
            .checked_add_signed(offset)
            .filter(|&t| t <= self.len)
            .ok_or(StreamError::OutOfBounds {
                position: self.pos,
                offset,
            })?;
        self.file
            .seek(SeekFrom::Start(target))
            .map_err(|err| StreamError::Io { kind: err.kind() })?;
        self.pos = target;
        Ok(self.pos)
    }

    fn position(&self) -> u64 {
        self.pos
    }
}
