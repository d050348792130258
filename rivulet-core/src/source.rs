//! The pull-based byte source contract and the standard adapters.
//!
//! A [`ByteSource`] is the only thing a decoder needs from its caller: a way
//! to pull bytes and a way to reposition. A short read is the one and only
//! end-of-stream signal; sources must not return early for any other reason.

use std::io::{Read, Seek, SeekFrom};

/// Origin of a byte seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    /// Relative to the start of the stream.
    Start,
    /// Relative to the current physical read position.
    Current,
}

/// A pull-based byte stream with a seek primitive.
///
/// Implementations must fill `buf` completely unless the stream genuinely
/// ends first, and must refuse (not clamp) seeks that land beyond the end of
/// the stream.
pub trait ByteSource {
    /// Pull bytes into `buf`, returning the number actually read. A return
    /// value smaller than `buf.len()` means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Move the read position. Returns `false` if the target is outside the
    /// valid byte range or the source cannot seek there.
    fn seek(&mut self, offset: u64, origin: SeekOrigin) -> bool;

    /// Total stream length in bytes, if the source knows it. Used to enable
    /// the binary-search seek strategy; `None` disables it.
    fn byte_len(&mut self) -> Option<u64> {
        None
    }
}

/// Byte source over an in-memory buffer.
#[derive(Debug, Clone)]
pub struct MemorySource<T: AsRef<[u8]>> {
    data: T,
    pos: usize,
}

impl<T: AsRef<[u8]>> MemorySource<T> {
    /// Wrap a buffer as a byte source positioned at the start.
    pub fn new(data: T) -> Self {
        MemorySource { data, pos: 0 }
    }

    /// Current read position in bytes.
    pub fn position(&self) -> u64 {
        self.pos as u64
    }
}

impl<T: AsRef<[u8]>> ByteSource for MemorySource<T> {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let data = self.data.as_ref();
        let remaining = data.len() - self.pos;
        let n = buf.len().min(remaining);
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    fn seek(&mut self, offset: u64, origin: SeekOrigin) -> bool {
        let len = self.data.as_ref().len() as u64;
        let target = match origin {
            SeekOrigin::Start => offset,
            SeekOrigin::Current => self.pos as u64 + offset,
        };
        if target > len {
            return false;
        }
        self.pos = target as usize;
        true
    }

    fn byte_len(&mut self) -> Option<u64> {
        Some(self.data.as_ref().len() as u64)
    }
}

/// Byte source over any `std::io` reader that can seek.
///
/// I/O errors cannot be expressed in the pull contract, so a failing read is
/// reported as end of stream and a failing seek as a refused seek.
#[derive(Debug)]
pub struct IoSource<R: Read + Seek> {
    inner: R,
    len: Option<u64>,
}

impl<R: Read + Seek> IoSource<R> {
    /// Wrap a reader as a byte source.
    pub fn new(inner: R) -> Self {
        IoSource { inner, len: None }
    }

    /// Unwrap the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> ByteSource for IoSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut total = 0;
        while total < buf.len() {
            match self.inner.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        total
    }

    fn seek(&mut self, offset: u64, origin: SeekOrigin) -> bool {
        let len = match self.byte_len() {
            Some(len) => len,
            None => return false,
        };
        let target = match origin {
            SeekOrigin::Start => offset,
            SeekOrigin::Current => match self.inner.stream_position() {
                Ok(pos) => pos + offset,
                Err(_) => return false,
            },
        };
        if target > len {
            return false;
        }
        self.inner.seek(SeekFrom::Start(target)).is_ok()
    }

    fn byte_len(&mut self) -> Option<u64> {
        if self.len.is_none() {
            let pos = self.inner.stream_position().ok()?;
            let end = self.inner.seek(SeekFrom::End(0)).ok()?;
            self.inner.seek(SeekFrom::Start(pos)).ok()?;
            self.len = Some(end);
        }
        self.len
    }
}
