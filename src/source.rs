use std::{
    fmt::Debug,
    io::{self, Read},
    marker::PhantomData,
};

use crate::{
    buffer::{Pooled, SOURCE_BUFFERS, SOURCE_BUF_SIZE},
    error::into_io_error,
    skip::{Seekable, Skip, Unseekable},
    Error, Result,
};

/// A forward-only byte stream with bounded look-ahead.
///
/// Implemented by the root [`Source`] and by every nested
/// [`BoxReader`](crate::bmff::BoxReader), so parsers and callbacks never
/// need to know how deep in a container they are.
pub trait ByteSource {
    /// Returns exactly `n` bytes without consuming them.
    ///
    /// Fails with [`Error::Eof`] when fewer than `n` bytes are left.
    fn peek(&mut self, n: usize) -> Result<&[u8]>;

    /// Returns up to `n` bytes without consuming them. The result is shorter
    /// than `n` only at the end of the stream.
    fn peek_max(&mut self, n: usize) -> Result<&[u8]>;

    /// Consumes exactly `n` bytes.
    fn discard(&mut self, n: u64) -> Result<()>;

    /// Reads up to `buf.len()` bytes, returning 0 at the end of the stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Absolute offset from the origin of the scan.
    fn position(&self) -> u64;

    /// Bytes that may still be consumed, `None` when unbounded.
    fn remaining(&self) -> Option<u64>;

    fn read_exact_bytes(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.read(buf)?;
            if n == 0 {
                return Err(Error::Eof);
            }
            buf = &mut buf[n..];
        }
        Ok(())
    }

    /// Reads everything that is left, refusing to allocate more than `limit`
    /// bytes.
    fn read_to_vec(&mut self, limit: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                return Ok(out);
            }
            if out.len() + n > limit {
                return Err(format!("payload exceeds {limit} bytes").into());
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }
}

impl<T: ByteSource + ?Sized> ByteSource for &mut T {
    fn peek(&mut self, n: usize) -> Result<&[u8]> {
        (**self).peek(n)
    }

    fn peek_max(&mut self, n: usize) -> Result<&[u8]> {
        (**self).peek_max(n)
    }

    fn discard(&mut self, n: u64) -> Result<()> {
        (**self).discard(n)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        ByteSource::read(&mut **self, buf)
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn remaining(&self) -> Option<u64> {
        (**self).remaining()
    }
}

impl Read for dyn ByteSource + '_ {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        ByteSource::read(self, buf).map_err(into_io_error)
    }
}

/// Buffered root of a scan.
///
/// The buffer is taken from a process-wide pool and returned on drop. Large
/// discards turn into seeks when `S` is [`Seekable`].
pub struct Source<R, S = Seekable> {
    reader: R,
    buf: Pooled<Vec<u8>>,
    start: usize,
    end: usize,
    pos: u64,
    phantom: PhantomData<S>,
}

impl<R: Read> Source<R, Unseekable> {
    /// Wraps a sequential reader; discards are always read and dropped.
    pub fn unseekable(reader: R) -> Self {
        Self::new(reader)
    }
}

impl<R, S: Skip<R>> Source<R, S>
where
    R: Read,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: SOURCE_BUFFERS.acquire(),
            start: 0,
            end: 0,
            pos: 0,
            phantom: PhantomData,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn buffered(&self) -> usize {
        self.end - self.start
    }

    /// Tries to hold at least `n` bytes in the buffer.
    fn fill(&mut self, n: usize) -> Result<()> {
        if n > self.buf.len() {
            return Err(format!("peek of {n} bytes exceeds the read buffer").into());
        }
        if self.buffered() >= n {
            return Ok(());
        }
        if self.start + n > self.buf.len() {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        while self.buffered() < n {
            let end = self.end;
            let read = match self.reader.read(&mut self.buf[end..]) {
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if read == 0 {
                break;
            }
            self.end += read;
        }
        Ok(())
    }

    fn consume(&mut self, n: usize) {
        self.start += n;
        self.pos += n as u64;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }
}

impl<R, S: Skip<R>> ByteSource for Source<R, S>
where
    R: Read,
{
    fn peek(&mut self, n: usize) -> Result<&[u8]> {
        self.fill(n)?;
        if self.buffered() < n {
            return Err(Error::Eof);
        }
        Ok(&self.buf[self.start..self.start + n])
    }

    fn peek_max(&mut self, n: usize) -> Result<&[u8]> {
        let n = n.min(self.buf.len());
        self.fill(n)?;
        let n = n.min(self.buffered());
        Ok(&self.buf[self.start..self.start + n])
    }

    fn discard(&mut self, n: u64) -> Result<()> {
        let from_buf = n.min(self.buffered() as u64) as usize;
        self.consume(from_buf);
        let mut left = n - from_buf as u64;
        if left == 0 {
            return Ok(());
        }

        if left >= SOURCE_BUF_SIZE as u64 && S::skip_by_seek(&mut self.reader, left)? {
            tracing::trace!(left, mode = S::debug(), "skipped by seek");
            self.pos += left;
            return Ok(());
        }

        while left > 0 {
            self.fill(1)?;
            let avail = self.buffered();
            if avail == 0 {
                return Err(Error::Eof);
            }
            let n = (avail as u64).min(left) as usize;
            self.consume(n);
            left -= n as u64;
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.buffered() == 0 {
            if buf.len() >= self.buf.len() {
                let n = self.reader.read(buf)?;
                self.pos += n as u64;
                return Ok(n);
            }
            self.fill(1)?;
        }
        let n = buf.len().min(self.buffered());
        buf[..n].copy_from_slice(&self.buf[self.start..self.start + n]);
        self.consume(n);
        Ok(n)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn remaining(&self) -> Option<u64> {
        None
    }
}

impl<R, S> Debug for Source<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("pos", &self.pos)
            .field("buffered", &(self.end - self.start))
            .finish_non_exhaustive()
    }
}

/// Read-only view over a byte slice. Handy for already-loaded payloads.
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
    base: u64,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }

    /// `base` is reported as the position of `data[0]`.
    pub fn with_base(data: &'a [u8], base: u64) -> Self {
        Self { data, pos: 0, base }
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

impl ByteSource for SliceSource<'_> {
    fn peek(&mut self, n: usize) -> Result<&[u8]> {
        self.rest().get(..n).ok_or(Error::Eof)
    }

    fn peek_max(&mut self, n: usize) -> Result<&[u8]> {
        let rest = self.rest();
        Ok(&rest[..n.min(rest.len())])
    }

    fn discard(&mut self, n: u64) -> Result<()> {
        if n > self.rest().len() as u64 {
            self.pos = self.data.len();
            return Err(Error::Eof);
        }
        self.pos += n as usize;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let rest = self.rest();
        let n = buf.len().min(rest.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }

    fn position(&self) -> u64 {
        self.base + self.pos as u64
    }

    fn remaining(&self) -> Option<u64> {
        Some(self.rest().len() as u64)
    }
}
