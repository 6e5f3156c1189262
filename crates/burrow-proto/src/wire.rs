//! Bounds-checked cursor types over DNS wire data.

use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Read cursor over a DNS message buffer.
///
/// All reads are bounds checked; the cursor keeps the full message slice
/// around so name parsing can chase compression pointers backwards.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Creates a cursor at the start of `buf`.
    #[inline]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// The whole underlying message.
    #[inline]
    pub const fn message(&self) -> &'a [u8] {
        self.buf
    }

    /// Current read offset.
    #[inline]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// True once the cursor has consumed the buffer.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Moves the cursor to an absolute offset.
    #[inline]
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Skips `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        let end = self.pos.checked_add(n).ok_or(Error::UnexpectedEof { offset: self.pos })?;
        if end > self.buf.len() {
            return Err(Error::UnexpectedEof { offset: end });
        }
        self.pos = end;
        Ok(())
    }

    /// Reads one byte.
    pub fn u8(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(Error::UnexpectedEof { offset: self.pos })?;
        self.pos += 1;
        Ok(b)
    }

    /// Reads a big-endian u16.
    pub fn u16(&mut self) -> Result<u16> {
        let hi = self.u8()?;
        let lo = self.u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    /// Reads a big-endian u32.
    pub fn u32(&mut self) -> Result<u32> {
        let hi = self.u16()?;
        let lo = self.u16()?;
        Ok((u32::from(hi) << 16) | u32::from(lo))
    }

    /// Reads `len` raw bytes.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(Error::UnexpectedEof { offset: self.pos })?;
        if end > self.buf.len() {
            return Err(Error::UnexpectedEof { offset: end });
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }
}

/// Write buffer for serializing DNS messages.
///
/// Tracks an optional hard limit so UDP answers can be truncated instead of
/// silently overrunning the client's advertised payload size.
#[derive(Debug)]
pub struct Emitter {
    buf: BytesMut,
    limit: usize,
}

impl Emitter {
    /// Creates an emitter bounded by `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(limit.min(4096)),
            limit,
        }
    }

    /// Bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Space left before the limit.
    #[inline]
    pub fn headroom(&self) -> usize {
        self.limit.saturating_sub(self.buf.len())
    }

    fn check(&self, extra: usize) -> Result<()> {
        if self.buf.len() + extra > self.limit {
            return Err(Error::Oversize { limit: self.limit });
        }
        Ok(())
    }

    /// Writes one byte.
    pub fn u8(&mut self, v: u8) -> Result<()> {
        self.check(1)?;
        self.buf.put_u8(v);
        Ok(())
    }

    /// Writes a big-endian u16.
    pub fn u16(&mut self, v: u16) -> Result<()> {
        self.check(2)?;
        self.buf.put_u16(v);
        Ok(())
    }

    /// Writes a big-endian u32.
    pub fn u32(&mut self, v: u32) -> Result<()> {
        self.check(4)?;
        self.buf.put_u32(v);
        Ok(())
    }

    /// Writes raw bytes.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.check(v.len())?;
        self.buf.extend_from_slice(v);
        Ok(())
    }

    /// Overwrites bytes at `offset`, used to patch section counts.
    pub fn patch(&mut self, offset: usize, v: &[u8]) {
        debug_assert!(offset + v.len() <= self.buf.len());
        if offset + v.len() <= self.buf.len() {
            self.buf[offset..offset + v.len()].copy_from_slice(v);
        }
    }

    /// Rolls the buffer back to `len` bytes, dropping everything after.
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    /// Finishes writing and hands out the frozen buffer.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    /// Borrow of the bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_reads() {
        let data = [0xAB, 0x01, 0x02, 0x00, 0x00, 0x00, 0x10, 0xFF];
        let mut cur = Cursor::new(&data);
        assert_eq!(cur.u8().unwrap(), 0xAB);
        assert_eq!(cur.u16().unwrap(), 0x0102);
        assert_eq!(cur.u32().unwrap(), 0x10);
        assert_eq!(cur.remaining(), 1);
        assert_eq!(cur.bytes(1).unwrap(), &[0xFF]);
        assert!(cur.is_exhausted());
        assert!(cur.u8().is_err());
    }

    #[test]
    fn cursor_rejects_overrun() {
        let mut cur = Cursor::new(&[0x00]);
        assert!(matches!(cur.u16(), Err(Error::UnexpectedEof { .. })));
        assert!(cur.bytes(2).is_err());
    }

    #[test]
    fn emitter_respects_limit() {
        let mut out = Emitter::new(3);
        out.u16(0xBEEF).unwrap();
        assert!(matches!(out.u16(0x0102), Err(Error::Oversize { limit: 3 })));
        out.u8(0x03).unwrap();
        assert_eq!(out.finish().as_ref(), &[0xBE, 0xEF, 0x03]);
    }

    #[test]
    fn emitter_patches_in_place() {
        let mut out = Emitter::new(16);
        out.u16(0).unwrap();
        out.u16(0x1234).unwrap();
        out.patch(0, &[0xAA, 0xBB]);
        assert_eq!(out.as_slice(), &[0xAA, 0xBB, 0x12, 0x34]);
    }
}
