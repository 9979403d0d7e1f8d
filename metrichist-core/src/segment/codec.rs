//! Segment framing and primitive decoding
//!
//! On disk a segment is its payload, zero padding up to the alignment
//! boundary, then a CRC32 over payload and padding:
//!
//! ```text
//! | payload (len bytes) | pad | crc32 (4 bytes) |
//! ```
//!
//! A zero-length segment is absent and takes no space.

use crate::config::{ALIGNMENT, CRC_LEN};
use crate::{HistError, Result};
use bytes::{BufMut, BytesMut};
use std::fmt;

/// Location of a segment: offset of its first payload byte and payload length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilePos {
    pub offset: u64,
    pub len: u32,
}

impl FilePos {
    pub fn new(offset: u64, len: u32) -> Self {
        Self { offset, len }
    }

    /// Offset just past the segment's CRC
    pub fn end(&self) -> u64 {
        self.offset + segment_span(self.len)
    }
}

impl fmt::Display for FilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.offset, self.len)
    }
}

/// Round `len` up to the alignment boundary
pub fn align(len: u64) -> u64 {
    (len + ALIGNMENT - 1) / ALIGNMENT * ALIGNMENT
}

/// Bytes a segment of `len` payload bytes occupies on disk
pub fn segment_span(len: u32) -> u64 {
    if len == 0 {
        0
    } else {
        align(len as u64) + CRC_LEN
    }
}

/// Pad and checksum a payload
pub(crate) fn frame(payload: &[u8]) -> BytesMut {
    let padded = align(payload.len() as u64) as usize;
    let mut buf = BytesMut::with_capacity(padded + CRC_LEN as usize);
    buf.put_slice(payload);
    buf.put_bytes(0, padded - payload.len());
    let checksum = crc32fast::hash(&buf);
    buf.put_u32_le(checksum);
    buf
}

/// Verify a framed segment and return its payload
pub(crate) fn unframe(framed: &[u8], len: u32) -> Result<&[u8]> {
    let padded = align(len as u64) as usize;
    if framed.len() != padded + CRC_LEN as usize {
        return Err(HistError::decoding(format!(
            "segment of {} bytes framed in {} bytes",
            len,
            framed.len()
        )));
    }

    let expected = u32::from_le_bytes([
        framed[padded],
        framed[padded + 1],
        framed[padded + 2],
        framed[padded + 3],
    ]);
    let actual = crc32fast::hash(&framed[..padded]);
    if expected != actual {
        return Err(HistError::ChecksumMismatch { expected, actual });
    }

    Ok(&framed[..len as usize])
}

pub(crate) fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Bounds-checked little-endian reader over a segment payload
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fail unless every byte was consumed
    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(HistError::decoding(format!(
                "{} trailing bytes in segment",
                self.remaining()
            )));
        }
        Ok(())
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(HistError::decoding(format!(
                "need {} bytes at position {}, only {} left",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    /// Read a count and make sure at least `min_item_len` bytes per item remain
    pub fn count(&mut self, min_item_len: usize) -> Result<usize> {
        let count = self.u32()? as usize;
        if count.saturating_mul(min_item_len) > self.remaining() {
            return Err(HistError::decoding(format!(
                "count {} exceeds remaining {} bytes",
                count,
                self.remaining()
            )));
        }
        Ok(count)
    }

    pub fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec()).map_err(|e| HistError::decoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        assert_eq!(align(0), 0);
        assert_eq!(align(1), 4);
        assert_eq!(align(4), 4);
        assert_eq!(align(5), 8);
        assert_eq!(segment_span(0), 0);
        assert_eq!(segment_span(5), 12);
        assert_eq!(FilePos::new(100, 8).end(), 112);
    }

    #[test]
    fn test_frame_and_unframe() {
        let framed = frame(b"hello");
        assert_eq!(framed.len(), 12);

        let payload = unframe(&framed, 5).unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn test_unframe_detects_any_flipped_byte() {
        let framed = frame(b"payload!!");
        for i in 0..framed.len() {
            let mut corrupted = framed.to_vec();
            corrupted[i] ^= 0x40;
            assert!(unframe(&corrupted, 9).is_err(), "flip at {} undetected", i);
        }
    }

    #[test]
    fn test_reader_bounds() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(7);
        put_string(&mut buf, "abc");
        buf.put_u8(1);

        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.u32().unwrap(), 7);
        assert_eq!(reader.string().unwrap(), "abc");
        assert!(reader.finish().is_err());
        assert_eq!(reader.u8().unwrap(), 1);
        reader.finish().unwrap();
        assert!(reader.u64().is_err());
    }

    #[test]
    fn test_count_rejects_oversized() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(1_000_000);
        let mut reader = ByteReader::new(&buf);
        assert!(reader.count(4).is_err());
    }
}
