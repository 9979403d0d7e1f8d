//! Per-record header

use crate::config::{RECORD_HEADER_LEN, RECORD_HEADER_SPAN};
use crate::segment::{frame, segment_span, unframe, ByteReader, FilePos, SharedFile};
use crate::{Result, Timestamp};
use bytes::{BufMut, BytesMut};

/// Fixed-size header in front of every record
///
/// ```text
/// | timestamp:i64 | dict_len:u32 | array_len:u32 | metrics_len:u32 | reserved:u32 | crc32 |
/// ```
///
/// The dictionary delta (if `dict_len > 0`), record array and metric
/// segments follow back to back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    /// Offset of this header in the file
    pub offset: u64,
    pub timestamp: Timestamp,
    /// Payload length of the dictionary delta, 0 when absent
    pub dict_len: u32,
    /// Payload length of the record array
    pub array_len: u32,
    /// On-disk span of all metric segments
    pub metrics_len: u32,
}

impl RecordHeader {
    pub fn has_dictionary(&self) -> bool {
        self.dict_len != 0
    }

    /// Position of the dictionary delta segment
    pub fn dict_pos(&self) -> Option<FilePos> {
        self.has_dictionary()
            .then(|| FilePos::new(self.offset + RECORD_HEADER_SPAN, self.dict_len))
    }

    /// Position of the record array segment
    pub fn array_pos(&self) -> FilePos {
        FilePos::new(
            self.offset + RECORD_HEADER_SPAN + segment_span(self.dict_len),
            self.array_len,
        )
    }

    /// Offset metric segment pointers are relative to
    pub fn metrics_base(&self) -> u64 {
        self.array_pos().end()
    }

    /// Offset just past the record
    pub fn end(&self) -> u64 {
        self.metrics_base() + self.metrics_len as u64
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(RECORD_HEADER_LEN);
        buf.put_i64_le(self.timestamp);
        buf.put_u32_le(self.dict_len);
        buf.put_u32_le(self.array_len);
        buf.put_u32_le(self.metrics_len);
        buf.put_u32_le(0);
        frame(&buf)
    }

    pub fn decode(offset: u64, framed: &[u8]) -> Result<Self> {
        let payload = unframe(framed, RECORD_HEADER_LEN as u32)?;
        let mut reader = ByteReader::new(payload);
        let hdr = Self {
            offset,
            timestamp: reader.i64()?,
            dict_len: reader.u32()?,
            array_len: reader.u32()?,
            metrics_len: reader.u32()?,
        };
        let _reserved = reader.u32()?;
        Ok(hdr)
    }

    /// Read and verify the header at `offset`
    pub fn read(file: &SharedFile, offset: u64) -> Result<Self> {
        Self::decode(offset, &file.read_at(offset, RECORD_HEADER_SPAN as usize)?)
    }
}
