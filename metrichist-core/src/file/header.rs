//! File header: mime header, metadata and CRC

use crate::config::{FILE_HEADER_LEN, HEADER_SPAN, MAGIC, MAJOR, MIME_HEADER_LEN, MINOR};
use crate::segment::{frame, unframe, Compression, ByteReader, SharedFile};
use crate::{HistError, Result, Timestamp};
use bytes::{BufMut, BytesMut};

/// Header flag bits
pub mod flags {
    /// Records are stored in timestamp order
    pub const SORTED: u32 = 0x0001;
    /// No two records share a timestamp
    pub const DISTINCT: u32 = 0x0002;

    pub const COMPRESSION_MASK: u32 = 0x00f0;
    pub const GZIP: u32 = 0x0010;
    pub const LZ4: u32 = 0x0020;

    pub const KIND_MASK: u32 = 0xff00;
    /// Append-only list encoding
    pub const KIND_LIST: u32 = 0x0200;
}

/// Decoded file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Format minor version the file was written with
    pub minor: u16,
    /// Earliest record timestamp
    pub first: Timestamp,
    /// Latest record timestamp
    pub last: Timestamp,
    /// Logical end of file; bytes past it are not part of the file
    pub file_size: u64,
    pub flags: u32,
    pub reserved: u32,
    /// Offset of the latest record header carrying a dictionary delta, 0 if none
    pub dict_ref: u64,
}

impl FileHeader {
    /// Header for a new, empty file
    pub fn new_empty(now: Timestamp, compression: Compression) -> Self {
        Self {
            minor: MINOR,
            first: now,
            last: now,
            file_size: HEADER_SPAN,
            flags: flags::SORTED | flags::DISTINCT | flags::KIND_LIST | compression.flag(),
            reserved: 0,
            dict_ref: 0,
        }
    }

    pub fn is_sorted(&self) -> bool {
        self.flags & flags::SORTED == flags::SORTED
    }

    pub fn is_distinct(&self) -> bool {
        self.flags & flags::DISTINCT == flags::DISTINCT
    }

    pub fn kind(&self) -> u32 {
        self.flags & flags::KIND_MASK
    }

    pub fn compression(&self) -> Result<Compression> {
        Compression::from_flags(self.flags)
    }

    /// Serialize mime header and file header, followed by CRC
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(MIME_HEADER_LEN + FILE_HEADER_LEN);
        buf.put_slice(&MAGIC);
        buf.put_u32_le((MAJOR as u32) << 16 | MINOR as u32);
        buf.put_i64_le(self.first);
        buf.put_i64_le(self.last);
        buf.put_u64_le(self.file_size);
        buf.put_u32_le(self.flags);
        buf.put_u32_le(self.reserved);
        buf.put_u64_le(self.dict_ref);
        frame(&buf)
    }

    /// Parse and validate a header read from the start of a file
    ///
    /// Checks CRC, magic and version; kind and size checks are left to the caller.
    pub fn decode(framed: &[u8]) -> Result<Self> {
        let payload = unframe(framed, (MIME_HEADER_LEN + FILE_HEADER_LEN) as u32)?;
        let mut reader = ByteReader::new(payload);

        if reader.bytes(MAGIC.len())? != MAGIC {
            return Err(HistError::InvalidFormat("invalid magic".into()));
        }
        let version = reader.u32()?;
        let (major, minor) = ((version >> 16) as u16, (version & 0xffff) as u16);
        if major != MAJOR || minor > MINOR {
            return Err(HistError::UnsupportedVersion { major, minor });
        }

        Ok(Self {
            minor,
            first: reader.i64()?,
            last: reader.i64()?,
            file_size: reader.u64()?,
            flags: reader.u32()?,
            reserved: reader.u32()?,
            dict_ref: reader.u64()?,
        })
    }

    /// Read and validate the header of `file`
    pub fn read(file: &SharedFile) -> Result<Self> {
        let actual_len = file.len()?;
        if actual_len < HEADER_SPAN {
            return Err(HistError::InvalidFormat(format!(
                "file too short for header: {} bytes",
                actual_len
            )));
        }

        let hdr = Self::decode(&file.read_at(0, HEADER_SPAN as usize)?)?;
        if hdr.kind() != flags::KIND_LIST {
            return Err(HistError::WrongKind(hdr.kind()));
        }
        if hdr.file_size > actual_len {
            return Err(HistError::Truncated {
                offset: hdr.file_size,
                end: actual_len,
            });
        }
        if hdr.file_size < HEADER_SPAN {
            return Err(HistError::decoding(format!(
                "file_size {} inside header",
                hdr.file_size
            )));
        }
        hdr.compression()?;
        Ok(hdr)
    }

    /// Overwrite the header at the start of `file`
    pub fn write(&self, file: &SharedFile) -> Result<()> {
        file.write_at(0, &self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let hdr = FileHeader::new_empty(1_000, Compression::Gzip);
        let encoded = hdr.encode();
        assert_eq!(encoded.len() as u64, HEADER_SPAN);
        assert_eq!(&encoded[..MAGIC.len()], &MAGIC);

        let decoded = FileHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, hdr);
        assert!(decoded.is_sorted());
        assert!(decoded.is_distinct());
        assert_eq!(decoded.compression().unwrap(), Compression::Gzip);
    }

    #[test]
    fn test_header_tamper() {
        let encoded = FileHeader::new_empty(5, Compression::None).encode();
        for i in 0..encoded.len() {
            let mut corrupted = encoded.to_vec();
            corrupted[i] ^= 0x80;
            assert!(FileHeader::decode(&corrupted).is_err(), "flip at {} undetected", i);
        }
    }

    #[test]
    fn test_version_rejected() {
        let mut payload = BytesMut::new();
        payload.put_slice(&MAGIC);
        payload.put_u32_le(((MAJOR as u32) + 1) << 16);
        payload.put_bytes(0, FILE_HEADER_LEN);
        let framed = frame(&payload);

        let err = FileHeader::decode(&framed).unwrap_err();
        assert!(matches!(err, HistError::UnsupportedVersion { .. }));
        assert!(err.is_usage());
    }
}
