//! File-wide payload compression

use crate::file::flags;
use crate::{HistError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

/// Compression applied to every segment payload of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Payloads stored as-is
    None,
    /// gzip (deflate)
    #[default]
    Gzip,
    /// LZ4 block format with prepended size
    Lz4,
}

impl Compression {
    /// Header flag bits for this compression
    pub fn flag(self) -> u32 {
        match self {
            Compression::None => 0,
            Compression::Gzip => flags::GZIP,
            Compression::Lz4 => flags::LZ4,
        }
    }

    /// Decode the compression from header flags
    pub fn from_flags(header_flags: u32) -> Result<Self> {
        match header_flags & flags::COMPRESSION_MASK {
            0 => Ok(Compression::None),
            flags::GZIP => Ok(Compression::Gzip),
            flags::LZ4 => Ok(Compression::Lz4),
            other => Err(HistError::InvalidFormat(format!(
                "unrecognized compression {:#x}",
                other
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Lz4 => "lz4",
        }
    }

    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder
                    .write_all(data)
                    .map_err(|e| HistError::Compression(e.to_string()))?;
                encoder
                    .finish()
                    .map_err(|e| HistError::Compression(e.to_string()))
            }
            Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        }
    }

    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut decoder = GzDecoder::new(data);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| HistError::Compression(e.to_string()))?;
                Ok(out)
            }
            Compression::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| HistError::Compression(e.to_string())),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compression {
    type Err = HistError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "lz4" => Ok(Compression::Lz4),
            _ => Err(HistError::InvalidFormat(format!(
                "invalid compression {}, expecting one of none, gzip, lz4",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all() {
        let data: Vec<u8> = (0..2000u32).flat_map(|i| (i % 17).to_le_bytes()).collect();
        for c in [Compression::None, Compression::Gzip, Compression::Lz4] {
            let packed = c.compress(&data).unwrap();
            assert_eq!(c.decompress(&packed).unwrap(), data, "{}", c);
        }
    }

    #[test]
    fn test_flags() {
        for c in [Compression::None, Compression::Gzip, Compression::Lz4] {
            let header_flags = c.flag() | flags::SORTED | flags::KIND_LIST;
            assert_eq!(Compression::from_flags(header_flags).unwrap(), c);
        }
        assert!(Compression::from_flags(0xf0).is_err());
    }

    #[test]
    fn test_corrupt_gzip() {
        let packed = Compression::Gzip.compress(b"some metrics").unwrap();
        assert!(Compression::Gzip.decompress(&packed[..packed.len() / 2]).is_err());
    }

    #[test]
    fn test_parse() {
        assert_eq!("GZIP".parse::<Compression>().unwrap(), Compression::Gzip);
        assert!("snappy".parse::<Compression>().is_err());
    }
}
