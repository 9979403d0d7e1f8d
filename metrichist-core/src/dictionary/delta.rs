//! Persisted dictionary delta
//!
//! Payload layout, one block per table in the order strings, paths, tags:
//!
//! ```text
//! | offset:u32 | count:u32 | entry* |
//!
//! string entry := len:u32 bytes[len]
//! path entry   := n:u32 string_ref:u32 * n
//! tags entry   := n:u32 (key_ref:u32 value_ref:u32) * n
//! ```

use crate::segment::{put_string, ByteReader};
use crate::Result;
use bytes::{BufMut, BytesMut};

/// New entries of one table, starting at ref `offset`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaTable<T> {
    pub offset: u32,
    pub values: Vec<T>,
}

impl<T> Default for DeltaTable<T> {
    fn default() -> Self {
        Self {
            offset: 0,
            values: Vec::new(),
        }
    }
}

/// Entries introduced by one append
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DictionaryDelta {
    pub strings: DeltaTable<String>,
    /// Paths as string refs
    pub paths: DeltaTable<Vec<u32>>,
    /// Tag sets as (key, value) string refs
    pub tags: DeltaTable<Vec<(u32, u32)>>,
}

impl DictionaryDelta {
    /// True if the delta adds no entries
    pub fn is_empty(&self) -> bool {
        self.strings.values.is_empty() && self.paths.values.is_empty() && self.tags.values.is_empty()
    }

    /// Serialize to an uncompressed payload
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();

        buf.put_u32_le(self.strings.offset);
        buf.put_u32_le(self.strings.values.len() as u32);
        for s in &self.strings.values {
            put_string(&mut buf, s);
        }

        buf.put_u32_le(self.paths.offset);
        buf.put_u32_le(self.paths.values.len() as u32);
        for path in &self.paths.values {
            buf.put_u32_le(path.len() as u32);
            for &r in path {
                buf.put_u32_le(r);
            }
        }

        buf.put_u32_le(self.tags.offset);
        buf.put_u32_le(self.tags.values.len() as u32);
        for tags in &self.tags.values {
            buf.put_u32_le(tags.len() as u32);
            for &(k, v) in tags {
                buf.put_u32_le(k);
                buf.put_u32_le(v);
            }
        }

        buf
    }

    /// Parse an uncompressed payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(payload);

        let offset = reader.u32()?;
        let count = reader.count(4)?;
        let mut strings = Vec::with_capacity(count);
        for _ in 0..count {
            strings.push(reader.string()?);
        }
        let strings = DeltaTable {
            offset,
            values: strings,
        };

        let offset = reader.u32()?;
        let count = reader.count(4)?;
        let mut paths = Vec::with_capacity(count);
        for _ in 0..count {
            let n = reader.count(4)?;
            let mut path = Vec::with_capacity(n);
            for _ in 0..n {
                path.push(reader.u32()?);
            }
            paths.push(path);
        }
        let paths = DeltaTable {
            offset,
            values: paths,
        };

        let offset = reader.u32()?;
        let count = reader.count(4)?;
        let mut tag_sets = Vec::with_capacity(count);
        for _ in 0..count {
            let n = reader.count(8)?;
            let mut tags = Vec::with_capacity(n);
            for _ in 0..n {
                tags.push((reader.u32()?, reader.u32()?));
            }
            tag_sets.push(tags);
        }
        let tags = DeltaTable {
            offset,
            values: tag_sets,
        };

        reader.finish()?;
        Ok(Self {
            strings,
            paths,
            tags,
        })
    }
}
