//! Interning dictionary
//!
//! Strings, paths and tag sets are written once and referenced by integer
//! refs afterwards. Refs are assigned in increasing order and an entry may
//! only reference entries with smaller refs, so a dictionary is rebuilt by
//! applying its persisted deltas in file order.
//!
//! - [`Dictionary`] is the resolved, immutable view readers use
//! - [`DictionaryDelta`] is the persisted set of entries one append introduced
//! - [`DictionaryForWrite`] interns entries during an append and yields the delta

mod builder;
mod chain;
mod delta;

pub use builder::DictionaryForWrite;
pub(crate) use chain::DictionaryChain;
pub use delta::{DeltaTable, DictionaryDelta};

use crate::{HistError, Result, Tags};
use std::sync::Arc;

/// Contiguous run of entries starting at `offset`
#[derive(Debug)]
struct Chunk<T> {
    offset: u32,
    values: Vec<T>,
}

/// Append-only table of resolved entries
///
/// Chunks are shared between all dictionaries derived from each other, so
/// extending a table copies pointers, never entries.
#[derive(Debug)]
pub struct RefTable<T> {
    chunks: Vec<Arc<Chunk<T>>>,
    next: u32,
}

impl<T> Clone for RefTable<T> {
    fn clone(&self) -> Self {
        Self {
            chunks: self.chunks.clone(),
            next: self.next,
        }
    }
}

impl<T> Default for RefTable<T> {
    fn default() -> Self {
        Self {
            chunks: Vec::new(),
            next: 0,
        }
    }
}

impl<T> RefTable<T> {
    /// Ref the next entry will receive
    pub fn next_ref(&self) -> u32 {
        self.next
    }

    pub fn len(&self) -> usize {
        self.next as usize
    }

    pub fn is_empty(&self) -> bool {
        self.next == 0
    }

    /// Look up an entry
    pub fn get(&self, r: u32) -> Option<&T> {
        if r >= self.next {
            return None;
        }
        let idx = match self.chunks.binary_search_by(|c| c.offset.cmp(&r)) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        let chunk = &self.chunks[idx];
        chunk.values.get((r - chunk.offset) as usize)
    }

    /// Iterate over all entries in ref order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.chunks.iter().flat_map(|c| {
            c.values
                .iter()
                .enumerate()
                .map(move |(i, v)| (c.offset + i as u32, v))
        })
    }

    fn extend(&self, offset: u32, values: Vec<T>, table: &str) -> Result<Self> {
        if offset != self.next {
            return Err(HistError::decoding(format!(
                "{} delta starts at ref {}, dictionary ends at {}",
                table, offset, self.next
            )));
        }
        let mut out = self.clone();
        if !values.is_empty() {
            out.next += values.len() as u32;
            out.chunks.push(Arc::new(Chunk { offset, values }));
        }
        Ok(out)
    }
}

/// Resolved dictionary as of one point in the file
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    strings: RefTable<String>,
    paths: RefTable<Vec<String>>,
    tags: RefTable<Tags>,
}

impl Dictionary {
    /// Create an empty dictionary
    pub fn new() -> Self {
        Self::default()
    }

    /// Dictionary with `delta` applied on top of this one
    ///
    /// Strings are applied first, so paths and tag sets in the same delta
    /// may reference strings it introduces.
    pub fn with_delta(&self, delta: &DictionaryDelta) -> Result<Self> {
        let strings = self.strings.extend(
            delta.strings.offset,
            delta.strings.values.clone(),
            "string",
        )?;

        let paths = delta
            .paths
            .values
            .iter()
            .map(|refs| {
                refs.iter()
                    .map(|&r| resolve(&strings, r, "string").cloned())
                    .collect::<Result<Vec<String>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        let paths = self.paths.extend(delta.paths.offset, paths, "path")?;

        let tags = delta
            .tags
            .values
            .iter()
            .map(|pairs| -> Result<Tags> {
                let mut tags = Tags::new();
                for &(k, v) in pairs {
                    let key = resolve(&strings, k, "string")?;
                    let value = resolve(&strings, v, "string")?;
                    tags = tags.with_tag(key.clone(), value.clone());
                }
                Ok(tags)
            })
            .collect::<Result<Vec<_>>>()?;
        let tags = self.tags.extend(delta.tags.offset, tags, "tags")?;

        Ok(Self {
            strings,
            paths,
            tags,
        })
    }

    pub fn string(&self, r: u32) -> Result<&String> {
        resolve(&self.strings, r, "string")
    }

    pub fn path(&self, r: u32) -> Result<&[String]> {
        resolve(&self.paths, r, "path").map(Vec::as_slice)
    }

    pub fn tags(&self, r: u32) -> Result<&Tags> {
        resolve(&self.tags, r, "tags")
    }

    pub fn strings(&self) -> &RefTable<String> {
        &self.strings
    }

    pub fn paths(&self) -> &RefTable<Vec<String>> {
        &self.paths
    }

    pub fn tag_sets(&self) -> &RefTable<Tags> {
        &self.tags
    }

    /// True if no table holds entries
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty() && self.paths.is_empty() && self.tags.is_empty()
    }
}

fn resolve<'a, T>(table: &'a RefTable<T>, r: u32, kind: &str) -> Result<&'a T> {
    table
        .get(r)
        .ok_or_else(|| HistError::decoding(format!("unresolved {} ref {}", kind, r)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(string_offset: u32, strings: &[&str], path_offset: u32, paths: Vec<Vec<u32>>) -> DictionaryDelta {
        DictionaryDelta {
            strings: DeltaTable {
                offset: string_offset,
                values: strings.iter().map(|s| s.to_string()).collect(),
            },
            paths: DeltaTable {
                offset: path_offset,
                values: paths,
            },
            tags: DeltaTable::default(),
        }
    }

    #[test]
    fn test_chained_deltas() {
        let d1 = Dictionary::new()
            .with_delta(&delta(0, &["jvm", "gc"], 0, vec![vec![0, 1]]))
            .unwrap();
        let d2 = d1
            .with_delta(&delta(2, &["count"], 1, vec![vec![2], vec![0]]))
            .unwrap();

        assert_eq!(d2.string(2).unwrap(), "count");
        assert_eq!(d2.path(0).unwrap(), ["jvm", "gc"]);
        assert_eq!(d2.path(1).unwrap(), ["count"]);
        assert_eq!(d2.paths().len(), 3);

        // Older view is unaffected
        assert!(d1.string(2).is_err());
        assert_eq!(d1.paths().len(), 1);
    }

    #[test]
    fn test_gap_rejected() {
        let d1 = Dictionary::new()
            .with_delta(&delta(0, &["a"], 0, vec![]))
            .unwrap();
        let err = d1.with_delta(&delta(5, &["b"], 0, vec![])).unwrap_err();
        assert!(err.is_decoding());
    }

    #[test]
    fn test_forward_ref_rejected() {
        let err = Dictionary::new()
            .with_delta(&delta(0, &["a"], 0, vec![vec![0, 1]]))
            .unwrap_err();
        assert!(err.is_decoding());
    }

    #[test]
    fn test_lookup_across_chunks() {
        let mut dict = Dictionary::new();
        let mut next = 0;
        for n in 1..6u32 {
            let values: Vec<String> = (0..n).map(|i| format!("s{}", next + i)).collect();
            let refs: Vec<&str> = values.iter().map(String::as_str).collect();
            dict = dict.with_delta(&delta(next, &refs, 0, vec![])).unwrap();
            next += n;
        }

        for r in 0..next {
            assert_eq!(dict.string(r).unwrap(), &format!("s{}", r));
        }
        assert!(dict.string(next).is_err());
        assert_eq!(dict.strings().iter().count(), next as usize);
    }
}
