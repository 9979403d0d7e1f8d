//! Write-time dictionary builder

use super::{DeltaTable, Dictionary, DictionaryDelta};
use crate::{HistError, Result, Tags};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

/// Interning map for one table
///
/// Entries with refs below `offset` are already persisted; `fresh` holds
/// the entries assigned since the last reset, in ref order.
#[derive(Debug, Clone)]
struct ExportMap<T> {
    table: HashMap<T, u32>,
    offset: u32,
    next: u32,
    fresh: Vec<T>,
}

impl<T: Hash + Eq + Clone> ExportMap<T> {
    fn new() -> Self {
        Self {
            table: HashMap::new(),
            offset: 0,
            next: 0,
            fresh: Vec::new(),
        }
    }

    fn seed(entries: impl Iterator<Item = (u32, T)>) -> Result<Self> {
        let mut map = Self::new();
        for (r, value) in entries {
            if r != map.next {
                return Err(HistError::decoding(format!(
                    "dictionary ref {} out of sequence, expected {}",
                    r, map.next
                )));
            }
            map.table.insert(value, r);
            map.next += 1;
        }
        map.offset = map.next;
        Ok(map)
    }

    fn get_or_create<Q>(&mut self, key: &Q) -> u32
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = T> + ?Sized,
    {
        if let Some(&r) = self.table.get(key) {
            return r;
        }
        let r = self.next;
        let value = Q::to_owned(key);
        self.table.insert(value.clone(), r);
        self.fresh.push(value);
        self.next += 1;
        r
    }

    fn reset(&mut self) {
        self.offset = self.next;
        self.fresh.clear();
    }

    fn delta(&self) -> DeltaTable<T> {
        DeltaTable {
            offset: self.offset,
            values: self.fresh.clone(),
        }
    }
}

/// Mutable dictionary used while encoding one append
///
/// Seeded from the persisted dictionary, it hands out existing refs for
/// known entries and new refs for everything else. [`delta`] yields the
/// entries added since the last [`reset`].
///
/// [`delta`]: DictionaryForWrite::delta
/// [`reset`]: DictionaryForWrite::reset
#[derive(Debug, Clone)]
pub struct DictionaryForWrite {
    strings: ExportMap<String>,
    paths: ExportMap<Vec<u32>>,
    tags: ExportMap<Vec<(u32, u32)>>,
}

impl Default for DictionaryForWrite {
    fn default() -> Self {
        Self::new()
    }
}

impl DictionaryForWrite {
    /// Builder for a file without dictionary entries
    pub fn new() -> Self {
        Self {
            strings: ExportMap::new(),
            paths: ExportMap::new(),
            tags: ExportMap::new(),
        }
    }

    /// Builder holding every entry of `dict`
    pub fn from_dictionary(dict: &Dictionary) -> Result<Self> {
        let strings = ExportMap::seed(dict.strings().iter().map(|(r, s)| (r, s.clone())))?;

        let string_ref = |s: &String| -> Result<u32> {
            strings
                .table
                .get(s)
                .copied()
                .ok_or_else(|| HistError::decoding(format!("string {:?} missing from dictionary", s)))
        };

        let paths = dict
            .paths()
            .iter()
            .map(|(r, path)| -> Result<(u32, Vec<u32>)> {
                Ok((r, path.iter().map(&string_ref).collect::<Result<Vec<_>>>()?))
            })
            .collect::<Result<Vec<_>>>()?;
        let tags = dict
            .tag_sets()
            .iter()
            .map(|(r, tags)| -> Result<(u32, Vec<(u32, u32)>)> {
                let pairs = tags
                    .iter()
                    .map(|(k, v)| -> Result<(u32, u32)> { Ok((string_ref(k)?, string_ref(v)?)) })
                    .collect::<Result<Vec<_>>>()?;
                Ok((r, pairs))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            paths: ExportMap::seed(paths.into_iter())?,
            tags: ExportMap::seed(tags.into_iter())?,
            strings,
        })
    }

    pub fn string_ref(&mut self, s: &str) -> u32 {
        self.strings.get_or_create(s)
    }

    /// Ref of a path, interning its elements as strings
    pub fn path_ref(&mut self, elements: &[String]) -> u32 {
        let refs: Vec<u32> = elements.iter().map(|e| self.string_ref(e)).collect();
        self.paths.get_or_create(refs.as_slice())
    }

    /// Ref of a tag set, interning keys and values as strings
    pub fn tags_ref(&mut self, tags: &Tags) -> u32 {
        let pairs: Vec<(u32, u32)> = tags
            .iter()
            .map(|(k, v)| (self.string_ref(k), self.string_ref(v)))
            .collect();
        self.tags.get_or_create(pairs.as_slice())
    }

    /// True if nothing was added since the last reset
    pub fn is_empty(&self) -> bool {
        self.strings.fresh.is_empty() && self.paths.fresh.is_empty() && self.tags.fresh.is_empty()
    }

    /// Mark every entry as persisted
    pub fn reset(&mut self) {
        self.strings.reset();
        self.paths.reset();
        self.tags.reset();
    }

    /// Entries added since the last reset
    pub fn delta(&self) -> DictionaryDelta {
        DictionaryDelta {
            strings: self.strings.delta(),
            paths: self.paths.delta(),
            tags: self.tags.delta(),
        }
    }
}
