//! Normalization of collection sequences

use super::ObjectSequence;
use crate::{
    CollectionRef, GroupName, GroupPath, Result, TimeSeriesCollection, TimeSeriesValue, Timestamp,
};
use std::collections::BTreeSet;
use std::sync::Arc;

impl ObjectSequence<CollectionRef> {
    /// Sort by timestamp and merge collections sharing a timestamp
    ///
    /// Flags declared by the sequence are trusted: a forward sequence
    /// declared sorted and distinct is returned unchanged.
    pub fn normalize(&self) -> Self {
        self.normalize_by(
            |c| c.timestamp(),
            |run| Arc::new(MergedCollection::new(run)) as CollectionRef,
        )
    }
}

/// Collections with the same timestamp viewed as one
///
/// A group present in several parts is taken from the first part holding it.
pub struct MergedCollection {
    timestamp: Timestamp,
    parts: Vec<CollectionRef>,
}

impl MergedCollection {
    /// Merge `parts`; the timestamp is taken from the first part
    pub fn new(parts: Vec<CollectionRef>) -> Self {
        let timestamp = parts.first().map(|c| c.timestamp()).unwrap_or_default();
        Self { timestamp, parts }
    }

    pub fn parts(&self) -> &[CollectionRef] {
        &self.parts
    }
}

impl TimeSeriesCollection for MergedCollection {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn is_empty(&self) -> Result<bool> {
        for part in &self.parts {
            if !part.is_empty()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn group_paths(&self) -> Result<BTreeSet<GroupPath>> {
        let mut paths = BTreeSet::new();
        for part in &self.parts {
            paths.extend(part.group_paths()?);
        }
        Ok(paths)
    }

    fn groups(&self) -> Result<BTreeSet<GroupName>> {
        let mut groups = BTreeSet::new();
        for part in &self.parts {
            groups.extend(part.groups()?);
        }
        Ok(groups)
    }

    fn get_group(&self, path: &GroupPath) -> Result<Vec<TimeSeriesValue>> {
        let mut seen = BTreeSet::new();
        let mut values = Vec::new();
        for part in &self.parts {
            for value in part.get_group(path)? {
                if seen.insert(value.group.clone()) {
                    values.push(value);
                }
            }
        }
        values.sort_by(|a, b| a.group.cmp(&b.group));
        Ok(values)
    }

    fn get(&self, name: &GroupName) -> Result<Option<TimeSeriesValue>> {
        for part in &self.parts {
            if let Some(value) = part.get(name)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn values(&self) -> Result<Vec<TimeSeriesValue>> {
        let mut seen = BTreeSet::new();
        let mut values = Vec::new();
        for part in &self.parts {
            for value in part.values()? {
                if seen.insert(value.group.clone()) {
                    values.push(value);
                }
            }
        }
        values.sort_by(|a, b| a.group.cmp(&b.group));
        Ok(values)
    }
}
