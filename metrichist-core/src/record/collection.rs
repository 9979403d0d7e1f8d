//! Lazily decoded collection backed by one record

use super::codec::{decode_groups, decode_metrics, resolve_metrics, RawGroup};
use super::RecordHeader;
use crate::dictionary::Dictionary;
use crate::segment::{file_segment, Compression, FilePos, Segment, SharedFile};
use crate::{
    GroupName, GroupPath, HistError, MetricName, MetricValue, Result, TimeSeriesCollection,
    TimeSeriesValue, Timestamp,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

type Metrics = BTreeMap<MetricName, MetricValue>;

/// Resolved record array: every group with its metric segment
pub struct GroupIndex {
    groups: BTreeMap<GroupName, Segment<Arc<Metrics>>>,
}

impl GroupIndex {
    fn build(
        file: &SharedFile,
        compression: Compression,
        metrics_base: u64,
        raw: Vec<RawGroup>,
        dict: Arc<Dictionary>,
    ) -> Result<Self> {
        let mut groups = BTreeMap::new();
        for group in raw {
            let name = GroupName {
                path: GroupPath(dict.path(group.path_ref)?.to_vec()),
                tags: dict.tags(group.tags_ref)?.clone(),
            };
            if groups.contains_key(&name) {
                return Err(HistError::decoding(format!("duplicate group {}", name)));
            }

            let pos = FilePos::new(metrics_base + group.metrics_offset as u64, group.metrics_len);
            let dict = dict.clone();
            let metrics = file_segment(file.clone(), pos, compression, decode_metrics)
                .try_map(move |raw| resolve_metrics(raw, &dict))
                .map(Arc::new)
                .share();
            groups.insert(name, metrics);
        }
        Ok(Self { groups })
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

fn value(name: &GroupName, metrics: &Segment<Arc<Metrics>>) -> Result<TimeSeriesValue> {
    Ok(TimeSeriesValue {
        group: name.clone(),
        metrics: metrics.decode()?.as_ref().clone(),
    })
}

/// Collection view over one record of a list file
///
/// The timestamp comes from the record header; the record array is read
/// on first use and kept, metric segments are read per lookup and shared
/// while a caller holds the result.
pub struct ListCollection {
    header: Arc<RecordHeader>,
    index: Segment<Arc<GroupIndex>>,
}

impl ListCollection {
    pub(crate) fn new(
        file: SharedFile,
        compression: Compression,
        header: Arc<RecordHeader>,
        dictionary: Segment<Arc<Dictionary>>,
    ) -> Self {
        let region_len = header.metrics_len;
        let metrics_base = header.metrics_base();
        let array = file_segment(file.clone(), header.array_pos(), compression, move |payload| {
            decode_groups(payload, region_len)
        });
        let index = array
            .combine(dictionary, move |raw, dict| {
                GroupIndex::build(&file, compression, metrics_base, raw, dict).map(Arc::new)
            })
            .cache();

        Self { header, index }
    }

    /// Header of the backing record
    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    /// Decoded group index
    pub fn index(&self) -> Result<Arc<GroupIndex>> {
        self.index.decode()
    }
}

impl TimeSeriesCollection for ListCollection {
    fn timestamp(&self) -> Timestamp {
        self.header.timestamp
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.index()?.is_empty())
    }

    fn group_paths(&self) -> Result<BTreeSet<GroupPath>> {
        Ok(self.index()?.groups.keys().map(|g| g.path.clone()).collect())
    }

    fn groups(&self) -> Result<BTreeSet<GroupName>> {
        Ok(self.index()?.groups.keys().cloned().collect())
    }

    fn get_group(&self, path: &GroupPath) -> Result<Vec<TimeSeriesValue>> {
        let index = self.index()?;
        index
            .groups
            .iter()
            .filter(|(name, _)| &name.path == path)
            .map(|(name, metrics)| value(name, metrics))
            .collect()
    }

    fn get(&self, name: &GroupName) -> Result<Option<TimeSeriesValue>> {
        let index = self.index()?;
        index
            .groups
            .get(name)
            .map(|metrics| value(name, metrics))
            .transpose()
    }

    fn values(&self) -> Result<Vec<TimeSeriesValue>> {
        let index = self.index()?;
        index
            .groups
            .iter()
            .map(|(name, metrics)| value(name, metrics))
            .collect()
    }
}

impl std::fmt::Debug for ListCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListCollection")
            .field("offset", &self.header.offset)
            .field("timestamp", &self.header.timestamp)
            .finish()
    }
}
