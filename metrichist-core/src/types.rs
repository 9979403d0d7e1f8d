//! Core types for Metrichist
//!
//! These are the values exchanged with the rest of the monitoring system:
//! a collection is one timestamp plus a set of metric groups, each group
//! holding named, typed metric values.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Timestamp in milliseconds since Unix epoch (UTC)
pub type Timestamp = i64;

/// Shared handle to any collection implementation
pub type CollectionRef = Arc<dyn TimeSeriesCollection>;

/// Path of a metric group (e.g. `["com", "example", "jvm"]`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupPath(pub Vec<String>);

impl GroupPath {
    /// Create a group path from its elements
    pub fn new<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(elements.into_iter().map(Into::into).collect())
    }

    /// Path elements
    pub fn elements(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for GroupPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Name of a metric within a group
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MetricName(pub Vec<String>);

impl MetricName {
    /// Create a metric name from its elements
    pub fn new<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(elements.into_iter().map(Into::into).collect())
    }

    /// Name elements
    pub fn elements(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Sorted tag set
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tags(pub BTreeMap<String, String>);

impl Tags {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over tags in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// Group identity: path plus tags
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupName {
    pub path: GroupPath,
    pub tags: Tags,
}

impl GroupName {
    /// Create an untagged group name
    pub fn new(path: GroupPath) -> Self {
        Self {
            path,
            tags: Tags::new(),
        }
    }

    /// Add a tag to the group name
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.0.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        if !self.tags.is_empty() {
            let tags: Vec<String> = self.tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            write!(f, "{{{}}}", tags.join(","))?;
        }
        Ok(())
    }
}

/// One histogram bucket: the range `[floor, ceil)` and its event count
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub floor: f64,
    pub ceil: f64,
    pub events: f64,
}

impl Bucket {
    fn cmp_range(&self, other: &Bucket) -> Ordering {
        self.floor
            .total_cmp(&other.floor)
            .then_with(|| self.ceil.total_cmp(&other.ceil))
    }
}

/// Histogram, kept sorted by bucket range with one bucket per range
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    buckets: Vec<Bucket>,
}

impl Histogram {
    /// Create an empty histogram
    pub fn new() -> Self {
        Self { buckets: Vec::new() }
    }

    /// Build a histogram, merging buckets that share a range
    pub fn from_buckets(buckets: impl IntoIterator<Item = Bucket>) -> Self {
        let mut hist = Self::new();
        for bucket in buckets {
            hist.add(bucket);
        }
        hist
    }

    /// Add events for a range; counts for an existing range are summed
    pub fn add(&mut self, bucket: Bucket) {
        match self.buckets.binary_search_by(|b| b.cmp_range(&bucket)) {
            Ok(idx) => self.buckets[idx].events += bucket.events,
            Err(idx) => self.buckets.insert(idx, bucket),
        }
    }

    /// Add `events` to the range `[floor, ceil)`
    pub fn with_range(mut self, floor: f64, ceil: f64, events: f64) -> Self {
        self.add(Bucket { floor, ceil, events });
        self
    }

    /// Buckets in range order
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Total number of events
    pub fn event_count(&self) -> f64 {
        self.buckets.iter().map(|b| b.events).sum()
    }
}

/// Possible metric value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    /// Metric present without a value
    Empty,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// String
    String(String),
    /// Histogram
    Histogram(Histogram),
}

impl MetricValue {
    /// Get as f64 if numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Int(v) => Some(*v as f64),
            MetricValue::Float(v) => Some(*v),
            MetricValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Get as histogram if this is one
    pub fn as_histogram(&self) -> Option<&Histogram> {
        match self {
            MetricValue::Histogram(h) => Some(h),
            _ => None,
        }
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::String(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::String(v.to_string())
    }
}

impl From<Histogram> for MetricValue {
    fn from(v: Histogram) -> Self {
        MetricValue::Histogram(v)
    }
}

/// All metrics of one group at one timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesValue {
    pub group: GroupName,
    #[serde(with = "metric_entries")]
    pub metrics: BTreeMap<MetricName, MetricValue>,
}

impl TimeSeriesValue {
    /// Create a value without metrics
    pub fn new(group: GroupName) -> Self {
        Self {
            group,
            metrics: BTreeMap::new(),
        }
    }

    /// Add a metric
    pub fn with_metric(mut self, name: MetricName, value: impl Into<MetricValue>) -> Self {
        self.metrics.insert(name, value.into());
        self
    }
}

/// Metric maps are serialized as a list, since names are not strings.
mod metric_entries {
    use super::{MetricName, MetricValue};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    struct Entry {
        name: MetricName,
        value: MetricValue,
    }

    pub fn serialize<S: Serializer>(
        metrics: &BTreeMap<MetricName, MetricValue>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let entries: Vec<Entry> = metrics
            .iter()
            .map(|(name, value)| Entry {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<MetricName, MetricValue>, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries.into_iter().map(|e| (e.name, e.value)).collect())
    }
}

/// A timestamped set of metric groups
///
/// Lazily decoded implementations report decoding failures through the
/// returned `Result`; the timestamp is always available without I/O.
pub trait TimeSeriesCollection: Send + Sync {
    /// Collection timestamp
    fn timestamp(&self) -> Timestamp;

    /// True if the collection holds no groups
    fn is_empty(&self) -> Result<bool>;

    /// Distinct group paths
    fn group_paths(&self) -> Result<BTreeSet<GroupPath>>;

    /// All group names
    fn groups(&self) -> Result<BTreeSet<GroupName>>;

    /// All values whose group has the given path
    fn get_group(&self, path: &GroupPath) -> Result<Vec<TimeSeriesValue>>;

    /// Value of a single group
    fn get(&self, name: &GroupName) -> Result<Option<TimeSeriesValue>>;

    /// All values, in group order
    fn values(&self) -> Result<Vec<TimeSeriesValue>>;

    /// Materialize into an owned collection
    fn to_simple(&self) -> Result<SimpleCollection> {
        let mut tsc = SimpleCollection::new(self.timestamp());
        for value in self.values()? {
            tsc.add_value(value);
        }
        Ok(tsc)
    }
}

impl<T: TimeSeriesCollection + ?Sized> TimeSeriesCollection for Arc<T> {
    fn timestamp(&self) -> Timestamp {
        (**self).timestamp()
    }

    fn is_empty(&self) -> Result<bool> {
        (**self).is_empty()
    }

    fn group_paths(&self) -> Result<BTreeSet<GroupPath>> {
        (**self).group_paths()
    }

    fn groups(&self) -> Result<BTreeSet<GroupName>> {
        (**self).groups()
    }

    fn get_group(&self, path: &GroupPath) -> Result<Vec<TimeSeriesValue>> {
        (**self).get_group(path)
    }

    fn get(&self, name: &GroupName) -> Result<Option<TimeSeriesValue>> {
        (**self).get(name)
    }

    fn values(&self) -> Result<Vec<TimeSeriesValue>> {
        (**self).values()
    }

    fn to_simple(&self) -> Result<SimpleCollection> {
        (**self).to_simple()
    }
}

/// In-memory collection, the form callers build before appending
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CollectionRepr", into = "CollectionRepr")]
pub struct SimpleCollection {
    timestamp: Timestamp,
    groups: BTreeMap<GroupName, BTreeMap<MetricName, MetricValue>>,
}

#[derive(Serialize, Deserialize)]
struct CollectionRepr {
    timestamp: Timestamp,
    values: Vec<TimeSeriesValue>,
}

impl From<CollectionRepr> for SimpleCollection {
    fn from(repr: CollectionRepr) -> Self {
        let mut tsc = SimpleCollection::new(repr.timestamp);
        for value in repr.values {
            tsc.add_value(value);
        }
        tsc
    }
}

impl From<SimpleCollection> for CollectionRepr {
    fn from(tsc: SimpleCollection) -> Self {
        CollectionRepr {
            timestamp: tsc.timestamp,
            values: tsc
                .groups
                .into_iter()
                .map(|(group, metrics)| TimeSeriesValue { group, metrics })
                .collect(),
        }
    }
}

impl SimpleCollection {
    /// Create an empty collection
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            groups: BTreeMap::new(),
        }
    }

    /// Add a group value; metrics of an existing group are merged
    pub fn add_value(&mut self, value: TimeSeriesValue) {
        self.groups.entry(value.group).or_default().extend(value.metrics);
    }

    /// Builder form of [`SimpleCollection::add_value`]
    pub fn with_value(mut self, value: TimeSeriesValue) -> Self {
        self.add_value(value);
        self
    }

    /// Set a single metric
    pub fn insert_metric(&mut self, group: GroupName, name: MetricName, value: impl Into<MetricValue>) {
        self.groups.entry(group).or_default().insert(name, value.into());
    }

    fn value_of(&self, group: &GroupName) -> Option<TimeSeriesValue> {
        self.groups.get(group).map(|metrics| TimeSeriesValue {
            group: group.clone(),
            metrics: metrics.clone(),
        })
    }
}

impl TimeSeriesCollection for SimpleCollection {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.groups.is_empty())
    }

    fn group_paths(&self) -> Result<BTreeSet<GroupPath>> {
        Ok(self.groups.keys().map(|g| g.path.clone()).collect())
    }

    fn groups(&self) -> Result<BTreeSet<GroupName>> {
        Ok(self.groups.keys().cloned().collect())
    }

    fn get_group(&self, path: &GroupPath) -> Result<Vec<TimeSeriesValue>> {
        Ok(self
            .groups
            .keys()
            .filter(|g| &g.path == path)
            .filter_map(|g| self.value_of(g))
            .collect())
    }

    fn get(&self, name: &GroupName) -> Result<Option<TimeSeriesValue>> {
        Ok(self.value_of(name))
    }

    fn values(&self) -> Result<Vec<TimeSeriesValue>> {
        Ok(self
            .groups
            .iter()
            .map(|(group, metrics)| TimeSeriesValue {
                group: group.clone(),
                metrics: metrics.clone(),
            })
            .collect())
    }

    fn to_simple(&self) -> Result<SimpleCollection> {
        Ok(self.clone())
    }
}
