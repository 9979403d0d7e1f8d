//! Record payload encoding
//!
//! Record array payload:
//!
//! ```text
//! | count:u32 | (path_ref:u32 tags_ref:u32 metrics_offset:u32 metrics_len:u32) * count |
//! ```
//!
//! `metrics_offset` is relative to the record's metric region, `metrics_len`
//! is the payload length of the group's metric segment.
//!
//! Metric segment payload:
//!
//! ```text
//! | count:u32 | (name_ref:u32 kind:u8 value) * count |
//! ```
//!
//! A histogram is stored as one entry per bucket, each carrying its range.

use super::RecordHeader;
use crate::dictionary::{Dictionary, DictionaryForWrite};
use crate::segment::{frame, segment_span, ByteReader, Compression};
use crate::{
    Bucket, HistError, Histogram, MetricName, MetricValue, Result, TimeSeriesCollection, Timestamp,
};
use bytes::{BufMut, BytesMut};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

const KIND_EMPTY: u8 = 0;
const KIND_BOOL: u8 = 1;
const KIND_INT: u8 = 2;
const KIND_FLOAT: u8 = 3;
const KIND_STRING: u8 = 4;
const KIND_HISTOGRAM_BUCKET: u8 = 5;
const KIND_HISTOGRAM_EMPTY: u8 = 6;

/// Size of one group entry in the record array
const GROUP_ENTRY_LEN: usize = 16;

/// Smallest metric entry: name ref plus kind
const MIN_METRIC_ENTRY_LEN: usize = 5;

/// Group entry as stored in the record array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawGroup {
    pub path_ref: u32,
    pub tags_ref: u32,
    pub metrics_offset: u32,
    pub metrics_len: u32,
}

/// Metric value with dictionary refs still unresolved
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RawValue {
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(u32),
    HistogramBucket(Bucket),
    HistogramEmpty,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawMetric {
    pub name_ref: u32,
    pub value: RawValue,
}

pub(crate) fn encode_groups(groups: &[RawGroup]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4 + groups.len() * GROUP_ENTRY_LEN);
    buf.put_u32_le(groups.len() as u32);
    for g in groups {
        buf.put_u32_le(g.path_ref);
        buf.put_u32_le(g.tags_ref);
        buf.put_u32_le(g.metrics_offset);
        buf.put_u32_le(g.metrics_len);
    }
    buf
}

/// Parse a record array, checking every metric segment lies inside a
/// metric region of `region_len` bytes
pub(crate) fn decode_groups(payload: &[u8], region_len: u32) -> Result<Vec<RawGroup>> {
    let mut reader = ByteReader::new(payload);
    let count = reader.count(GROUP_ENTRY_LEN)?;
    let mut groups = Vec::with_capacity(count);
    for _ in 0..count {
        let group = RawGroup {
            path_ref: reader.u32()?,
            tags_ref: reader.u32()?,
            metrics_offset: reader.u32()?,
            metrics_len: reader.u32()?,
        };
        let end = group.metrics_offset as u64 + segment_span(group.metrics_len);
        if group.metrics_len == 0 || end > region_len as u64 {
            return Err(HistError::decoding(format!(
                "metric segment {}+{} outside metric region of {} bytes",
                group.metrics_offset, group.metrics_len, region_len
            )));
        }
        groups.push(group);
    }
    reader.finish()?;
    Ok(groups)
}

pub(crate) fn encode_metrics(
    metrics: &BTreeMap<MetricName, MetricValue>,
    dict: &mut DictionaryForWrite,
) -> BytesMut {
    let mut entries = BytesMut::new();
    let mut count = 0u32;

    for (name, value) in metrics {
        let name_ref = dict.path_ref(name.elements());
        match value {
            MetricValue::Empty => put_entry(&mut entries, &mut count, name_ref, KIND_EMPTY),
            MetricValue::Bool(v) => {
                put_entry(&mut entries, &mut count, name_ref, KIND_BOOL);
                entries.put_u8(*v as u8);
            }
            MetricValue::Int(v) => {
                put_entry(&mut entries, &mut count, name_ref, KIND_INT);
                entries.put_i64_le(*v);
            }
            MetricValue::Float(v) => {
                put_entry(&mut entries, &mut count, name_ref, KIND_FLOAT);
                entries.put_f64_le(*v);
            }
            MetricValue::String(s) => {
                let str_ref = dict.string_ref(s);
                put_entry(&mut entries, &mut count, name_ref, KIND_STRING);
                entries.put_u32_le(str_ref);
            }
            MetricValue::Histogram(h) if h.is_empty() => {
                put_entry(&mut entries, &mut count, name_ref, KIND_HISTOGRAM_EMPTY)
            }
            MetricValue::Histogram(h) => {
                for bucket in h.buckets() {
                    put_entry(&mut entries, &mut count, name_ref, KIND_HISTOGRAM_BUCKET);
                    entries.put_f64_le(bucket.floor);
                    entries.put_f64_le(bucket.ceil);
                    entries.put_f64_le(bucket.events);
                }
            }
        }
    }

    let mut buf = BytesMut::with_capacity(4 + entries.len());
    buf.put_u32_le(count);
    buf.put_slice(&entries);
    buf
}

fn put_entry(buf: &mut BytesMut, count: &mut u32, name_ref: u32, kind: u8) {
    *count += 1;
    buf.put_u32_le(name_ref);
    buf.put_u8(kind);
}

pub(crate) fn decode_metrics(payload: &[u8]) -> Result<Vec<RawMetric>> {
    let mut reader = ByteReader::new(payload);
    let count = reader.count(MIN_METRIC_ENTRY_LEN)?;
    let mut metrics = Vec::with_capacity(count);
    for _ in 0..count {
        let name_ref = reader.u32()?;
        let value = match reader.u8()? {
            KIND_EMPTY => RawValue::Empty,
            KIND_BOOL => RawValue::Bool(reader.u8()? != 0),
            KIND_INT => RawValue::Int(reader.i64()?),
            KIND_FLOAT => RawValue::Float(reader.f64()?),
            KIND_STRING => RawValue::String(reader.u32()?),
            KIND_HISTOGRAM_BUCKET => RawValue::HistogramBucket(Bucket {
                floor: reader.f64()?,
                ceil: reader.f64()?,
                events: reader.f64()?,
            }),
            KIND_HISTOGRAM_EMPTY => RawValue::HistogramEmpty,
            other => {
                return Err(HistError::decoding(format!("unknown metric kind {}", other)));
            }
        };
        metrics.push(RawMetric { name_ref, value });
    }
    reader.finish()?;
    Ok(metrics)
}

/// Resolve refs and reassemble histograms
///
/// Bucket entries sharing a metric name merge into one histogram; buckets
/// with the same range add their event counts.
pub(crate) fn resolve_metrics(
    raw: Vec<RawMetric>,
    dict: &Dictionary,
) -> Result<BTreeMap<MetricName, MetricValue>> {
    let mut metrics = BTreeMap::new();

    for metric in raw {
        let name = MetricName(dict.path(metric.name_ref)?.to_vec());
        let value = match metric.value {
            RawValue::HistogramBucket(bucket) => {
                histogram_entry(&mut metrics, name)?.add(bucket);
                continue;
            }
            RawValue::HistogramEmpty => {
                histogram_entry(&mut metrics, name)?;
                continue;
            }
            RawValue::Empty => MetricValue::Empty,
            RawValue::Bool(v) => MetricValue::Bool(v),
            RawValue::Int(v) => MetricValue::Int(v),
            RawValue::Float(v) => MetricValue::Float(v),
            RawValue::String(r) => MetricValue::String(dict.string(r)?.clone()),
        };

        match metrics.entry(name) {
            Entry::Vacant(e) => {
                e.insert(value);
            }
            Entry::Occupied(e) => {
                return Err(HistError::decoding(format!("duplicate metric {}", e.key())));
            }
        }
    }

    Ok(metrics)
}

fn histogram_entry(
    metrics: &mut BTreeMap<MetricName, MetricValue>,
    name: MetricName,
) -> Result<&mut Histogram> {
    match metrics
        .entry(name)
        .or_insert_with(|| MetricValue::Histogram(Histogram::new()))
    {
        MetricValue::Histogram(h) => Ok(h),
        _ => Err(HistError::decoding(
            "histogram bucket for a scalar metric".to_string(),
        )),
    }
}

fn payload_len(payload: &[u8], what: &str) -> Result<u32> {
    u32::try_from(payload.len())
        .map_err(|_| HistError::Encoding(format!("{} of {} bytes too large", what, payload.len())))
}

/// Record encoded against a dictionary builder, not yet placed in a file
#[derive(Debug, Clone)]
pub struct EncodedRecord {
    pub timestamp: Timestamp,
    array: Vec<u8>,
    metrics: Vec<Vec<u8>>,
}

impl EncodedRecord {
    /// Encode every group of `tsc`, interning names in `dict`
    pub fn encode(
        tsc: &dyn TimeSeriesCollection,
        dict: &mut DictionaryForWrite,
        compression: Compression,
    ) -> Result<Self> {
        let mut groups = Vec::new();
        let mut metrics = Vec::new();
        let mut region_len = 0u64;

        for value in tsc.values()? {
            let payload = compression.compress(&encode_metrics(&value.metrics, dict))?;
            let len = payload_len(&payload, "metric segment")?;
            groups.push(RawGroup {
                path_ref: dict.path_ref(value.group.path.elements()),
                tags_ref: dict.tags_ref(&value.group.tags),
                metrics_offset: u32::try_from(region_len)
                    .map_err(|_| HistError::Encoding("metric region too large".into()))?,
                metrics_len: len,
            });
            region_len += segment_span(len);
            metrics.push(payload);
        }

        Ok(Self {
            timestamp: tsc.timestamp(),
            array: compression.compress(&encode_groups(&groups))?,
            metrics,
        })
    }

    /// On-disk span of the metric region
    pub fn metrics_len(&self) -> u64 {
        self.metrics
            .iter()
            .map(|m| segment_span(m.len() as u32))
            .sum()
    }

    /// Append the record, placed at `offset`, to `buf`
    ///
    /// `delta` is the already compressed dictionary delta payload this
    /// record carries, if any.
    pub fn write(&self, offset: u64, delta: Option<&[u8]>, buf: &mut BytesMut) -> Result<RecordHeader> {
        let header = RecordHeader {
            offset,
            timestamp: self.timestamp,
            dict_len: delta.map_or(Ok(0), |d| payload_len(d, "dictionary delta"))?,
            array_len: payload_len(&self.array, "record array")?,
            metrics_len: u32::try_from(self.metrics_len())
                .map_err(|_| HistError::Encoding("metric region too large".into()))?,
        };

        buf.put_slice(&header.encode());
        if let Some(delta) = delta {
            buf.put_slice(&frame(delta));
        }
        buf.put_slice(&frame(&self.array));
        for metric in &self.metrics {
            buf.put_slice(&frame(metric));
        }
        Ok(header)
    }
}
