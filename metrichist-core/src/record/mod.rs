//! Record encoding and lazily decoded record views
//!
//! A record holds one collection:
//!
//! ```text
//! | record header | crc | dictionary delta? | record array | metric segment* |
//! ```
//!
//! The record array lists every group with a pointer to its metric
//! segment, so a lookup of one group reads only the array and that segment.

mod codec;
mod collection;
mod header;

pub use codec::EncodedRecord;
pub use collection::{GroupIndex, ListCollection};
pub use header::RecordHeader;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HEADER_SPAN;
    use crate::dictionary::{Dictionary, DictionaryForWrite};
    use crate::segment::{Compression, Segment, SharedFile};
    use crate::{
        GroupName, GroupPath, Histogram, MetricName, SimpleCollection, TimeSeriesCollection,
    };
    use bytes::BytesMut;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn sample(timestamp: i64) -> SimpleCollection {
        let mut tsc = SimpleCollection::new(timestamp);
        let gc = GroupName::new(GroupPath::new(["jvm", "gc"])).with_tag("host", "h1");
        let mem = GroupName::new(GroupPath::new(["jvm", "mem"]));
        tsc.insert_metric(gc.clone(), MetricName::new(["count"]), 12i64);
        tsc.insert_metric(gc, MetricName::new(["name"]), "G1");
        tsc.insert_metric(
            mem,
            MetricName::new(["latency"]),
            Histogram::new().with_range(0.0, 10.0, 4.0).with_range(10.0, 20.0, 6.0),
        );
        tsc
    }

    /// Write one record with its delta at HEADER_SPAN and return a view on it
    fn write_record(
        file: &SharedFile,
        tsc: &SimpleCollection,
        compression: Compression,
    ) -> ListCollection {
        let mut builder = DictionaryForWrite::new();
        let record = EncodedRecord::encode(tsc, &mut builder, compression).unwrap();
        let delta = builder.delta();
        let packed = compression.compress(&delta.encode()).unwrap();

        let mut buf = BytesMut::new();
        let header = record.write(HEADER_SPAN, Some(&packed), &mut buf).unwrap();
        file.write_at(HEADER_SPAN, &buf).unwrap();
        assert_eq!(header.end(), HEADER_SPAN + buf.len() as u64);

        let read = RecordHeader::read(file, HEADER_SPAN).unwrap();
        assert_eq!(read, header);

        let dict = Arc::new(Dictionary::new().with_delta(&delta).unwrap());
        ListCollection::new(file.clone(), compression, Arc::new(read), Segment::of(dict))
    }

    #[test]
    fn test_record_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        for compression in [Compression::None, Compression::Gzip, Compression::Lz4] {
            let file = SharedFile::create(temp_dir.path().join(compression.name())).unwrap();
            let tsc = sample(1_000);
            let view = write_record(&file, &tsc, compression);

            assert_eq!(view.timestamp(), 1_000);
            assert!(!view.is_empty().unwrap());
            assert_eq!(view.groups().unwrap(), tsc.groups().unwrap());
            assert_eq!(view.group_paths().unwrap().len(), 2);
            assert_eq!(view.to_simple().unwrap(), tsc);
        }
    }

    #[test]
    fn test_targeted_lookups() {
        let temp_dir = TempDir::new().unwrap();
        let file = SharedFile::create(temp_dir.path().join("f")).unwrap();
        let tsc = sample(5);
        let view = write_record(&file, &tsc, Compression::Gzip);

        let mem = GroupName::new(GroupPath::new(["jvm", "mem"]));
        assert_eq!(view.get(&mem).unwrap(), tsc.get(&mem).unwrap());
        assert!(view
            .get(&GroupName::new(GroupPath::new(["jvm", "mem"])).with_tag("host", "x"))
            .unwrap()
            .is_none());
        assert_eq!(view.get_group(&GroupPath::new(["jvm", "gc"])).unwrap().len(), 1);
        assert!(view.get_group(&GroupPath::new(["os"])).unwrap().is_empty());
    }

    #[test]
    fn test_empty_collection() {
        let temp_dir = TempDir::new().unwrap();
        let file = SharedFile::create(temp_dir.path().join("f")).unwrap();
        let view = write_record(&file, &SimpleCollection::new(9), Compression::None);

        assert!(view.is_empty().unwrap());
        assert!(view.values().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_metric_segment() {
        let temp_dir = TempDir::new().unwrap();
        let file = SharedFile::create(temp_dir.path().join("f")).unwrap();
        let view = write_record(&file, &sample(1), Compression::None);

        // Last byte of the record is inside the last metric segment's CRC
        let end = view.header().end();
        let mut byte = file.read_at(end - 1, 1).unwrap();
        byte[0] ^= 0xff;
        file.write_at(end - 1, &byte).unwrap();

        // The index is intact; decoding the last group fails
        assert_eq!(view.groups().unwrap().len(), 2);
        assert!(view.values().unwrap_err().is_decoding());
    }
}
