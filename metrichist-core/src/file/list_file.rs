//! ListFile: append-only collection file

use super::{FileConfig, FileHeader};
use crate::segment::{Compression, SharedFile};
use crate::sequence::ObjectSequence;
use crate::state::{ReadOnlyState, ReadWriteState, State};
use crate::{CollectionRef, Result, TimeSeriesCollection, Timestamp};
use chrono::{TimeZone, Utc};
use std::path::Path;
use tracing::info;

/// Open history file
///
/// Readers never block on an append in progress: every stream is a
/// snapshot of the records committed when it was taken.
pub struct ListFile {
    state: Box<dyn State>,
    read_only: bool,
}

impl ListFile {
    /// Create a new, empty file; fails if `path` exists
    pub fn create(path: impl AsRef<Path>, config: FileConfig) -> Result<Self> {
        let file = SharedFile::create(path)?;
        let now = Utc::now().timestamp_millis();
        Ok(Self {
            state: Box::new(ReadWriteState::create(file, config, now)?),
            read_only: false,
        })
    }

    /// Open an existing file for reading and appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, FileConfig::default())
    }

    /// Open an existing file for appending with explicit options
    ///
    /// The file's own compression takes precedence over `config`.
    pub fn open_with(path: impl AsRef<Path>, config: FileConfig) -> Result<Self> {
        let file = SharedFile::open(path, true)?;
        Ok(Self {
            state: Box::new(ReadWriteState::open(file, config)?),
            read_only: false,
        })
    }

    /// Open an existing file without write access
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let file = SharedFile::open(path, false)?;
        Ok(Self {
            state: Box::new(ReadOnlyState::open(file)?),
            read_only: true,
        })
    }

    /// Append one collection
    pub fn add(&self, tsc: &dyn TimeSeriesCollection) -> Result<bool> {
        self.state.add_records(&[tsc])
    }

    /// Append collections as one batch
    pub fn add_all<C: TimeSeriesCollection>(&self, collections: &[C]) -> Result<bool> {
        let batch: Vec<&dyn TimeSeriesCollection> = collections
            .iter()
            .map(|c| c as &dyn TimeSeriesCollection)
            .collect();
        self.state.add_records(&batch)
    }

    /// All collections in timestamp order, duplicates merged
    pub fn stream(&self) -> ObjectSequence<CollectionRef> {
        self.state.sequence().normalize()
    }

    /// All collections in reverse timestamp order
    pub fn stream_reverse(&self) -> ObjectSequence<CollectionRef> {
        self.stream().reverse()
    }

    /// Records as stored, tagged with the header's flags
    pub fn raw_stream(&self) -> ObjectSequence<CollectionRef> {
        self.state.sequence()
    }

    /// Number of distinct timestamps
    pub fn size(&self) -> usize {
        let seq = self.state.sequence();
        if seq.is_sorted() && seq.is_distinct() {
            seq.len()
        } else {
            seq.normalize().len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.sequence().is_empty()
    }

    /// Earliest timestamp covered by the file
    pub fn get_begin(&self) -> Timestamp {
        self.state.begin()
    }

    /// Latest timestamp covered by the file
    pub fn get_end(&self) -> Timestamp {
        self.state.end()
    }

    /// Size of the file on disk
    pub fn get_file_size(&self) -> Result<u64> {
        self.state.file().len()
    }

    pub fn header(&self) -> FileHeader {
        self.state.header()
    }

    pub fn compression(&self) -> Result<Compression> {
        self.header().compression()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn path(&self) -> &Path {
        self.state.file().path()
    }

    /// Log a one-line summary of the file
    pub fn log_summary(&self) {
        let header = self.header();
        info!(
            "{:?}: {} records, {} .. {}, {} bytes",
            self.path(),
            self.state.sequence().len(),
            format_timestamp(header.first),
            format_timestamp(header.last),
            header.file_size
        );
    }
}

/// RFC 3339 rendering of a millisecond timestamp
pub fn format_timestamp(ts: Timestamp) -> String {
    match Utc.timestamp_millis_opt(ts).single() {
        Some(dt) => dt.to_rfc3339(),
        None => ts.to_string(),
    }
}

impl std::fmt::Debug for ListFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListFile")
            .field("path", &self.path())
            .field("read_only", &self.read_only)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GroupName, GroupPath, HistError, MetricName, SimpleCollection};
    use tempfile::TempDir;

    fn sample(timestamp: Timestamp, value: i64) -> SimpleCollection {
        let mut tsc = SimpleCollection::new(timestamp);
        tsc.insert_metric(
            GroupName::new(GroupPath::new(["app"])),
            MetricName::new(["v"]),
            value,
        );
        tsc
    }

    #[test]
    fn test_create_and_add() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("history.mhist");
        let file = ListFile::create(&path, FileConfig::default()).unwrap();
        assert!(file.is_empty());
        assert_eq!(file.size(), 0);

        assert!(file.add(&sample(10, 1)).unwrap());
        assert!(file.add_all(&[sample(20, 2), sample(30, 3)]).unwrap());
        assert_eq!(file.size(), 3);
        assert_eq!(file.get_begin(), 10);
        assert_eq!(file.get_end(), 30);
        assert_eq!(file.get_file_size().unwrap(), file.header().file_size);

        // Already exists
        assert!(ListFile::create(&path, FileConfig::default()).is_err());
    }

    #[test]
    fn test_size_merges_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        let file = ListFile::create(temp_dir.path().join("f"), FileConfig::default()).unwrap();
        file.add(&sample(20, 1)).unwrap();
        file.add(&sample(10, 2)).unwrap();
        file.add(&sample(20, 3)).unwrap();

        assert_eq!(file.raw_stream().len(), 3);
        assert_eq!(file.size(), 2);

        // First record at a timestamp wins
        let stream = file.stream();
        assert_eq!(stream.last().unwrap().to_simple().unwrap(), sample(20, 1));
    }

    #[test]
    fn test_read_only_rejects_add() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("f");
        ListFile::create(&path, FileConfig::default())
            .unwrap()
            .add(&sample(1, 1))
            .unwrap();

        let file = ListFile::open_read_only(&path).unwrap();
        assert!(file.is_read_only());
        assert!(matches!(file.add(&sample(2, 2)), Err(HistError::ReadOnly)));
        assert!(matches!(file.add_all(&[sample(2, 2)]), Err(HistError::ReadOnly)));
        assert_eq!(file.size(), 1);
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00+00:00");
    }
}
