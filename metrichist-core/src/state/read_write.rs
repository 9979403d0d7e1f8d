//! State of a file opened for appending
//!
//! # Append protocol
//!
//! Appends are serialized by the writer mutex. The metadata lock is held
//! for reading while the current state is snapshotted, and for writing only
//! while the new header is persisted and the new records are published:
//!
//! 1. Snapshot metadata; clone the dictionary builder
//! 2. Sort the batch by timestamp and encode it; the first record carries
//!    the dictionary delta
//! 3. Write the records after the current `file_size`
//! 4. Compute the new header
//! 5. Write the header and publish
//!
//! A failure before step 5 leaves the header untouched; the bytes written
//! past `file_size` are overwritten by the next append. Syncing happens
//! after the commit and only logs its failures.

use super::{calculate_time_series, read_all_record_headers, State};
use crate::dictionary::{DictionaryChain, DictionaryForWrite};
use crate::file::{flags, FileConfig, FileHeader, SyncPolicy};
use crate::record::{EncodedRecord, RecordHeader};
use crate::segment::{Compression, SharedFile};
use crate::sequence::ObjectSequence;
use crate::{CollectionRef, Result, TimeSeriesCollection, Timestamp};
use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Writer-side state, guarded by the writer mutex
struct WriterState {
    /// Builder matching the persisted dictionary, loaded on first append
    dictionary: Option<DictionaryForWrite>,
    commits_since_sync: usize,
}

/// Published state, replaced as a whole on every commit
#[derive(Clone)]
struct Metadata {
    header: FileHeader,
    record_headers: Arc<Vec<Arc<RecordHeader>>>,
    records: Arc<Vec<CollectionRef>>,
}

pub(crate) struct ReadWriteState {
    file: SharedFile,
    compression: Compression,
    sync_policy: SyncPolicy,
    chain: Arc<DictionaryChain>,
    writer: Mutex<WriterState>,
    meta: RwLock<Metadata>,
}

impl ReadWriteState {
    /// Initialize an empty file
    pub fn create(file: SharedFile, config: FileConfig, now: Timestamp) -> Result<Self> {
        let header = FileHeader::new_empty(now, config.compression);
        header.write(&file)?;
        file.sync()?;
        info!(
            "Created list file: {:?} ({} compression)",
            file.path(),
            config.compression
        );

        let chain = DictionaryChain::new(file.clone(), config.compression);
        Ok(Self::new(
            file,
            config,
            chain,
            header,
            Vec::new(),
            Vec::new(),
            Some(DictionaryForWrite::new()),
        ))
    }

    /// Scan an existing file
    pub fn open(file: SharedFile, config: FileConfig) -> Result<Self> {
        let header = FileHeader::read(&file)?;
        let compression = header.compression()?;
        let record_headers = read_all_record_headers(&file, &header)?;

        let chain = DictionaryChain::new(file.clone(), compression);
        let (records, deltas) = calculate_time_series(&file, compression, &chain, &record_headers);
        for pos in deltas {
            chain.push(pos);
        }

        debug!(
            "Opened {:?} for writing: {} records, {} compression",
            file.path(),
            records.len(),
            compression
        );
        let config = FileConfig {
            compression,
            ..config
        };
        Ok(Self::new(file, config, chain, header, record_headers, records, None))
    }

    fn new(
        file: SharedFile,
        config: FileConfig,
        chain: Arc<DictionaryChain>,
        header: FileHeader,
        record_headers: Vec<Arc<RecordHeader>>,
        records: Vec<CollectionRef>,
        dictionary: Option<DictionaryForWrite>,
    ) -> Self {
        Self {
            file,
            compression: config.compression,
            sync_policy: config.sync_policy,
            chain,
            writer: Mutex::new(WriterState {
                dictionary,
                commits_since_sync: 0,
            }),
            meta: RwLock::new(Metadata {
                header,
                record_headers: Arc::new(record_headers),
                records: Arc::new(records),
            }),
        }
    }

    /// True if no two timestamps of `batch` (sorted) or of the batch and
    /// the existing records are equal
    ///
    /// Existing record headers are read back from the file. Any error
    /// counts as a duplicate.
    fn batch_is_distinct(&self, batch: &[Arc<RecordHeader>], meta: &Metadata) -> bool {
        if batch.windows(2).any(|w| w[0].timestamp == w[1].timestamp) {
            return false;
        }

        let first = match batch.first() {
            Some(h) => h.timestamp,
            None => return true,
        };
        if meta.record_headers.is_empty() || first > meta.header.last {
            return true;
        }

        let timestamps: BTreeSet<Timestamp> = batch.iter().map(|h| h.timestamp).collect();
        let sorted = meta.header.is_sorted();
        for existing in meta.record_headers.iter().rev() {
            let stored = match RecordHeader::read(&self.file, existing.offset) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(
                        "Failed to re-read record header at {}, clearing DISTINCT: {}",
                        existing.offset, e
                    );
                    return false;
                }
            };
            if timestamps.contains(&stored.timestamp) {
                return false;
            }
            if sorted && stored.timestamp < first {
                break;
            }
        }
        true
    }

    fn sync(&self, writer: &mut WriterState) -> Result<()> {
        match self.sync_policy {
            SyncPolicy::Immediate => self.file.sync(),
            SyncPolicy::EveryN(n) => {
                writer.commits_since_sync += 1;
                if writer.commits_since_sync >= n {
                    writer.commits_since_sync = 0;
                    self.file.sync()?;
                }
                Ok(())
            }
            SyncPolicy::None => Ok(()),
        }
    }
}

impl State for ReadWriteState {
    fn header(&self) -> FileHeader {
        self.meta.read().header.clone()
    }

    fn sequence(&self) -> ObjectSequence<CollectionRef> {
        let meta = self.meta.read();
        ObjectSequence::from_shared(
            Arc::clone(&meta.records),
            meta.header.is_sorted(),
            meta.header.is_distinct(),
        )
    }

    fn add_records(&self, batch: &[&dyn TimeSeriesCollection]) -> Result<bool> {
        if batch.is_empty() {
            return Ok(false);
        }
        let mut writer = self.writer.lock();

        // 1. Snapshot
        let meta = self.meta.read().clone();
        let persisted = match writer.dictionary.take() {
            Some(dictionary) => dictionary,
            None => DictionaryForWrite::from_dictionary(&*self.chain.latest().decode()?)?,
        };
        let mut dictionary = persisted.clone();
        writer.dictionary = Some(persisted);
        dictionary.reset();

        // 2. Encode
        let mut batch = batch.to_vec();
        batch.sort_by_key(|c| c.timestamp());
        let encoded = batch
            .iter()
            .map(|c| EncodedRecord::encode(*c, &mut dictionary, self.compression))
            .collect::<Result<Vec<_>>>()?;
        let delta = if dictionary.is_empty() {
            None
        } else {
            Some(self.compression.compress(&dictionary.delta().encode())?)
        };

        // 3. Write records
        let start = meta.header.file_size;
        let mut buf = BytesMut::new();
        let mut new_headers = Vec::with_capacity(encoded.len());
        let mut offset = start;
        for (i, record) in encoded.iter().enumerate() {
            let record_delta = if i == 0 { delta.as_deref() } else { None };
            let header = record.write(offset, record_delta, &mut buf)?;
            offset = header.end();
            new_headers.push(Arc::new(header));
        }
        self.file.write_at(start, &buf)?;

        // 4. New header
        let mut header = meta.header.clone();
        let first = new_headers[0].timestamp;
        let last = new_headers[new_headers.len() - 1].timestamp;
        let had_records = !meta.record_headers.is_empty();

        if had_records && first <= header.last && header.is_sorted() {
            debug!("Clearing SORTED on {:?}: {} <= {}", self.file.path(), first, header.last);
            header.flags &= !flags::SORTED;
        }
        if header.is_distinct() && !self.batch_is_distinct(&new_headers, &meta) {
            debug!("Clearing DISTINCT on {:?}", self.file.path());
            header.flags &= !flags::DISTINCT;
        }
        if had_records {
            header.first = header.first.min(first);
            header.last = header.last.max(last);
        } else {
            header.first = first;
            header.last = last;
        }
        header.file_size = offset;
        if delta.is_some() {
            header.dict_ref = new_headers[0].offset;
        }

        let mut record_headers = Vec::with_capacity(meta.record_headers.len() + new_headers.len());
        record_headers.extend(meta.record_headers.iter().cloned());
        record_headers.extend(new_headers.iter().cloned());
        let (new_records, deltas) =
            calculate_time_series(&self.file, self.compression, &self.chain, &new_headers);
        let mut records = Vec::with_capacity(meta.records.len() + new_records.len());
        records.extend(meta.records.iter().cloned());
        records.extend(new_records);

        // 5. Commit
        {
            let mut published = self.meta.write();
            header.write(&self.file)?;
            for pos in deltas {
                self.chain.push(pos);
            }
            *published = Metadata {
                header,
                record_headers: Arc::new(record_headers),
                records: Arc::new(records),
            };
        }
        if delta.is_some() {
            dictionary.reset();
            writer.dictionary = Some(dictionary);
        }

        debug!(
            "Appended {} records to {:?} at {} ({} bytes)",
            new_headers.len(),
            self.file.path(),
            start,
            buf.len()
        );
        // Committed; a failed sync must not invite a retry
        if let Err(e) = self.sync(&mut writer) {
            warn!("Failed to sync {:?} after append: {}", self.file.path(), e);
        }
        Ok(true)
    }

    fn file(&self) -> &SharedFile {
        &self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GroupName, GroupPath, MetricName, SimpleCollection};
    use tempfile::TempDir;

    fn sample(timestamp: Timestamp, metric: &str) -> SimpleCollection {
        let mut tsc = SimpleCollection::new(timestamp);
        tsc.insert_metric(
            GroupName::new(GroupPath::new(["app"])),
            MetricName::new([metric]),
            1i64,
        );
        tsc
    }

    fn create(temp_dir: &TempDir) -> ReadWriteState {
        let file = SharedFile::create(temp_dir.path().join("f")).unwrap();
        ReadWriteState::create(file, FileConfig::default(), 1_000).unwrap()
    }

    #[test]
    fn test_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let state = create(&temp_dir);

        let header = state.header();
        assert_eq!(header.first, 1_000);
        assert_eq!(header.last, 1_000);
        assert!(header.is_sorted() && header.is_distinct());
        assert!(state.sequence().is_empty());
        assert!(!state.add_records(&[]).unwrap());
    }

    #[test]
    fn test_first_append_replaces_creation_time() {
        let temp_dir = TempDir::new().unwrap();
        let state = create(&temp_dir);

        assert!(state.add_records(&[&sample(20, "a"), &sample(10, "a")]).unwrap());
        let header = state.header();
        assert_eq!((header.first, header.last), (10, 20));
        assert!(header.is_sorted() && header.is_distinct());

        let timestamps: Vec<Timestamp> = state.sequence().iter().map(|c| c.timestamp()).collect();
        assert_eq!(timestamps, vec![10, 20]);
    }

    #[test]
    fn test_out_of_order_clears_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let state = create(&temp_dir);

        state.add_records(&[&sample(20, "a")]).unwrap();
        state.add_records(&[&sample(10, "a")]).unwrap();
        let header = state.header();
        assert!(!header.is_sorted());
        assert!(header.is_distinct());
        assert_eq!((header.first, header.last), (10, 20));

        // Never set again
        state.add_records(&[&sample(30, "a")]).unwrap();
        assert!(!state.header().is_sorted());
    }

    #[test]
    fn test_duplicates_clear_distinct() {
        let temp_dir = TempDir::new().unwrap();
        let state = create(&temp_dir);

        state.add_records(&[&sample(10, "a"), &sample(20, "a")]).unwrap();
        state.add_records(&[&sample(20, "b")]).unwrap();
        let header = state.header();
        assert!(!header.is_distinct());
        assert!(!header.is_sorted());

        let temp_dir = TempDir::new().unwrap();
        let state = create(&temp_dir);
        state.add_records(&[&sample(10, "a"), &sample(10, "b")]).unwrap();
        assert!(!state.header().is_distinct());
        assert!(state.header().is_sorted());
    }

    #[test]
    fn test_dictionary_only_on_new_entries() {
        let temp_dir = TempDir::new().unwrap();
        let state = create(&temp_dir);

        state.add_records(&[&sample(10, "a"), &sample(20, "a")]).unwrap();
        let after_first = state.header().dict_ref;
        state.add_records(&[&sample(30, "a")]).unwrap();
        assert_eq!(state.header().dict_ref, after_first);

        state.add_records(&[&sample(40, "b")]).unwrap();
        let meta = state.meta.read();
        let headers = &meta.record_headers;
        assert_eq!(meta.header.dict_ref, headers[3].offset);
        let with_dict: Vec<bool> = headers.iter().map(|h| h.has_dictionary()).collect();
        assert_eq!(with_dict, vec![true, false, false, true]);
    }

    #[test]
    fn test_reopen_continues_dictionary() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("f");
        {
            let state = create(&temp_dir);
            state.add_records(&[&sample(10, "a")]).unwrap();
        }

        let file = SharedFile::open(&path, true).unwrap();
        let state = ReadWriteState::open(file, FileConfig::default()).unwrap();
        state.add_records(&[&sample(20, "a"), &sample(30, "b")]).unwrap();

        let records = state.sequence().to_vec();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].to_simple().unwrap(), sample(10, "a"));
        assert_eq!(records[2].to_simple().unwrap(), sample(30, "b"));
    }

    #[test]
    fn test_failed_append_leaves_state() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("f");
        {
            let state = create(&temp_dir);
            state.add_records(&[&sample(10, "a")]).unwrap();
        }

        // A read-only handle fails the write in step 3
        let file = SharedFile::open(&path, false).unwrap();
        let state = ReadWriteState::open(file, FileConfig::default()).unwrap();
        let before = state.header();
        assert!(state.add_records(&[&sample(20, "b")]).is_err());
        assert_eq!(state.header(), before);
        assert_eq!(state.sequence().len(), 1);
        assert_eq!(state.chain.len(), 1);
    }

    #[test]
    fn test_rescan_error_clears_distinct() {
        let temp_dir = TempDir::new().unwrap();
        let state = create(&temp_dir);
        state.add_records(&[&sample(10, "a"), &sample(30, "a")]).unwrap();
        assert!(state.header().is_distinct());

        // Damage the stored header of the t=30 record
        let offset = state.meta.read().record_headers[1].offset;
        state.file.write_at(offset, &[0xff; 4]).unwrap();

        state.add_records(&[&sample(20, "a")]).unwrap();
        let header = state.header();
        assert!(!header.is_distinct());
        assert!(!header.is_sorted());
        assert_eq!((header.first, header.last), (10, 30));
    }

    #[test]
    fn test_sync_every_n() {
        let temp_dir = TempDir::new().unwrap();
        let file = SharedFile::create(temp_dir.path().join("f")).unwrap();
        let config = FileConfig::default().with_sync_policy(SyncPolicy::EveryN(2));
        let state = ReadWriteState::create(file, config, 0).unwrap();

        state.add_records(&[&sample(10, "a")]).unwrap();
        assert_eq!(state.writer.lock().commits_since_sync, 1);
        assert!(state.add_records(&[&sample(20, "a")]).unwrap());
        assert_eq!(state.writer.lock().commits_since_sync, 0);
    }
}
