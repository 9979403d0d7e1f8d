//! In-memory state of an open list file
//!
//! Both states scan the record headers once at open and hand out lazily
//! decoded views; only the read-write state can append.

mod read_only;
mod read_write;

pub(crate) use read_only::ReadOnlyState;
pub(crate) use read_write::ReadWriteState;

use crate::config::{HEADER_SPAN, RECORD_HEADER_SPAN};
use crate::dictionary::DictionaryChain;
use crate::file::FileHeader;
use crate::record::{ListCollection, RecordHeader};
use crate::segment::{Compression, FilePos, SharedFile};
use crate::sequence::ObjectSequence;
use crate::{CollectionRef, HistError, Result, TimeSeriesCollection, Timestamp};
use std::sync::Arc;
use tracing::debug;

/// Operations shared by read-only and read-write files
pub(crate) trait State: Send + Sync {
    /// Current file header
    fn header(&self) -> FileHeader;

    /// All records in file order, tagged with the header's flags
    fn sequence(&self) -> ObjectSequence<CollectionRef>;

    /// Append a batch; returns false if there was nothing to write
    fn add_records(&self, batch: &[&dyn TimeSeriesCollection]) -> Result<bool>;

    fn file(&self) -> &SharedFile;

    fn begin(&self) -> Timestamp {
        self.header().first
    }

    fn end(&self) -> Timestamp {
        self.header().last
    }
}

/// Scan every record header between the file header and `file_size`
///
/// Only offsets and header CRCs are checked; no record contents are read.
pub(crate) fn read_all_record_headers(
    file: &SharedFile,
    header: &FileHeader,
) -> Result<Vec<Arc<RecordHeader>>> {
    let mut headers = Vec::new();
    let mut offset = HEADER_SPAN;
    let mut last_dict = 0;

    while offset < header.file_size {
        if offset + RECORD_HEADER_SPAN > header.file_size {
            return Err(HistError::Truncated {
                offset: offset + RECORD_HEADER_SPAN,
                end: header.file_size,
            });
        }
        let record = RecordHeader::read(file, offset)?;
        if record.end() > header.file_size {
            return Err(HistError::Truncated {
                offset: record.end(),
                end: header.file_size,
            });
        }
        if record.has_dictionary() {
            last_dict = record.offset;
        }
        offset = record.end();
        headers.push(Arc::new(record));
    }

    if last_dict != header.dict_ref {
        return Err(HistError::decoding(format!(
            "header points at dictionary {}, last dictionary found at {}",
            header.dict_ref, last_dict
        )));
    }

    debug!(
        "Scanned {} records of {:?} ({} bytes)",
        headers.len(),
        file.path(),
        header.file_size
    );
    Ok(headers)
}

/// Lazy views for `headers`, which follow the records already in `chain`
///
/// Returns the views and the dictionary deltas the headers carry. The
/// deltas must be pushed onto `chain`, in order, before any view is
/// decoded.
pub(crate) fn calculate_time_series(
    file: &SharedFile,
    compression: Compression,
    chain: &Arc<DictionaryChain>,
    headers: &[Arc<RecordHeader>],
) -> (Vec<CollectionRef>, Vec<FilePos>) {
    let mut next = chain.len();
    let mut current = next.checked_sub(1);
    let mut deltas = Vec::new();
    let mut records = Vec::with_capacity(headers.len());

    for header in headers {
        if let Some(pos) = header.dict_pos() {
            deltas.push(pos);
            current = Some(next);
            next += 1;
        }
        let view = ListCollection::new(
            file.clone(),
            compression,
            Arc::clone(header),
            chain.segment(current),
        );
        records.push(Arc::new(view) as CollectionRef);
    }

    (records, deltas)
}
