//! State of a file opened read-only

use super::{calculate_time_series, read_all_record_headers, State};
use crate::dictionary::DictionaryChain;
use crate::file::FileHeader;
use crate::segment::SharedFile;
use crate::sequence::ObjectSequence;
use crate::{CollectionRef, HistError, Result, TimeSeriesCollection};
use std::sync::Arc;
use tracing::debug;

/// Records of a file scanned once at open
///
/// The header's SORTED and DISTINCT flags are trusted as written.
pub(crate) struct ReadOnlyState {
    file: SharedFile,
    header: FileHeader,
    records: Arc<Vec<CollectionRef>>,
}

impl ReadOnlyState {
    pub fn open(file: SharedFile) -> Result<Self> {
        let header = FileHeader::read(&file)?;
        let compression = header.compression()?;
        let headers = read_all_record_headers(&file, &header)?;

        let chain = DictionaryChain::new(file.clone(), compression);
        let (records, deltas) = calculate_time_series(&file, compression, &chain, &headers);
        for pos in deltas {
            chain.push(pos);
        }

        debug!(
            "Opened {:?} read-only: {} records, {} compression",
            file.path(),
            records.len(),
            compression
        );
        Ok(Self {
            file,
            header,
            records: Arc::new(records),
        })
    }
}

impl State for ReadOnlyState {
    fn header(&self) -> FileHeader {
        self.header.clone()
    }

    fn sequence(&self) -> ObjectSequence<CollectionRef> {
        ObjectSequence::from_shared(
            Arc::clone(&self.records),
            self.header.is_sorted(),
            self.header.is_distinct(),
        )
    }

    fn add_records(&self, _batch: &[&dyn TimeSeriesCollection]) -> Result<bool> {
        Err(HistError::ReadOnly)
    }

    fn file(&self) -> &SharedFile {
        &self.file
    }
}
