//! Chain of persisted dictionary deltas of one file

use super::{Dictionary, DictionaryDelta};
use crate::segment::{Compression, FilePos, Segment, SharedFile};
use crate::{HistError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

struct Link {
    pos: FilePos,
    resolved: Option<Arc<Dictionary>>,
}

/// Delta-bearing records of a file, in file order
///
/// Link `i` resolves to the dictionary after applying deltas `0..=i`.
/// Resolution starts from the nearest resolved link below `i` and keeps
/// every dictionary it builds on the way; failures are not kept.
pub(crate) struct DictionaryChain {
    file: SharedFile,
    compression: Compression,
    links: Mutex<Vec<Link>>,
}

impl DictionaryChain {
    pub fn new(file: SharedFile, compression: Compression) -> Arc<Self> {
        Arc::new(Self {
            file,
            compression,
            links: Mutex::new(Vec::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.links.lock().len()
    }

    /// Add the delta stored at `pos`, returning its link index
    pub fn push(&self, pos: FilePos) -> usize {
        let mut links = self.links.lock();
        links.push(Link {
            pos,
            resolved: None,
        });
        links.len() - 1
    }

    /// Dictionary as of link `idx`
    ///
    /// Deltas are read without holding the link list, so `push` never
    /// waits on file I/O.
    pub fn resolve(&self, idx: usize) -> Result<Arc<Dictionary>> {
        let (mut dict, from, pending) = {
            let links = self.links.lock();
            if idx >= links.len() {
                return Err(HistError::decoding(format!(
                    "dictionary link {} not in chain of {}",
                    idx,
                    links.len()
                )));
            }

            let start = (0..=idx).rev().find(|&i| links[i].resolved.is_some());
            let dict = start
                .and_then(|i| links[i].resolved.clone())
                .unwrap_or_else(|| Arc::new(Dictionary::new()));
            let from = start.map_or(0, |i| i + 1);
            let pending: Vec<FilePos> = links[from..=idx].iter().map(|l| l.pos).collect();
            (dict, from, pending)
        };

        let mut resolved = Vec::with_capacity(pending.len());
        for pos in pending {
            trace!("Applying dictionary delta at {}", pos);
            let payload = self.file.read_segment(pos, self.compression)?;
            let delta = DictionaryDelta::decode(&payload)?;
            dict = Arc::new(dict.with_delta(&delta)?);
            resolved.push(dict.clone());
        }

        // A concurrent resolve may have stored these first; keep theirs
        let mut links = self.links.lock();
        for (link, dict) in links[from..].iter_mut().zip(resolved) {
            if link.resolved.is_none() {
                link.resolved = Some(dict);
            }
        }
        Ok(links[idx].resolved.clone().unwrap_or(dict))
    }

    /// Segment yielding the dictionary as of link `idx`, or the empty
    /// dictionary for records preceding the first delta
    pub fn segment(self: &Arc<Self>, idx: Option<usize>) -> Segment<Arc<Dictionary>> {
        match idx {
            Some(idx) => {
                let chain = Arc::clone(self);
                Segment::from_fn(move || chain.resolve(idx))
            }
            None => Segment::of(Arc::new(Dictionary::new())),
        }
    }

    /// Segment yielding the newest dictionary
    pub fn latest(self: &Arc<Self>) -> Segment<Arc<Dictionary>> {
        self.segment(self.len().checked_sub(1))
    }
}
