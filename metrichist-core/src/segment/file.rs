//! Shared, reference-counted file handle

use super::codec::{segment_span, unframe, FilePos};
use super::{Compression, Segment};
use crate::{HistError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// File handle shared by every lazily decoded view of one file
///
/// Each clone is one reference; the descriptor is closed when the last
/// clone is dropped, whichever view that happens to be.
#[derive(Clone)]
pub struct SharedFile {
    inner: Arc<FileInner>,
}

struct FileInner {
    path: PathBuf,
    writable: bool,
    file: Mutex<File>,
}

impl Drop for FileInner {
    fn drop(&mut self) {
        debug!("Closing {:?}", self.path);
    }
}

impl SharedFile {
    /// Open an existing file
    pub fn open(path: impl AsRef<Path>, writable: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(writable).open(&path)?;
        Ok(Self::wrap(path, file, writable))
    }

    /// Create a new, empty file; fails if it already exists
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(Self::wrap(path, file, true))
    }

    fn wrap(path: PathBuf, file: File, writable: bool) -> Self {
        debug!("Opened {:?} (writable: {})", path, writable);
        Self {
            inner: Arc::new(FileInner {
                path,
                writable,
                file: Mutex::new(file),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn is_writable(&self) -> bool {
        self.inner.writable
    }

    /// Number of live handles to this file
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Current length of the file on disk
    pub fn len(&self) -> Result<u64> {
        Ok(self.inner.file.lock().metadata()?.len())
    }

    /// Read exactly `len` bytes at `offset`
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut file = self.inner.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => HistError::Truncated {
                offset: offset + len as u64,
                end: file.metadata().map(|m| m.len()).unwrap_or(0),
            },
            _ => HistError::Io(e),
        })?;
        Ok(buf)
    }

    /// Write all of `data` at `offset`
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.inner.writable {
            return Err(HistError::ReadOnly);
        }
        let mut file = self.inner.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Flush file contents to stable storage
    pub fn sync(&self) -> Result<()> {
        self.inner.file.lock().sync_data()?;
        Ok(())
    }

    /// Read, verify and decompress the payload at `pos`
    pub fn read_segment(&self, pos: FilePos, compression: Compression) -> Result<Vec<u8>> {
        trace!("Reading segment {} of {:?}", pos, self.inner.path);
        if pos.len == 0 {
            return Err(HistError::decoding(format!("empty segment at {}", pos.offset)));
        }
        let framed = self.read_at(pos.offset, segment_span(pos.len) as usize)?;
        let payload = unframe(&framed, pos.len)?;
        compression.decompress(payload)
    }
}

impl std::fmt::Debug for SharedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedFile")
            .field("path", &self.inner.path)
            .field("handles", &self.handle_count())
            .finish()
    }
}

/// Segment decoding the payload at `pos` with `parse`
///
/// The segment keeps its own handle to the file.
pub(crate) fn file_segment<T, F>(
    file: SharedFile,
    pos: FilePos,
    compression: Compression,
    parse: F,
) -> Segment<T>
where
    T: Send + 'static,
    F: Fn(&[u8]) -> Result<T> + Send + Sync + 'static,
{
    Segment::from_fn(move || {
        let payload = file.read_segment(pos, compression)?;
        parse(&payload)
    })
}
