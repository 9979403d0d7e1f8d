//! List file: public API over one history file
//!
//! # File Format
//!
//! ```text
//! +------------------+
//! | Mime Header      |  magic + version
//! +------------------+
//! | File Header      |  first, last, file_size, flags, dict_ref + CRC
//! +------------------+
//! | Record 0         |
//! +------------------+
//! | Record 1         |
//! +------------------+
//! | ...              |
//! +------------------+
//! ```
//!
//! Bytes past `file_size` belong to an append that did not complete and
//! are overwritten by the next one.

mod header;
mod list_file;

pub use header::{flags, FileHeader};
pub use list_file::{format_timestamp, ListFile};

use crate::config::DEFAULT_COMPRESSION;
use crate::segment::Compression;

/// When committed appends are flushed to stable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// Sync after every append
    #[default]
    Immediate,
    /// Sync after every N appends
    EveryN(usize),
    /// Leave flushing to the OS
    None,
}

/// Options for creating or opening a file for writing
#[derive(Debug, Clone)]
pub struct FileConfig {
    /// Compression of new files; existing files keep theirs
    pub compression: Compression,
    pub sync_policy: SyncPolicy,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            compression: DEFAULT_COMPRESSION,
            sync_policy: SyncPolicy::default(),
        }
    }
}

impl FileConfig {
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_sync_policy(mut self, sync_policy: SyncPolicy) -> Self {
        self.sync_policy = sync_policy;
        self
    }
}
