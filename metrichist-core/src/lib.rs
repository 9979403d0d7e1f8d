//! Metrichist Core - Append-Only Time-Series Collection Files
//!
//! A file holds a sequence of timestamped metric collections, encoded with
//! a shared, incrementally grown dictionary:
//!
//! - **Segments**: CRC-protected byte ranges decoded lazily on demand
//! - **Dictionary**: interned strings, paths and tag sets, persisted as deltas
//! - **Records**: one per timestamp, decoded group by group
//! - **States**: read-only scan at open, or a single-writer append protocol
//! - **Sequences**: ordered views with O(1) reverse and normalization
//!
//! # Example
//!
//! ```no_run
//! use metrichist_core::{
//!     FileConfig, GroupName, GroupPath, ListFile, MetricName, SimpleCollection,
//!     TimeSeriesCollection,
//! };
//!
//! # fn main() -> metrichist_core::Result<()> {
//! let file = ListFile::create("history.mhist", FileConfig::default())?;
//!
//! let mut tsc = SimpleCollection::new(1_700_000_000_000);
//! tsc.insert_metric(
//!     GroupName::new(GroupPath::new(["jvm", "gc"])),
//!     MetricName::new(["count"]),
//!     12i64,
//! );
//! file.add(&tsc)?;
//!
//! for collection in file.stream().iter() {
//!     println!("{} groups", collection.groups()?.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod dictionary;
pub mod file;
pub mod record;
pub mod segment;
pub mod sequence;
mod state;

mod error;
mod types;

pub use error::{HistError, Result};
pub use file::{FileConfig, ListFile, SyncPolicy};
pub use segment::Compression;
pub use sequence::ObjectSequence;
pub use types::*;

/// Metrichist version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Format constants
pub mod config {
    use crate::segment::Compression;

    /// Magic bytes at the start of every file
    pub const MAGIC: [u8; 12] = [
        0x11, 0x13, 0x17, 0x1d, b'M', b'H', b'I', b'S', b'T', b'-', b'v', b'2',
    ];

    /// Major format version; files with another major are rejected
    pub const MAJOR: u16 = 2;

    /// Minor format version written by this codec
    pub const MINOR: u16 = 0;

    /// Magic plus version word
    pub const MIME_HEADER_LEN: usize = 16;

    /// first, last, file_size, flags, reserved, dict_ref
    pub const FILE_HEADER_LEN: usize = 40;

    /// Segment payloads are padded to this boundary
    pub const ALIGNMENT: u64 = 4;

    /// Length of the CRC32 trailing every segment
    pub const CRC_LEN: u64 = 4;

    /// Bytes taken by mime header, file header and CRC
    pub const HEADER_SPAN: u64 = (MIME_HEADER_LEN + FILE_HEADER_LEN) as u64 + CRC_LEN;

    /// timestamp, dict_len, array_len, metrics_len, reserved
    pub const RECORD_HEADER_LEN: usize = 24;

    /// Record header plus CRC
    pub const RECORD_HEADER_SPAN: u64 = RECORD_HEADER_LEN as u64 + CRC_LEN;

    /// Compression used for new files unless configured otherwise
    pub const DEFAULT_COMPRESSION: Compression = Compression::Gzip;
}
