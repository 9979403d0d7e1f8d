//! Lazy segment decoding
//!
//! A [`Segment`] is a deferred decode: nothing is read until
//! [`Segment::decode`] is called. Segments compose with `map`, `flat_map`
//! and `combine`, and can be memoized with `cache` (keep the first
//! successful result) or `share` (hand out the same value while any
//! consumer still holds it).
//!
//! File-backed segments verify their CRC on every decode; only the decoded
//! value is ever cached, never the fact that the bytes were valid.

mod codec;
mod compression;
mod file;

pub use codec::{align, segment_span, ByteReader, FilePos};
pub use compression::Compression;
pub use file::SharedFile;

pub(crate) use codec::{frame, put_string, unframe};
pub(crate) use file::file_segment;

use crate::Result;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Deferred, composable decoder
pub struct Segment<T> {
    inner: Arc<dyn Fn() -> Result<T> + Send + Sync>,
}

impl<T> Clone for Segment<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Segment<T> {
    /// Create a segment from a decode function
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Segment that always yields `value`
    pub fn of(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_fn(move || Ok(value.clone()))
    }

    /// Run the decoder
    pub fn decode(&self) -> Result<T> {
        (self.inner)()
    }

    /// Transform the decoded value
    pub fn map<U, F>(self, f: F) -> Segment<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Segment::from_fn(move || self.decode().map(&f))
    }

    /// Transform the decoded value with a fallible function
    pub fn try_map<U, F>(self, f: F) -> Segment<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U> + Send + Sync + 'static,
    {
        Segment::from_fn(move || self.decode().and_then(&f))
    }

    /// Decode, then decode the segment produced from the value
    pub fn flat_map<U, F>(self, f: F) -> Segment<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Segment<U> + Send + Sync + 'static,
    {
        Segment::from_fn(move || f(self.decode()?).decode())
    }

    /// Decode both segments and merge the results
    pub fn combine<U, V, F>(self, other: Segment<U>, f: F) -> Segment<V>
    where
        U: Send + 'static,
        V: Send + 'static,
        F: Fn(T, U) -> Result<V> + Send + Sync + 'static,
    {
        Segment::from_fn(move || {
            let left = self.decode()?;
            let right = other.decode()?;
            f(left, right)
        })
    }

    /// Memoize the first successful decode
    ///
    /// Failures are not remembered; the next call retries.
    pub fn cache(self) -> Segment<T>
    where
        T: Clone + Sync,
    {
        let slot: Mutex<Option<T>> = Mutex::new(None);
        Segment::from_fn(move || {
            let mut slot = slot.lock();
            if let Some(value) = slot.as_ref() {
                return Ok(value.clone());
            }
            let value = self.decode()?;
            *slot = Some(value.clone());
            Ok(value)
        })
    }
}

impl<T: Send + Sync + 'static> Segment<Arc<T>> {
    /// Share one decoded value between all live consumers
    ///
    /// The value is held weakly: once every consumer dropped it, the next
    /// decode reads it again.
    pub fn share(self) -> Segment<Arc<T>> {
        let slot: Mutex<Weak<T>> = Mutex::new(Weak::new());
        Segment::from_fn(move || {
            let mut slot = slot.lock();
            if let Some(value) = slot.upgrade() {
                return Ok(value);
            }
            let value = self.decode()?;
            *slot = Arc::downgrade(&value);
            Ok(value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HistError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: Arc<AtomicUsize>) -> Segment<Arc<String>> {
        Segment::from_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new("value".to_string()))
        })
    }

    #[test]
    fn test_map_and_combine() {
        let a = Segment::of(20).map(|v| v + 1);
        let b = Segment::of(2);
        let c = a.combine(b, |x, y| Ok(x * y));
        assert_eq!(c.decode().unwrap(), 42);

        let d = Segment::of(3).flat_map(|n| Segment::of(vec![0u8; n]));
        assert_eq!(d.decode().unwrap().len(), 3);
    }

    #[test]
    fn test_cache_decodes_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seg = counting(counter.clone()).cache();

        seg.decode().unwrap();
        seg.clone().decode().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cache_retries_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let seg = Segment::from_fn(move || {
            if a.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(HistError::Decoding("first attempt".into()))
            } else {
                Ok(7u32)
            }
        })
        .cache();

        assert!(seg.decode().is_err());
        assert_eq!(seg.decode().unwrap(), 7);
        assert_eq!(seg.decode().unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_share_while_held() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seg = counting(counter.clone()).share();

        let first = seg.decode().unwrap();
        let second = seg.decode().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        drop(first);
        drop(second);
        seg.decode().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
