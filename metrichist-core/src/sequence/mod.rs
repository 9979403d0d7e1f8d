//! Ordered, lazily evaluated sequences
//!
//! An [`ObjectSequence`] is an index range plus an element function. It
//! declares whether its (unreversed) elements are sorted and distinct;
//! reversing, slicing and mapping are O(1) and never touch the elements.

mod normalize;

pub use normalize::MergedCollection;

use std::fmt;
use std::iter::FusedIterator;
use std::sync::Arc;

/// Index-based sequence with declared ordering properties
///
/// `sorted` and `distinct` describe ascending order of the unreversed
/// sequence; a reversed sorted sequence iterates in descending order.
pub struct ObjectSequence<T> {
    begin: usize,
    end: usize,
    reversed: bool,
    get: Arc<dyn Fn(usize) -> T + Send + Sync>,
    sorted: bool,
    distinct: bool,
}

impl<T> Clone for ObjectSequence<T> {
    fn clone(&self) -> Self {
        Self {
            begin: self.begin,
            end: self.end,
            reversed: self.reversed,
            get: Arc::clone(&self.get),
            sorted: self.sorted,
            distinct: self.distinct,
        }
    }
}

impl<T: 'static> ObjectSequence<T> {
    /// Forward sequence of `len` elements produced by `get`
    pub fn from_fn<F>(len: usize, get: F, sorted: bool, distinct: bool) -> Self
    where
        F: Fn(usize) -> T + Send + Sync + 'static,
    {
        Self {
            begin: 0,
            end: len,
            reversed: false,
            get: Arc::new(get),
            sorted,
            distinct,
        }
    }

    /// Sequence over shared, already materialized elements
    pub fn from_shared(values: Arc<Vec<T>>, sorted: bool, distinct: bool) -> Self
    where
        T: Clone + Send + Sync,
    {
        let len = values.len();
        Self::from_fn(len, move |i| values[i].clone(), sorted, distinct)
    }

    /// Sequence over owned elements
    pub fn from_vec(values: Vec<T>, sorted: bool, distinct: bool) -> Self
    where
        T: Clone + Send + Sync,
    {
        Self::from_shared(Arc::new(values), sorted, distinct)
    }

    /// Empty sequence
    pub fn empty() -> Self
    where
        T: Clone + Send + Sync,
    {
        Self::from_vec(Vec::new(), true, true)
    }

    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    fn index(&self, i: usize) -> usize {
        if self.reversed {
            self.end - 1 - i
        } else {
            self.begin + i
        }
    }

    /// Element at position `i` in iteration order
    pub fn get(&self, i: usize) -> Option<T> {
        (i < self.len()).then(|| (self.get)(self.index(i)))
    }

    pub fn first(&self) -> Option<T> {
        self.get(0)
    }

    pub fn last(&self) -> Option<T> {
        self.len().checked_sub(1).and_then(|i| self.get(i))
    }

    /// Same elements in opposite order
    pub fn reverse(&self) -> Self {
        Self {
            reversed: !self.reversed,
            ..self.clone()
        }
    }

    /// Drop the first `n` elements in iteration order
    pub fn skip(&self, n: usize) -> Self {
        let n = n.min(self.len());
        let mut out = self.clone();
        if self.reversed {
            out.end -= n;
        } else {
            out.begin += n;
        }
        out
    }

    /// Keep at most the first `n` elements in iteration order
    pub fn limit(&self, n: usize) -> Self {
        let n = n.min(self.len());
        let mut out = self.clone();
        if self.reversed {
            out.begin = self.end - n;
        } else {
            out.end = self.begin + n;
        }
        out
    }

    /// Apply `f` to every element
    ///
    /// `keeps_sorted` and `keeps_distinct` state whether `f` preserves the
    /// declared properties; they can only be kept, never gained.
    pub fn map<U, F>(&self, f: F, keeps_sorted: bool, keeps_distinct: bool) -> ObjectSequence<U>
    where
        U: 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let get = Arc::clone(&self.get);
        ObjectSequence {
            begin: self.begin,
            end: self.end,
            reversed: self.reversed,
            get: Arc::new(move |i| f(get(i))),
            sorted: self.sorted && keeps_sorted,
            distinct: self.distinct && keeps_distinct,
        }
    }

    pub fn iter(&self) -> SequenceIter<T> {
        SequenceIter {
            seq: self.clone(),
            front: 0,
            back: self.len(),
        }
    }

    /// Materialize in iteration order
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }

    /// Sorted, distinct sequence of the same elements
    ///
    /// Elements are stably sorted by `key`; runs sharing a key are replaced
    /// by `merge` applied to the run, in original iteration order. A
    /// sequence already declared sorted and distinct, and not reversed, is
    /// returned as is.
    pub fn normalize_by<K, KF, MF>(&self, key: KF, merge: MF) -> Self
    where
        T: Clone + Send + Sync,
        K: Ord,
        KF: Fn(&T) -> K,
        MF: Fn(Vec<T>) -> T,
    {
        if self.sorted && self.distinct && !self.reversed {
            return self.clone();
        }

        let mut values = self.to_vec();
        values.sort_by_key(|v| key(v));

        let mut out: Vec<T> = Vec::with_capacity(values.len());
        let mut run: Vec<T> = Vec::new();
        for value in values {
            if let Some(prev) = run.last() {
                if key(prev) != key(&value) {
                    out.push(flush(&mut run, &merge));
                }
            }
            run.push(value);
        }
        if !run.is_empty() {
            out.push(flush(&mut run, &merge));
        }

        Self::from_vec(out, true, true)
    }
}

fn flush<T, MF: Fn(Vec<T>) -> T>(run: &mut Vec<T>, merge: &MF) -> T {
    let mut taken = std::mem::take(run);
    if taken.len() == 1 {
        taken.remove(0)
    } else {
        merge(taken)
    }
}

impl<T: 'static> IntoIterator for &ObjectSequence<T> {
    type Item = T;
    type IntoIter = SequenceIter<T>;

    fn into_iter(self) -> SequenceIter<T> {
        self.iter()
    }
}

impl<T> fmt::Debug for ObjectSequence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectSequence")
            .field("len", &(self.end - self.begin))
            .field("reversed", &self.reversed)
            .field("sorted", &self.sorted)
            .field("distinct", &self.distinct)
            .finish()
    }
}

/// Iterator over an [`ObjectSequence`]
pub struct SequenceIter<T> {
    seq: ObjectSequence<T>,
    front: usize,
    back: usize,
}

impl<T: 'static> Iterator for SequenceIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.front == self.back {
            return None;
        }
        let value = (self.seq.get)(self.seq.index(self.front));
        self.front += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.back - self.front;
        (n, Some(n))
    }
}

impl<T: 'static> DoubleEndedIterator for SequenceIter<T> {
    fn next_back(&mut self) -> Option<T> {
        if self.front == self.back {
            return None;
        }
        self.back -= 1;
        Some((self.seq.get)(self.seq.index(self.back)))
    }
}

impl<T: 'static> ExactSizeIterator for SequenceIter<T> {}

impl<T: 'static> FusedIterator for SequenceIter<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(values: &[i32], sorted: bool) -> ObjectSequence<i32> {
        ObjectSequence::from_vec(values.to_vec(), sorted, sorted)
    }

    #[test]
    fn test_forward_and_reverse() {
        let seq = numbers(&[1, 2, 3, 4], true);
        assert_eq!(seq.to_vec(), vec![1, 2, 3, 4]);

        let rev = seq.reverse();
        assert!(rev.is_reversed());
        assert_eq!(rev.to_vec(), vec![4, 3, 2, 1]);
        assert_eq!(rev.first(), Some(4));
        assert_eq!(rev.last(), Some(1));
        assert_eq!(rev.reverse().to_vec(), seq.to_vec());

        let back: Vec<i32> = seq.iter().rev().collect();
        assert_eq!(back, rev.to_vec());
    }

    #[test]
    fn test_skip_and_limit() {
        let seq = numbers(&[1, 2, 3, 4, 5], true);
        assert_eq!(seq.skip(1).limit(3).to_vec(), vec![2, 3, 4]);
        assert_eq!(seq.reverse().skip(1).limit(2).to_vec(), vec![4, 3]);
        assert_eq!(seq.skip(1).reverse().to_vec(), vec![5, 4, 3, 2]);
        assert!(seq.skip(9).is_empty());
        assert_eq!(seq.limit(9).len(), 5);
        assert_eq!(seq.get(5), None);
    }

    #[test]
    fn test_map_flags() {
        let seq = numbers(&[1, 2, 3], true);
        let doubled = seq.map(|v| v * 2, true, true);
        assert!(doubled.is_sorted() && doubled.is_distinct());
        assert_eq!(doubled.to_vec(), vec![2, 4, 6]);

        let parity = seq.map(|v| v % 2, false, false);
        assert!(!parity.is_sorted() && !parity.is_distinct());

        // Properties are never gained
        let unsorted = numbers(&[3, 1], false).map(|v| v, true, true);
        assert!(!unsorted.is_sorted());
    }

    #[test]
    fn test_exact_size() {
        let seq = numbers(&[1, 2, 3], true);
        let mut iter = seq.iter();
        assert_eq!(iter.len(), 3);
        iter.next();
        iter.next_back();
        assert_eq!(iter.len(), 1);
        assert_eq!(iter.next(), Some(2));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_normalize_sorts_and_merges() {
        let seq = numbers(&[30, 11, 20, 12, 10], false);
        // Key is the tens digit, merge keeps the sum
        let normalized = seq.normalize_by(|v| v / 10, |run| run.iter().sum());
        assert_eq!(normalized.to_vec(), vec![33, 20, 30]);
        assert!(normalized.is_sorted() && normalized.is_distinct());
    }

    #[test]
    fn test_normalize_reversed() {
        let seq = numbers(&[1, 2, 3], true).reverse();
        let normalized = seq.normalize_by(|v| *v, |run| run[0]);
        assert_eq!(normalized.to_vec(), vec![1, 2, 3]);
        assert!(!normalized.is_reversed());
    }

    #[test]
    fn test_normalize_keeps_trusted() {
        // Declared flags are trusted
        let seq = numbers(&[2, 1], true);
        assert_eq!(seq.normalize_by(|v| *v, |run| run[0]).to_vec(), vec![2, 1]);
    }
}
