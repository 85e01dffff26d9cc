//! A [`PartitionGenerator`] over an owned `Vec<T>`, the common case of
//! partitioning a single in-memory collection by chunk.
//!
//! Mirrors the Python `by_chunk` partitioning helper, which hands out
//! consecutive slices of a sequence argument; here it is specialized to
//! `Vec<T>` so the engine gets back owned `Vec<T>` chunks it can move onto
//! a worker thread without borrowing from the original collection.

use super::PartitionGenerator;
use std::collections::VecDeque;

/// Partitions an owned `Vec<T>` into consecutive, non-overlapping `Vec<T>`
/// chunks.
///
/// Items are drained from the front as chunks are requested; once
/// exhausted, [`PartitionGenerator::next_chunk`] returns `None`.
pub struct SlicePartitioner<T> {
    remaining: VecDeque<T>,
    total_len: usize,
}

impl<T> SlicePartitioner<T> {
    pub fn new(items: Vec<T>) -> Self {
        let total_len = items.len();
        SlicePartitioner {
            remaining: VecDeque::from(items),
            total_len,
        }
    }
}

impl<T> PartitionGenerator<Vec<T>> for SlicePartitioner<T> {
    fn total_len(&self) -> Option<usize> {
        Some(self.total_len)
    }

    fn next_chunk(&mut self, size: usize) -> Option<Vec<T>> {
        if self.remaining.is_empty() {
            return None;
        }
        let take = size.min(self.remaining.len());
        let chunk: Vec<T> = self.remaining.drain(..take).collect();
        Some(chunk)
    }
}

/// Partitions a pair of owned `Vec`s in lockstep, for functions that take
/// two argument sequences of equal length (the common "zip" case).
///
/// Grounds on the Python per-argument splitter applying the same
/// partition size across independently-iterated arguments, deferring
/// length agreement checks to [`crate::split`].
pub struct ZippedSlicePartitioner<A, B> {
    a: SlicePartitioner<A>,
    b: SlicePartitioner<B>,
}

impl<A, B> ZippedSlicePartitioner<A, B> {
    pub fn new(a: Vec<A>, b: Vec<B>) -> Self {
        ZippedSlicePartitioner {
            a: SlicePartitioner::new(a),
            b: SlicePartitioner::new(b),
        }
    }
}

impl<A, B> PartitionGenerator<(Vec<A>, Vec<B>)> for ZippedSlicePartitioner<A, B> {
    fn total_len(&self) -> Option<usize> {
        match (self.a.total_len(), self.b.total_len()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            _ => None,
        }
    }

    fn next_chunk(&mut self, size: usize) -> Option<(Vec<A>, Vec<B>)> {
        match (self.a.next_chunk(size), self.b.next_chunk(size)) {
            (Some(a), Some(b)) => Some((a, b)),
            (None, None) => None,
            // One generator ran out before the other: the caller (via
            // crate::split) is responsible for detecting and reporting
            // this as a SplitError::PartitionMismatch; here we simply
            // surface whatever partial data remains.
            (a, b) => {
                let a = a.unwrap_or_default();
                let b = b.unwrap_or_default();
                if a.is_empty() && b.is_empty() {
                    None
                } else {
                    Some((a, b))
                }
            }
        }
    }
}
