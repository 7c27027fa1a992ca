// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity ring of admitted records.
//!
//! ```text
//!   push ──> Sampler ──(rejected)──> counted, dropped
//!               │
//!            (admitted)
//!               v
//!   ┌───┬───┬───┬───┐
//!   │ B │ C │ D │ A │   full ring: writing at tail overwrites head (oldest)
//!   └───┴───┴───┴───┘
//! ```
//!
//! Neither sampling nor eviction is an error: `push` reports what happened
//! through [`Admission`] and never fails.

use std::sync::{Arc, Mutex, PoisonError};

use crate::record::LogRecord;
use crate::sampling::Sampler;

/// Ring buffer shared between producers and the scheduler.
pub type SharedBuffer = Arc<Mutex<SamplingBuffer>>;

/// Outcome of a single `push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Stored,
    /// Stored, and the oldest record was overwritten to make room.
    StoredWithEviction,
    /// Rejected by the sampler.
    Sampled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferStats {
    pub accepted: u64,
    pub rejected: u64,
    pub evicted: u64,
    pub len: usize,
    pub capacity: usize,
}

#[derive(Debug)]
pub struct SamplingBuffer {
    slots: Vec<Option<LogRecord>>,
    head: usize,
    tail: usize,
    len: usize,
    sampler: Sampler,
    evicted: u64,
}

impl SamplingBuffer {
    /// Creates a ring holding at most `capacity` records (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_sampler(capacity, Sampler::new())
    }

    #[must_use]
    pub fn with_seed(capacity: usize, seed: u64) -> Self {
        Self::with_sampler(capacity, Sampler::with_seed(seed))
    }

    #[must_use]
    pub fn with_sampler(capacity: usize, sampler: Sampler) -> Self {
        let capacity = capacity.max(1);
        SamplingBuffer {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            tail: 0,
            len: 0,
            sampler,
            evicted: 0,
        }
    }

    #[must_use]
    pub fn shared(self) -> SharedBuffer {
        Arc::new(Mutex::new(self))
    }

    pub fn push(&mut self, record: LogRecord) -> Admission {
        if !self.sampler.admit(&record) {
            return Admission::Sampled;
        }

        let capacity = self.capacity();
        self.slots[self.tail] = Some(record);
        self.tail = (self.tail + 1) % capacity;

        if self.len == capacity {
            self.head = (self.head + 1) % capacity;
            self.evicted += 1;
            Admission::StoredWithEviction
        } else {
            self.len += 1;
            Admission::Stored
        }
    }

    /// Removes and returns every held record, oldest first.
    pub fn drain(&mut self) -> Vec<LogRecord> {
        let capacity = self.capacity();
        let mut records = Vec::with_capacity(self.len);
        for offset in 0..self.len {
            if let Some(record) = self.slots[(self.head + offset) % capacity].take() {
                records.push(record);
            }
        }
        self.head = 0;
        self.tail = 0;
        self.len = 0;
        records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            accepted: self.sampler.accepted(),
            rejected: self.sampler.rejected(),
            evicted: self.evicted,
            len: self.len,
            capacity: self.capacity(),
        }
    }
}

/// Runs `f` with the buffer locked, recovering a poisoned lock.
pub fn with_buffer<T>(buffer: &SharedBuffer, f: impl FnOnce(&mut SamplingBuffer) -> T) -> T {
    let mut guard = buffer.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogLevel;
    use proptest::prelude::*;

    // Error records are always admitted by the default table
    fn kept(message: &str) -> LogRecord {
        LogRecord::new(LogLevel::Error, message)
    }

    fn messages(records: &[LogRecord]) -> Vec<&str> {
        records.iter().map(|r| r.message.as_str()).collect()
    }

    #[test]
    fn test_push_and_drain_fifo() {
        let mut buffer = SamplingBuffer::with_seed(4, 1);
        assert_eq!(buffer.push(kept("a")), Admission::Stored);
        assert_eq!(buffer.push(kept("b")), Admission::Stored);
        assert_eq!(buffer.len(), 2);

        let drained = buffer.drain();
        assert_eq!(messages(&drained), vec!["a", "b"]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 4);
    }

    #[test]
    fn test_full_ring_overwrites_oldest() {
        let mut buffer = SamplingBuffer::with_seed(3, 1);
        for m in ["A", "B", "C"] {
            assert_eq!(buffer.push(kept(m)), Admission::Stored);
        }
        assert_eq!(buffer.push(kept("D")), Admission::StoredWithEviction);
        assert_eq!(buffer.len(), 3);
        assert_eq!(messages(&buffer.drain()), vec!["B", "C", "D"]);
        assert_eq!(buffer.stats().evicted, 1);
    }

    #[test]
    fn test_drain_is_restartable() {
        let mut buffer = SamplingBuffer::with_seed(2, 1);
        buffer.push(kept("a"));
        buffer.push(kept("b"));
        buffer.push(kept("c"));
        assert_eq!(messages(&buffer.drain()), vec!["b", "c"]);
        assert!(buffer.drain().is_empty());

        buffer.push(kept("d"));
        assert_eq!(messages(&buffer.drain()), vec!["d"]);
    }

    #[test]
    fn test_sampled_records_do_not_occupy_slots() {
        let mut buffer = SamplingBuffer::with_seed(2, 1);
        let dropped = LogRecord::new(LogLevel::Debug, "noise").with_sampling_policy(
            crate::sampling::SamplingPolicy::from_rates([(LogLevel::Debug, 0.0)]),
        );
        assert_eq!(buffer.push(dropped), Admission::Sampled);
        assert!(buffer.is_empty());

        let stats = buffer.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.accepted, 0);
        assert_eq!(stats.capacity, 2);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut buffer = SamplingBuffer::with_seed(0, 1);
        assert_eq!(buffer.capacity(), 1);
        buffer.push(kept("a"));
        assert_eq!(buffer.push(kept("b")), Admission::StoredWithEviction);
        assert_eq!(messages(&buffer.drain()), vec!["b"]);
    }

    #[test]
    fn test_shared_buffer_access() {
        let shared = SamplingBuffer::with_seed(8, 1).shared();
        with_buffer(&shared, |b| b.push(kept("a")));
        assert_eq!(with_buffer(&shared, |b| b.len()), 1);
    }

    proptest! {
        #[test]
        fn occupancy_never_exceeds_capacity(
            capacity in 1usize..32,
            ops in proptest::collection::vec(any::<bool>(), 0..200),
        ) {
            let mut buffer = SamplingBuffer::with_seed(capacity, 9);
            let mut expected = Vec::new();
            for (i, is_push) in ops.into_iter().enumerate() {
                if is_push {
                    buffer.push(kept(&i.to_string()));
                    expected.push(i.to_string());
                    if expected.len() > capacity {
                        expected.remove(0);
                    }
                } else {
                    let drained = buffer.drain();
                    let got: Vec<String> = drained.into_iter().map(|r| r.message).collect();
                    prop_assert_eq!(&got, &expected);
                    expected.clear();
                }
                prop_assert!(buffer.len() <= buffer.capacity());
                prop_assert_eq!(buffer.len(), expected.len());
            }
        }
    }
}
