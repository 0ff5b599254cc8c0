//! MinorStepLog (spec §4.7): a bounded, real-time-safe record of per-major-step convergence
//! history, plus an atomic snapshot handshake for an external consumer.
//!
//! The handshake is ported from `GunnsMinorStepLogDumper`'s `mLocked` flag
//! (`examples/original_source/core/GunnsMinorStepLogDumper.cpp`): the producer flips `locked`
//! for the duration of each write, the consumer refuses to pop while `locked` is set and simply
//! retries on its next tick. Rust has no data race to paper over a C++ raw pointer would have
//! here, so the flag gates a `Mutex`-protected ring rather than an unguarded queue — the
//! consumer still never blocks and never observes a torn record.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// A bit-per-index set, rounded up to a 64-bit word boundary (spec §4.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(64)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set(&mut self, index: usize) {
        if index < self.len {
            self.words[index / 64] |= 1u64 << (index % 64);
        }
    }

    pub fn get(&self, index: usize) -> bool {
        index < self.len && (self.words[index / 64] >> (index % 64)) & 1 != 0
    }

    pub fn any(&self) -> bool {
        self.words.iter().any(|w| *w != 0)
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }
}

/// Terminal outcome of one major step's minor-step loop (spec §3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    Success,
    MinorLimit,
    DecompLimit,
    Cancelled,
}

/// The convergence bitsets recorded for one minor step (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinorStepRecord {
    pub node_non_convergence: BitSet,
    pub link_rejection: BitSet,
}

/// One major step's full convergence history (spec §3 `MinorStepLog`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MajorStepRecord {
    pub major_step_index: u64,
    pub minor_step_count: u32,
    pub outcome: StepOutcome,
    pub minor_steps: Vec<MinorStepRecord>,
}

/// Fixed-capacity ring plus the producer/consumer handshake. `record` is called once per major
/// step from the Solver's own thread; `try_consume` may be called from a different thread.
pub struct MinorStepLog {
    capacity: usize,
    locked: AtomicBool,
    ring: Mutex<VecDeque<MajorStepRecord>>,
}

impl MinorStepLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            locked: AtomicBool::new(false),
            ring: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a record, evicting the oldest if the ring is at capacity.
    pub fn record(&self, record: MajorStepRecord) {
        self.locked.store(true, Ordering::Release);
        {
            let mut ring = self.ring.lock().expect("minor step log ring poisoned");
            if ring.len() >= self.capacity {
                ring.pop_front();
            }
            ring.push_back(record);
        }
        self.locked.store(false, Ordering::Release);
    }

    /// Pops the oldest unread record, or `None` if the producer is mid-write (retry next tick)
    /// or the ring is empty.
    pub fn try_consume(&self) -> Option<MajorStepRecord> {
        if self.locked.load(Ordering::Acquire) {
            return None;
        }
        self.ring.lock().expect("minor step log ring poisoned").pop_front()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().expect("minor step log ring poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(major_step_index: u64, outcome: StepOutcome) -> MajorStepRecord {
        MajorStepRecord {
            major_step_index,
            minor_step_count: 1,
            outcome,
            minor_steps: vec![MinorStepRecord {
                node_non_convergence: BitSet::new(4),
                link_rejection: BitSet::new(2),
            }],
        }
    }

    #[test]
    fn bitset_set_and_get_round_trips() {
        let mut bits = BitSet::new(70);
        bits.set(5);
        bits.set(69);
        assert!(bits.get(5));
        assert!(bits.get(69));
        assert!(!bits.get(6));
        assert!(bits.any());
    }

    #[test]
    fn out_of_range_set_is_ignored() {
        let mut bits = BitSet::new(4);
        bits.set(100);
        assert!(!bits.any());
    }

    #[test]
    fn record_and_consume_preserve_order() {
        let log = MinorStepLog::new(4);
        log.record(sample(0, StepOutcome::Success));
        log.record(sample(1, StepOutcome::Success));
        let first = log.try_consume().unwrap();
        let second = log.try_consume().unwrap();
        assert_eq!(first.major_step_index, 0);
        assert_eq!(second.major_step_index, 1);
        assert!(log.try_consume().is_none());
    }

    #[test]
    fn ring_evicts_oldest_beyond_capacity() {
        let log = MinorStepLog::new(2);
        log.record(sample(0, StepOutcome::Success));
        log.record(sample(1, StepOutcome::Success));
        log.record(sample(2, StepOutcome::Success));
        assert_eq!(log.len(), 2);
        let first = log.try_consume().unwrap();
        assert_eq!(first.major_step_index, 1);
    }

    #[test]
    fn consume_is_none_while_locked() {
        let log = MinorStepLog::new(4);
        log.record(sample(0, StepOutcome::Success));
        log.locked.store(true, Ordering::Release);
        assert!(log.try_consume().is_none());
        log.locked.store(false, Ordering::Release);
        assert!(log.try_consume().is_some());
    }
}
