//! Ordered `(timeline_value, payload)` buckets used by the Discard Pool (C6)
//! to stage deferred destructions keyed by a monotonically increasing GPU
//! timeline value.

use std::collections::VecDeque;

/// An ordered sequence of `(u64 value, T payload)` pairs.
///
/// `append` always goes to the tail; because values are read from a
/// monotonically increasing semaphore counter in normal operation, the
/// bucket stays sorted in practice and `drop_ready` only needs to look at a
/// front prefix.
pub struct TimelineBucket<T> {
    entries: VecDeque<(u64, T)>,
}

impl<T> Default for TimelineBucket<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimelineBucket<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub fn append(&mut self, value: u64, payload: T) {
        self.entries.push_back((value, payload));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrites every pending entry's timeline value to `new_value`. Used
    /// to hand a failed frame's staged discards over to the next frame's
    /// timeline (spec.md §4.6 "Cross-frame merge").
    pub fn retag(&mut self, new_value: u64) {
        for (value, _) in self.entries.iter_mut() {
            *value = new_value;
        }
    }

    /// Removes every front-prefix entry with `value <= now`, invoking
    /// `deleter` on each payload. Stops at the first entry whose value
    /// exceeds `now` (entries are expected to be non-decreasing from the
    /// front in normal operation).
    pub fn drop_ready(&mut self, now: u64, mut deleter: impl FnMut(T)) {
        while let Some((value, _)) = self.entries.front() {
            if *value > now {
                break;
            }
            let (_, payload) = self.entries.pop_front().unwrap();
            deleter(payload);
        }
    }

    /// Moves every entry out of `self`, appending it to `other`. Does not
    /// retag; callers that need the cross-frame merge semantics of
    /// spec.md §4.6 should `retag` before or after draining.
    pub fn drain_into(&mut self, other: &mut TimelineBucket<T>) {
        other.entries.extend(self.entries.drain(..));
    }
}
