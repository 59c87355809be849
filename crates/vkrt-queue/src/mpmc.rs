//! Bounded multi-producer/multi-consumer ring buffer (Vyukov's algorithm).
//!
//! https://www.1024cores.net/home/lock-free-algorithms/queues/bounded-mpmc-queue
//!
//! Each cell carries a sequence number initialized to its own index. A
//! producer claims a cell by CAS-ing the enqueue position forward once it
//! observes `seq == pos`, writes the value, then publishes by storing
//! `seq = pos + 1`. A consumer mirrors this with target sequence `pos + 1`,
//! publishing `seq = pos + capacity` once it has taken the value. Memory
//! ordering: acquire loads on `seq` gate every value access; release stores
//! on `seq` publish it; the position fetches that feed the CAS are relaxed.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::error::QueueError;

struct Cell<T> {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Lock-free bounded MPMC queue. `capacity` must be a power of two.
pub struct MpmcQueue<T> {
    buffer: Box<[Cell<T>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}

impl<T> MpmcQueue<T> {
    /// Creates a queue with the given power-of-two capacity.
    ///
    /// # Panics
    /// Panics if `capacity` is zero or not a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be non-zero");
        assert!(
            capacity.is_power_of_two(),
            "capacity must be a power of two, got {capacity}"
        );
        let buffer: Box<[Cell<T>]> = (0..capacity)
            .map(|i| Cell {
                seq: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Self {
            buffer,
            mask: capacity - 1,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Approximate occupancy. Racy under concurrent use; intended for
    /// metrics and the Discard Pool Monitor's threshold policy, not for
    /// correctness decisions.
    pub fn len_hint(&self) -> usize {
        let enq = self.enqueue_pos.load(Ordering::Relaxed);
        let deq = self.dequeue_pos.load(Ordering::Relaxed);
        enq.saturating_sub(deq)
    }

    /// Pushes `value`. On failure (the queue is full), returns `value`
    /// back to the caller rather than dropping it, so retry loops over
    /// non-`Copy` payloads don't lose data.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.seq.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;
            if diff == 0 {
                if self
                    .enqueue_pos
                    .compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    unsafe { (*cell.value.get()).write(value) };
                    cell.seq.store(pos + 1, Ordering::Release);
                    return Ok(());
                }
            } else if diff < 0 {
                return Err(value);
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    pub fn try_pop(&self) -> Result<T, QueueError> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.seq.load(Ordering::Acquire);
            let diff = seq as isize - (pos + 1) as isize;
            if diff == 0 {
                if self
                    .dequeue_pos
                    .compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    let value = unsafe { (*cell.value.get()).assume_init_read() };
                    cell.seq.store(pos + self.buffer.len(), Ordering::Release);
                    return Ok(value);
                }
            } else if diff < 0 {
                return Err(QueueError::Empty);
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }
}

impl<T> Drop for MpmcQueue<T> {
    fn drop(&mut self) {
        // Single-owner here (no concurrent access possible during drop), so
        // plain loads suffice: drain everything still sitting between the
        // dequeue and enqueue cursors.
        let mut pos = *self.dequeue_pos.get_mut();
        let end = *self.enqueue_pos.get_mut();
        while pos != end {
            let cell = &mut self.buffer[pos & self.mask];
            unsafe { cell.value.get_mut().assume_init_drop() };
            pos += 1;
        }
    }
}
