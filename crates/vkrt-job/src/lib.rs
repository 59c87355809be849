//! A `Job` is a unit of work carrying a priority, a dependency counter and
//! a continuation list. Grounded on `src/core/public/fiber/jobs.h` and
//! `src/core/private/fiber/jobs.cpp` of the original C++ engine: a job is
//! *ready* iff its remaining-dependency count is zero, and `reset` is the
//! only way to recycle a `Job` for a later submission.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use parking_lot::RwLock;

/// Strict dispatch priority. Lower ordinal drains first (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    High = 0,
    Medium = 1,
    Low = 2,
}

impl Priority {
    pub const COUNT: usize = 3;

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Opaque user-data pointer carried by a [`JobBody::Raw`] callable. The
/// caller is responsible for the pointee's lifetime, mirroring the C++
/// `void* data` field.
#[derive(Clone, Copy)]
pub struct JobData(pub *mut ());

unsafe impl Send for JobData {}

/// Raw C-style job callable: `fn(data, name, thread_index, fiber_index)`.
pub type RawJobFn = unsafe fn(data: *mut (), name: &str, thread_index: u32, fiber_index: u32);

enum JobBody {
    Empty,
    Raw(RawJobFn, JobData),
    Boxed(Box<dyn FnMut(&str, u32, u32) + Send>),
}

struct JobInner {
    body: JobBody,
    priority: Priority,
    name: Option<String>,
}

/// A unit of scheduled work. Submitted to a scheduler only once its
/// `remaining_deps` counter is zero; mutated afterwards only by the
/// executing fiber (to mark completion) and by predecessor jobs completing
/// (to decrement the counter).
pub struct Job {
    inner: Mutex<JobInner>,
    continuations: RwLock<Vec<Arc<Job>>>,
    remaining_deps: AtomicI32,
    done: AtomicBool,
    done_lock: Mutex<()>,
    done_cv: Condvar,
}

impl Job {
    pub fn new() -> Arc<Job> {
        Arc::new(Job {
            inner: Mutex::new(JobInner {
                body: JobBody::Empty,
                priority: Priority::Medium,
                name: None,
            }),
            continuations: RwLock::new(Vec::with_capacity(16)),
            remaining_deps: AtomicI32::new(0),
            done: AtomicBool::new(false),
            done_lock: Mutex::new(()),
            done_cv: Condvar::new(),
        })
    }

    /// Returns the job to a fresh state: continuations cleared, dependency
    /// counter reset to zero. Any thread currently blocked in
    /// [`Job::wait_blocking`] is released (observing `done = true`) before
    /// the flag is flipped back to `false` for the new use. Calling this
    /// while another thread is concurrently waiting on the *previous* use
    /// is a programming error the caller must avoid; this method does not
    /// protect against spurious wakeups from an intervening third use.
    pub fn reset(&self) {
        {
            let mut conts = self.continuations.write();
            conts.clear();
        }
        {
            let _guard = self.done_lock.lock().unwrap();
            self.done.store(true, Ordering::Release);
            self.done_cv.notify_all();
            self.done.store(false, Ordering::Relaxed);
            self.remaining_deps.store(0, Ordering::Relaxed);
        }
    }

    pub fn configure_raw(
        self: &Arc<Job>,
        f: RawJobFn,
        data: JobData,
        priority: Priority,
        name: impl Into<Option<String>>,
    ) {
        self.reset();
        let mut inner = self.inner.lock().unwrap();
        inner.body = JobBody::Raw(f, data);
        inner.priority = priority;
        inner.name = name.into();
    }

    pub fn configure_boxed(
        self: &Arc<Job>,
        body: impl FnMut(&str, u32, u32) + Send + 'static,
        priority: Priority,
        name: impl Into<Option<String>>,
    ) {
        self.reset();
        let mut inner = self.inner.lock().unwrap();
        inner.body = JobBody::Boxed(Box::new(body));
        inner.priority = priority;
        inner.name = name.into();
    }

    /// Registers `self` as a continuation of `predecessor`: appends `self`
    /// under `predecessor`'s continuation write-lock, then atomically
    /// increments `self`'s dependency count. The append-then-increment
    /// ordering, serialized against `predecessor`'s completion snapshot by
    /// the same lock, guarantees the increment is visible before
    /// `predecessor` can possibly decrement it (spec.md §4.4).
    pub fn add_dependency(self: &Arc<Job>, predecessor: &Arc<Job>) {
        {
            let mut conts = predecessor.continuations.write();
            conts.push(Arc::clone(self));
        }
        self.remaining_deps.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_ready(&self) -> bool {
        self.remaining_deps.load(Ordering::Acquire) == 0
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn priority(&self) -> Priority {
        self.inner.lock().unwrap().priority
    }

    pub fn name(&self) -> String {
        self.inner
            .lock()
            .unwrap()
            .name
            .clone()
            .unwrap_or_default()
    }

    /// Runs the job's callable. Intended to be called by the scheduler's
    /// fiber loop exactly once per ready dispatch.
    pub fn execute(&self, thread_index: u32, fiber_index: u32) {
        let mut inner = self.inner.lock().unwrap();
        let name = inner.name.clone().unwrap_or_default();
        match &mut inner.body {
            JobBody::Empty => {}
            JobBody::Raw(f, data) => unsafe { f(data.0, &name, thread_index, fiber_index) },
            JobBody::Boxed(body) => body(&name, thread_index, fiber_index),
        }
    }

    /// Marks the job complete and wakes any non-fiber waiters blocked in
    /// [`Job::wait_blocking`].
    pub fn mark_complete(&self) {
        let _guard = self.done_lock.lock().unwrap();
        self.done.store(true, Ordering::Release);
        self.done_cv.notify_all();
    }

    /// Snapshot of the continuation list taken under a reader lock, as
    /// done by the fiber loop right after completion (spec.md §4.5 step 5).
    pub fn continuations_snapshot(&self) -> Vec<Arc<Job>> {
        self.continuations.read().clone()
    }

    /// Decrements the dependency counter; returns `true` if this
    /// transitioned the counter from 1 to 0 (the job just became ready).
    pub fn decrement_dependency(&self) -> bool {
        self.remaining_deps.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Blocks the calling (non-fiber) thread on the job's condvar until
    /// completion. Fiber callers must instead poll [`Job::is_done`] in a
    /// yield loop — see `vkrt-scheduler`.
    pub fn wait_blocking(&self) {
        if self.is_done() {
            return;
        }
        let guard = self.done_lock.lock().unwrap();
        let _guard = self
            .done_cv
            .wait_while(guard, |_| !self.done.load(Ordering::Acquire))
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn fresh_job_has_no_dependencies_and_is_not_done() {
        let job = Job::new();
        assert!(job.is_ready());
        assert!(!job.is_done());
    }

    #[test]
    fn add_dependency_increments_before_predecessor_can_decrement() {
        let pred = Job::new();
        let dep = Job::new();
        dep.add_dependency(&pred);
        assert!(!dep.is_ready());
        assert_eq!(pred.continuations_snapshot().len(), 1);

        let became_ready = dep.decrement_dependency();
        assert!(became_ready);
        assert!(dep.is_ready());
    }

    #[test]
    fn reset_clears_continuations_and_dependency_state() {
        let pred = Job::new();
        let dep = Job::new();
        dep.add_dependency(&pred);
        dep.mark_complete();
        assert!(dep.is_done());

        dep.reset();
        assert!(dep.is_ready());
        assert!(!dep.is_done());
    }

    #[test]
    fn execute_invokes_boxed_body_with_indices() {
        let job = Job::new();
        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = Arc::clone(&seen);
        job.configure_boxed(
            move |_name, thread_index, fiber_index| {
                seen2.store(thread_index * 100 + fiber_index, Ordering::SeqCst);
            },
            Priority::High,
            "test-job".to_string(),
        );
        job.execute(3, 7);
        assert_eq!(seen.load(Ordering::SeqCst), 307);
        assert_eq!(job.name(), "test-job");
        assert_eq!(job.priority(), Priority::High);
    }

    #[test]
    fn fan_in_dependency_chain_becomes_ready_only_after_all_predecessors() {
        // Mirrors scenario S2: A, B, C all predecessors of D.
        let a = Job::new();
        let b = Job::new();
        let c = Job::new();
        let d = Job::new();
        d.add_dependency(&a);
        d.add_dependency(&b);
        d.add_dependency(&c);
        assert!(!d.is_ready());

        // Simulate A, B, C completing one at a time; D must not become
        // ready until the last decrement.
        assert!(!d.decrement_dependency());
        assert!(!d.is_ready());
        assert!(!d.decrement_dependency());
        assert!(!d.is_ready());
        assert!(d.decrement_dependency());
        assert!(d.is_ready());
    }
}
