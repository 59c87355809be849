use thiserror::Error;

/// Pop-side error (spec.md §7: "Queue-empty"). Push failures instead
/// return the rejected value directly — see `MpmcQueue::try_push` and
/// `SpscQueue::try_push` — so a caller retrying a non-`Copy` payload (e.g.
/// an `Arc<Job>`) doesn't lose it.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is empty")]
    Empty,
}
