//! Lock-free bounded queues used throughout the runtime: an MPMC ring for
//! the scheduler's priority tiers and the event bus, and an SPSC ring for
//! returning recycled command pools to their owning thread.

mod error;
mod mpmc;
mod spsc;

pub use error::QueueError;
pub use mpmc::MpmcQueue;
pub use spsc::SpscQueue;
