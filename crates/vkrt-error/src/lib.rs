//! Error types shared across the `vkrt-*` crates. Recoverable conditions
//! (a full queue, a not-yet-ready job) are modeled per-crate with their own
//! `thiserror` enums; [`FatalError`] is reserved for the handful of
//! programming-error conditions the spec calls out as "log, then abort"
//! rather than something a caller can meaningfully recover from.

/// A condition that indicates a broken invariant rather than ordinary
/// backpressure. Callers that observe one of these are expected to log it
/// and terminate the process — see `Scheduler::shutdown`'s sentinel push
/// and the Discard Pool's device-lost handling.
#[derive(thiserror::Error, Debug)]
pub enum FatalError {
    #[error("shutdown sentinel could not be pushed after {attempts} attempts")]
    SentinelPushFailed { attempts: usize },

    #[error("failed to create the discard pool's timeline semaphore")]
    SemaphoreCreateFailed,

    #[error("failed to create a command pool for queue family {queue_family}")]
    CommandPoolCreateFailed { queue_family: u32 },

    #[error("device-lost recreation failed: {reason}")]
    DeviceLostRecreationFailed { reason: String },
}

/// Logs `err` at error level and aborts the process. Centralizes the
/// "fatal conditions are logged then aborted" handling spec.md calls for
/// in several components so every call site reads the same way.
pub fn abort_on_fatal(err: FatalError) -> ! {
    log::error!("fatal error, aborting: {err}");
    std::process::abort()
}
