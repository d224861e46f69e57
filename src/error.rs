//! Reclaim engine error types
//!
//! Lock contention is deliberately not represented here: every entry point
//! degrades to a "nothing done" result (`0`, [`ScanOutcome::Stop`], an
//! acknowledgment with a zero contribution) instead of failing. The only
//! recoverable error is resource exhaustion while installing registrations.
//!
//! [`ScanOutcome::Stop`]: crate::shrinker::ScanOutcome::Stop

/// Reclaim engine error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReclaimError {
    /// A registration table had no free slot left
    #[error("out of resources: cannot register {what}")]
    OutOfResources {
        /// What failed to register
        what: &'static str,
    },
    /// Rejected tunable values
    #[error("invalid reclaim config: {message}")]
    InvalidConfig {
        /// Which constraint was violated
        message: String,
    },
}

/// Result alias for reclaim operations
pub type ReclaimResult<T> = Result<T, ReclaimError>;
