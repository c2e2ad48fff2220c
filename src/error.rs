//! Error types for the IPC runtime.

use thiserror::Error;

/// Errors raised by the runtime. All are fatal and non-resumable: the
/// dispatch loop never retries, it only ever unwinds.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Unknown message type, unknown type marker, unknown cached type id,
    /// unknown function id, a fresh type id that fails descriptor parsing,
    /// or any other violation of the wire protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// More than 127 borrowed references were active at once in a single
    /// outbound call.
    #[error("borrow stack overflow")]
    BorrowStackOverflow,

    /// `fill_next_reserved` was called with no active reservation scope, or
    /// the active scope was already full.
    #[error("reservation scope exhausted")]
    ReservationScopeExhausted,

    /// A value encoded as `Result` was neither ok-shaped nor err-shaped.
    #[error("invalid result variant")]
    InvalidResultVariant,

    /// Bytes remained in the decoder after an operation consumed everything
    /// it expected to consume.
    #[error("leftover bytes after decode")]
    LeftoverBytes,

    /// The message handler re-entered itself more times than
    /// `RuntimeConfig::max_reentry_depth` allows.
    #[error("re-entrant dispatch depth exceeded")]
    ReentryDepthExceeded,
}

/// Convenience alias used throughout the crate.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
