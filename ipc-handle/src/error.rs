//! The closed set of error kinds surfaced by the runtime (spec §7).
//!
//! Every fallible operation in the workspace returns a specific,
//! `thiserror`-derived error type (the way `nx_svc::{ipc, sync}` return
//! `ConnectError`, `WaitSynchronizationError`, and so on); each of those
//! per-operation errors converts into this crate-wide [`ErrorKind`] at a
//! call boundary so callers that don't care about the exact operation can
//! still dispatch on a stable, total set of kinds.

/// A kernel or runtime error, reduced to the closed set of kinds spec.md §7
/// defines. This is the common currency every operation-specific error
/// converts into; it is deliberately coarser than those per-operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// Ill-formed input: bad handle, null required argument.
    #[error("invalid argument")]
    InvalidArgument,
    /// Operation not permitted in the current state (e.g. closed peer).
    #[error("failed precondition")]
    FailedPrecondition,
    /// Non-blocking operation has nothing to do yet.
    #[error("should wait")]
    ShouldWait,
    /// Out of memory, buffer space, or handle-table space.
    #[error("resource exhausted")]
    ResourceExhausted,
    /// Missing right on a handle.
    #[error("permission denied")]
    PermissionDenied,
    /// A wait timed out.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// A handle was closed during a wait.
    #[error("cancelled")]
    Cancelled,
    /// The reactor is being destroyed.
    #[error("aborted")]
    Aborted,
    /// Duplicate cookie in a wait-set `add`.
    #[error("already exists")]
    AlreadyExists,
    /// Cookie absent on a wait-set `remove`.
    #[error("not found")]
    NotFound,
    /// Concurrent inspection not permitted.
    #[error("busy")]
    Busy,
    /// Flag or feature not yet supported.
    #[error("unimplemented")]
    Unimplemented,
    /// The kernel returned a status outside the mapping.
    #[error("unknown kernel error")]
    Unknown,
}
