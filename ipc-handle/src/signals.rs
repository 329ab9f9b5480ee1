//! Handle signals: named boolean states a wait can ask for (GLOSSARY "Signal").

use bitflags::bitflags;

bitflags! {
    /// A set of named boolean states of a handle that [`wait`](crate::handle::wait)
    /// and the wait-set primitive can request or report.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Signals: u32 {
        /// The object has data available to read.
        const READABLE = 1 << 0;
        /// The object can currently accept a write.
        const WRITABLE = 1 << 1;
        /// The peer endpoint has been closed.
        const PEER_CLOSED = 1 << 2;
    }
}

/// The kernel's verdict on a single entry after a wait completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// One or more of the requested signals is satisfied.
    Satisfied(Signals),
    /// The requested signals can never become satisfied (e.g. peer closed
    /// while waiting for `READABLE` with no buffered data left).
    FailedPrecondition,
    /// The handle was cancelled (closed) while the wait was outstanding.
    Cancelled,
}
