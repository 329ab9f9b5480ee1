//! The opaque kernel handle and its move-only scoped wrapper (spec §4.1).

use crate::{
    error::ErrorKind,
    kernel::KernelOps,
    rights::Rights,
    signals::{Signals, WaitOutcome},
    time::Deadline,
};

/// Sentinel raw value meaning "no handle" on the wire (spec §3, §4.3.6) and
/// in memory.
pub const INVALID_HANDLE: u32 = u32::MAX;

/// An opaque, kernel-issued capability.
///
/// `Handle` is `Copy`: copying the Rust value does not duplicate the
/// underlying kernel object (only [`duplicate`](Handle::duplicate) does
/// that) — plain field-for-field ownership tracking is the caller's job,
/// or use [`ScopedHandle`] to have the compiler do it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Handle(u32);

impl Handle {
    /// The distinguished invalid handle.
    pub const INVALID: Handle = Handle(INVALID_HANDLE);

    /// Wraps a raw kernel-issued identifier.
    ///
    /// # Safety
    ///
    /// The caller must guarantee `raw` was actually issued by the kernel (or
    /// is [`INVALID_HANDLE`]) and that the caller is entitled to use it.
    pub const unsafe fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw identifier, for handing to [`KernelOps`] or the wire codec.
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    /// `true` unless this is [`Handle::INVALID`].
    pub const fn is_valid(self) -> bool {
        self.0 != INVALID_HANDLE
    }

    /// Closes the handle. Idempotent only in the sense that closing an
    /// already-invalid handle reports [`ErrorKind::InvalidArgument`] rather
    /// than aborting; see [`ScopedHandle`] for idempotent-from-the-caller's
    /// perspective closing.
    pub fn close(self, kernel: &dyn KernelOps) -> Result<(), ErrorKind> {
        kernel.handle_close(self)
    }

    /// Returns the rights currently held on this handle.
    pub fn rights(self, kernel: &dyn KernelOps) -> Result<Rights, ErrorKind> {
        kernel.handle_get_rights(self)
    }

    /// Duplicates this handle. The duplicate's rights equal the source's.
    /// Requires [`Rights::DUPLICATE`].
    pub fn duplicate(self, kernel: &dyn KernelOps) -> Result<Handle, ErrorKind> {
        kernel.handle_duplicate(self, None)
    }

    /// Duplicates this handle with `to_remove` stripped from the result's
    /// rights. Requires [`Rights::DUPLICATE`] on the source.
    pub fn duplicate_with_reduced_rights(
        self,
        to_remove: Rights,
        kernel: &dyn KernelOps,
    ) -> Result<Handle, ErrorKind> {
        kernel.handle_duplicate(self, Some(to_remove))
    }

    /// Consumes `self`, returning a new handle with `to_remove` stripped
    /// from its rights and closing the original. On failure the original
    /// handle remains valid and is returned unchanged as the error payload.
    pub fn replace_with_reduced_rights(
        self,
        to_remove: Rights,
        kernel: &dyn KernelOps,
    ) -> Result<Handle, (Handle, ErrorKind)> {
        match kernel.handle_duplicate(self, Some(to_remove)) {
            Ok(replacement) => {
                // Best-effort: the replacement has already been minted: a
                // failure to close the original must not be reported as a
                // failure of the replace as a whole, matching spec.md's
                // "on failure the original remains valid" — by the time we
                // get here we have already succeeded.
                let _ = kernel.handle_close(self);
                Ok(replacement)
            }
            Err(kind) => Err((self, kind)),
        }
    }

    /// Blocks up to `deadline` until one of `signals` is satisfied on this
    /// handle.
    pub fn wait(
        self,
        signals: Signals,
        deadline: Deadline,
        kernel: &dyn KernelOps,
    ) -> Result<WaitOutcome, ErrorKind> {
        kernel.handle_wait_one(self, signals, deadline)
    }
}

/// Blocks up to `deadline` until one of the handles in `handles` satisfies
/// the corresponding entry in `signals` (same length, paired by index).
/// Returns the index of the first handle to become ready alongside the
/// outcome observed for every handle, so a caller who gets
/// [`ErrorKind::DeadlineExceeded`] can still inspect which, if any, were
/// satisfiable.
///
/// This is the multi-handle generalization of [`Handle::wait`]; it has no
/// natural single-`self` receiver, so it is a free function rather than an
/// inherent method.
pub fn wait_many(
    handles: &[Handle],
    signals: &[Signals],
    deadline: Deadline,
    kernel: &dyn KernelOps,
) -> Result<(usize, alloc::vec::Vec<WaitOutcome>), ErrorKind> {
    kernel.handle_wait_many(handles, signals, deadline)
}

impl core::fmt::Display for Handle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_valid() {
            write!(f, "Handle({:#x})", self.0)
        } else {
            write!(f, "Handle(invalid)")
        }
    }
}

/// Implemented by types that wrap a [`Handle`] and can therefore be waited
/// on, either individually or as part of a [wait set](https://docs.rs/ipc-waitset).
pub trait Waitable {
    /// The underlying kernel handle.
    fn raw_handle(&self) -> Handle;
}

impl Waitable for Handle {
    fn raw_handle(&self) -> Handle {
        *self
    }
}

/// A move-only owner of at most one [`Handle`].
///
/// Dropping a `ScopedHandle` closes the handle unless [`release`](Self::release)
/// was called first. This is the idempotent-from-the-user's-side close spec.md
/// §4.1 describes: the user only ever sees one logical close per scope.
pub struct ScopedHandle<'k> {
    handle: Handle,
    kernel: &'k dyn KernelOps,
}

impl<'k> ScopedHandle<'k> {
    /// Takes ownership of `handle`, to be closed via `kernel` on drop.
    pub fn new(handle: Handle, kernel: &'k dyn KernelOps) -> Self {
        Self { handle, kernel }
    }

    /// The wrapped handle, without giving up ownership.
    pub fn get(&self) -> Handle {
        self.handle
    }

    /// Gives up ownership: the returned [`Handle`] will *not* be closed by
    /// this wrapper.
    pub fn release(self) -> Handle {
        let handle = self.handle;
        core::mem::forget(self);
        handle
    }
}

impl Waitable for ScopedHandle<'_> {
    fn raw_handle(&self) -> Handle {
        self.handle
    }
}

impl Drop for ScopedHandle<'_> {
    fn drop(&mut self) {
        if self.handle.is_valid() {
            let _ = self.kernel.handle_close(self.handle);
        }
    }
}

impl core::fmt::Debug for ScopedHandle<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScopedHandle").field("handle", &self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests::FakeKernel;

    #[test]
    fn invalid_handle_is_not_valid() {
        assert!(!Handle::INVALID.is_valid());
        assert!(Handle::INVALID.to_raw() == INVALID_HANDLE);
    }

    #[test]
    fn scoped_handle_closes_on_drop() {
        let kernel = FakeKernel::new();
        let raw = kernel.make_handle(Rights::FULL);
        {
            let _scoped = ScopedHandle::new(raw, &kernel);
        }
        assert!(kernel.is_closed(raw));
    }

    #[test]
    fn release_suppresses_close() {
        let kernel = FakeKernel::new();
        let raw = kernel.make_handle(Rights::FULL);
        let scoped = ScopedHandle::new(raw, &kernel);
        let released = scoped.release();
        assert!(!kernel.is_closed(released));
        kernel.handle_close(released).unwrap();
    }

    #[test]
    fn duplicate_with_reduced_rights_is_a_subset() {
        let kernel = FakeKernel::new();
        let raw = kernel.make_handle(Rights::FULL);
        let reduced = raw
            .duplicate_with_reduced_rights(Rights::WRITE, &kernel)
            .unwrap();
        let reduced_rights = reduced.rights(&kernel).unwrap();
        assert!(!reduced_rights.contains(Rights::WRITE));
        assert!(Rights::FULL.contains(reduced_rights));
    }

    #[test]
    fn replace_closes_original_on_success() {
        let kernel = FakeKernel::new();
        let raw = kernel.make_handle(Rights::FULL);
        let replacement = raw.replace_with_reduced_rights(Rights::DUPLICATE, &kernel).unwrap();
        assert!(kernel.is_closed(raw));
        assert!(!kernel.is_closed(replacement));
    }

    #[test]
    fn wait_many_forwards_to_the_kernel() {
        let kernel = FakeKernel::new();
        let a = kernel.make_handle(Rights::FULL);
        let b = kernel.make_handle(Rights::FULL);
        let err = wait_many(
            &[a, b],
            &[Signals::READABLE, Signals::READABLE],
            Deadline::INDEFINITE,
            &kernel,
        )
        .unwrap_err();
        assert_eq!(err, ErrorKind::Unimplemented);
    }

    #[test]
    fn replace_leaves_original_valid_on_failure() {
        let kernel = FakeKernel::new();
        let raw = Handle::INVALID;
        let err = raw.replace_with_reduced_rights(Rights::WRITE, &kernel).unwrap_err();
        assert_eq!(err.0, raw);
        assert_eq!(err.1, ErrorKind::InvalidArgument);
    }
}
