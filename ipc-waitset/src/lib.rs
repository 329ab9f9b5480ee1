//! A kernel-backed wait set: an add/remove-capable collection of
//! (handle, signals, cookie) entries (spec §4.4).
//!
//! This is the multi-cookie, mutable generalization of the teacher's
//! `nx_svc::sync::wait_synchronization` (a single-shot wait over a borrowed
//! slice of `Waitable`s): `WaitSet` keeps its own bookkeeping map so entries
//! can be added and removed between waits, on top of the same
//! [`KernelOps::wait_set_*`](ipc_handle::KernelOps) primitives that back
//! that one-shot call.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use hashbrown::HashMap;

use ipc_handle::kernel::WaitSetResult;
use ipc_handle::{Deadline, ErrorKind, Handle, KernelOps, ScopedHandle, Signals};

/// Everything that can go wrong calling [`WaitSet::add`] or
/// [`WaitSet::remove`]: the two set-membership failures spec.md §4.4
/// names, plus any kernel error passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitSetError {
    /// `add` was called with a cookie already present in the set.
    #[error("cookie already present in wait set")]
    AlreadyExists,
    /// `remove` was called with a cookie not present in the set.
    #[error("cookie not found in wait set")]
    NotFound,
    /// The kernel call itself failed.
    #[error(transparent)]
    Kernel(#[from] ErrorKind),
}

#[derive(Clone, Copy)]
struct Entry {
    handle: Handle,
    signals: Signals,
}

/// A kernel-backed wait set plus the cookie → entry map needed to support
/// `add`/`remove` between waits.
pub struct WaitSet<'k> {
    kernel: &'k dyn KernelOps,
    handle: ScopedHandle<'k>,
    entries: HashMap<u64, Entry>,
}

impl<'k> WaitSet<'k> {
    /// Creates a new kernel wait-set object.
    pub fn new(kernel: &'k dyn KernelOps) -> Result<Self, ErrorKind> {
        let handle = kernel.wait_set_create()?;
        Ok(Self {
            kernel,
            handle: ScopedHandle::new(handle, kernel),
            entries: HashMap::new(),
        })
    }

    /// The number of entries currently in the set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the set holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds `handle` to the set under `cookie`, watching for `signals`.
    /// Fails with [`WaitSetError::AlreadyExists`] if `cookie` is already
    /// present — cookies are opaque and need not relate to handle identity,
    /// so the same handle may be added multiple times under distinct
    /// cookies.
    pub fn add(&mut self, handle: Handle, signals: Signals, cookie: u64) -> Result<(), WaitSetError> {
        if self.entries.contains_key(&cookie) {
            return Err(WaitSetError::AlreadyExists);
        }
        self.kernel.wait_set_add(self.handle.get(), handle, signals, cookie)?;
        self.entries.insert(cookie, Entry { handle, signals });
        Ok(())
    }

    /// Removes the entry under `cookie`. Fails with
    /// [`WaitSetError::NotFound`] if absent.
    pub fn remove(&mut self, cookie: u64) -> Result<(), WaitSetError> {
        if !self.entries.contains_key(&cookie) {
            return Err(WaitSetError::NotFound);
        }
        self.kernel.wait_set_remove(self.handle.get(), cookie)?;
        self.entries.remove(&cookie);
        Ok(())
    }

    /// Blocks until at least one entry reports a result or `deadline`
    /// passes. Returns up to `capacity` results plus the total that would
    /// have been returned given an unbounded buffer (spec §4.4). Every
    /// returned cookie is implicitly removed from the set, matching "a
    /// cancelled/triggered entry is implicitly removed".
    pub fn wait(
        &mut self,
        deadline: Deadline,
        capacity: usize,
    ) -> Result<(alloc::vec::Vec<WaitSetResult>, usize), ErrorKind> {
        let (results, max_results) = self.kernel.wait_set_wait(self.handle.get(), deadline, capacity)?;
        for result in &results {
            self.entries.remove(&result.cookie);
        }
        Ok((results, max_results))
    }

    /// Looks up the handle and requested signals registered under `cookie`,
    /// if still present.
    pub fn signals_for(&self, cookie: u64) -> Option<(Handle, Signals)> {
        self.entries.get(&cookie).map(|e| (e.handle, e.signals))
    }
}
