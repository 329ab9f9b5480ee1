//! The abstract kernel interface (spec §6 "Kernel handle interface").
//!
//! Every syscall the runtime assumes its host microkernel provides is
//! collected into one object-safe trait, [`KernelOps`]. Nothing above this
//! module ever calls a raw syscall directly — the layering mirrors
//! `nx_svc::{ipc, sync, misc}` (safe wrapper) sitting on top of
//! `nx_svc::raw` (the FFI table), except the FFI table is replaced by a
//! trait object so this crate has no hardcoded target triple.

use alloc::vec::Vec;

use crate::{error::ErrorKind, handle::Handle, rights::Rights, signals::Signals, signals::WaitOutcome, time::Deadline};

/// Flags passed to [`KernelOps::message_write`] / [`KernelOps::message_read`].
/// Reserved for future use; the current wire format defines no flags, so
/// only `0` is accepted.
pub type MessageFlags = u32;

/// One entry's result after a [`KernelOps::wait_set_wait`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSetResult {
    /// The opaque 64-bit cookie the entry was added under.
    pub cookie: u64,
    /// The wait outcome for that entry.
    pub outcome: WaitOutcome,
}

/// The abstract surface every host must provide (spec §6).
///
/// Implementations are expected to be cheap `&self` wrappers around a real
/// syscall ABI (or, in tests, an in-process fake); `KernelOps` itself never
/// assumes interior mutability beyond whatever the implementation provides.
pub trait KernelOps {
    // -- Handles (§4.1) -----------------------------------------------

    /// `handle_close(h) -> status`.
    fn handle_close(&self, handle: Handle) -> Result<(), ErrorKind>;

    /// `handle_get_info(h) -> { rights, .. }`, rights projection.
    fn handle_get_rights(&self, handle: Handle) -> Result<Rights, ErrorKind>;

    /// `handle_duplicate(h, rights) -> h' | err`. `reduce` is `None` for a
    /// plain [`duplicate`](crate::Handle::duplicate) (rights unchanged) or
    /// `Some(to_remove)` for the rights-reducing variants.
    fn handle_duplicate(&self, handle: Handle, reduce: Option<Rights>) -> Result<Handle, ErrorKind>;

    /// `handle_wait_one(h, signals, deadline) -> { satisfied, satisfiable } | err`.
    fn handle_wait_one(
        &self,
        handle: Handle,
        signals: Signals,
        deadline: Deadline,
    ) -> Result<WaitOutcome, ErrorKind>;

    /// `handle_wait_many(handles, signals, n, deadline) -> { index, states } | err`.
    ///
    /// Returns the index of the first ready entry alongside the outcome
    /// observed for every entry (so a caller who gets `DeadlineExceeded`
    /// can still inspect which, if any, were satisfiable).
    fn handle_wait_many(
        &self,
        handles: &[Handle],
        signals: &[Signals],
        deadline: Deadline,
    ) -> Result<(usize, Vec<WaitOutcome>), ErrorKind>;

    // -- Clock -----------------------------------------------------------

    /// `get_time_ticks() -> microseconds`.
    fn get_time_ticks(&self) -> u64;

    // -- Message pipes -----------------------------------------------------

    /// `message_pipe_create() -> (h0, h1)`.
    fn message_pipe_create(&self) -> (Handle, Handle);

    /// `message_write(h, bytes, handles, flags)`.
    fn message_write(
        &self,
        handle: Handle,
        bytes: &[u8],
        handles: &[Handle],
        flags: MessageFlags,
    ) -> Result<(), ErrorKind>;

    /// `message_read(h, bytes, handles, flags)`. Returns the number of bytes
    /// and handles actually written into the caller's buffers, or
    /// [`ErrorKind::ShouldWait`] if no message is queued.
    fn message_read(
        &self,
        handle: Handle,
        bytes: &mut [u8],
        handles: &mut [Handle],
        flags: MessageFlags,
    ) -> Result<(usize, usize), ErrorKind>;

    // -- Data pipes ----------------------------------------------------------

    /// `data_pipe_create(elem_size, capacity) -> (producer, consumer)`.
    fn data_pipe_create(&self, elem_size: usize, capacity: usize) -> (Handle, Handle);

    /// Non-blocking write; returns the number of elements accepted, or
    /// [`ErrorKind::ShouldWait`] if the pipe is full.
    fn data_pipe_write(&self, handle: Handle, elements: &[u8]) -> Result<usize, ErrorKind>;

    /// Non-blocking read; returns the number of elements produced, or
    /// [`ErrorKind::ShouldWait`] if the pipe is empty.
    fn data_pipe_read(&self, handle: Handle, out: &mut [u8]) -> Result<usize, ErrorKind>;

    // -- Shared buffers -------------------------------------------------------

    /// `shared_buffer_create(size) -> h`.
    fn shared_buffer_create(&self, size: usize) -> Result<Handle, ErrorKind>;

    /// `buffer_map(h, offset, len, flags) -> ptr`.
    ///
    /// # Safety
    ///
    /// The returned pointer is valid for `len` bytes starting at `offset`
    /// until the matching [`buffer_unmap`](KernelOps::buffer_unmap) call, and
    /// only while `handle` remains open.
    unsafe fn buffer_map(
        &self,
        handle: Handle,
        offset: usize,
        len: usize,
    ) -> Result<core::ptr::NonNull<u8>, ErrorKind>;

    /// `buffer_unmap(ptr)`.
    ///
    /// # Safety
    ///
    /// `ptr` must be a pointer previously returned by
    /// [`buffer_map`](KernelOps::buffer_map) that has not already been unmapped.
    unsafe fn buffer_unmap(&self, ptr: core::ptr::NonNull<u8>);

    // -- Wait sets (§4.4) -----------------------------------------------------

    /// `wait_set_create()`.
    fn wait_set_create(&self) -> Result<Handle, ErrorKind>;

    /// `wait_set_add(set, handle, signals, cookie, options)`.
    fn wait_set_add(
        &self,
        set: Handle,
        handle: Handle,
        signals: Signals,
        cookie: u64,
    ) -> Result<(), ErrorKind>;

    /// `wait_set_remove(set, cookie)`.
    fn wait_set_remove(&self, set: Handle, cookie: u64) -> Result<(), ErrorKind>;

    /// `wait_set_wait(set, deadline, results[]) -> num_results, max_results`.
    ///
    /// Fills up to `capacity` results; returns `(num_results, max_results)`
    /// where `max_results` is the total that would have been returned given
    /// an unbounded buffer, letting the caller grow and retry.
    fn wait_set_wait(
        &self,
        set: Handle,
        deadline: Deadline,
        capacity: usize,
    ) -> Result<(Vec<WaitSetResult>, usize), ErrorKind>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod tests {
    //! An in-process [`KernelOps`] fake used by this crate's (and the
    //! downstream crates') unit tests. Handles are allocated sequentially;
    //! rights and open/closed state are tracked in a `RefCell`-guarded map
    //! so the fake can be shared by `&dyn KernelOps` without `&mut self`.

    use alloc::collections::BTreeMap;
    use core::cell::RefCell;

    use super::*;

    #[derive(Clone, Copy)]
    struct HandleState {
        rights: Rights,
        open: bool,
    }

    /// A minimal, deterministic [`KernelOps`] implementation for tests.
    /// The handle lifecycle (close/duplicate/rights) and wait sets are
    /// modeled for real; pipes and shared buffers return `Unimplemented`
    /// since no test in this crate or its dependents exercises them. Wait
    /// sets never actually block: every entry currently in the set is
    /// reported `Satisfied` with its requested signals the first time
    /// `wait_set_wait` is called, simulating an always-ready kernel.
    pub struct FakeKernel {
        next: RefCell<u32>,
        handles: RefCell<BTreeMap<u32, HandleState>>,
        wait_sets: RefCell<BTreeMap<u32, BTreeMap<u64, (Handle, Signals)>>>,
    }

    impl FakeKernel {
        pub fn new() -> Self {
            Self {
                next: RefCell::new(1),
                handles: RefCell::new(BTreeMap::new()),
                wait_sets: RefCell::new(BTreeMap::new()),
            }
        }

        pub fn make_handle(&self, rights: Rights) -> Handle {
            let mut next = self.next.borrow_mut();
            let raw = *next;
            *next += 1;
            self.handles.borrow_mut().insert(raw, HandleState { rights, open: true });
            unsafe { Handle::from_raw(raw) }
        }

        pub fn is_closed(&self, handle: Handle) -> bool {
            match self.handles.borrow().get(&handle.to_raw()) {
                Some(state) => !state.open,
                None => true,
            }
        }
    }

    impl KernelOps for FakeKernel {
        fn handle_close(&self, handle: Handle) -> Result<(), ErrorKind> {
            let mut handles = self.handles.borrow_mut();
            match handles.get_mut(&handle.to_raw()) {
                Some(state) if state.open => {
                    state.open = false;
                    Ok(())
                }
                _ => Err(ErrorKind::InvalidArgument),
            }
        }

        fn handle_get_rights(&self, handle: Handle) -> Result<Rights, ErrorKind> {
            self.handles
                .borrow()
                .get(&handle.to_raw())
                .filter(|s| s.open)
                .map(|s| s.rights)
                .ok_or(ErrorKind::InvalidArgument)
        }

        fn handle_duplicate(&self, handle: Handle, reduce: Option<Rights>) -> Result<Handle, ErrorKind> {
            let rights = self.handle_get_rights(handle)?;
            if !rights.contains(Rights::DUPLICATE) {
                return Err(ErrorKind::PermissionDenied);
            }
            let new_rights = match reduce {
                Some(to_remove) => rights.difference(to_remove),
                None => rights,
            };
            Ok(self.make_handle(new_rights))
        }

        fn handle_wait_one(&self, _handle: Handle, _signals: Signals, _deadline: Deadline) -> Result<WaitOutcome, ErrorKind> {
            Err(ErrorKind::Unimplemented)
        }

        fn handle_wait_many(&self, _handles: &[Handle], _signals: &[Signals], _deadline: Deadline) -> Result<(usize, Vec<WaitOutcome>), ErrorKind> {
            Err(ErrorKind::Unimplemented)
        }

        fn get_time_ticks(&self) -> u64 {
            0
        }

        fn message_pipe_create(&self) -> (Handle, Handle) {
            (self.make_handle(Rights::FULL), self.make_handle(Rights::FULL))
        }

        fn message_write(&self, _handle: Handle, _bytes: &[u8], _handles: &[Handle], _flags: MessageFlags) -> Result<(), ErrorKind> {
            Err(ErrorKind::Unimplemented)
        }

        fn message_read(&self, _handle: Handle, _bytes: &mut [u8], _handles: &mut [Handle], _flags: MessageFlags) -> Result<(usize, usize), ErrorKind> {
            Err(ErrorKind::Unimplemented)
        }

        fn data_pipe_create(&self, _elem_size: usize, _capacity: usize) -> (Handle, Handle) {
            (self.make_handle(Rights::FULL), self.make_handle(Rights::FULL))
        }

        fn data_pipe_write(&self, _handle: Handle, _elements: &[u8]) -> Result<usize, ErrorKind> {
            Err(ErrorKind::Unimplemented)
        }

        fn data_pipe_read(&self, _handle: Handle, _out: &mut [u8]) -> Result<usize, ErrorKind> {
            Err(ErrorKind::Unimplemented)
        }

        fn shared_buffer_create(&self, _size: usize) -> Result<Handle, ErrorKind> {
            Err(ErrorKind::Unimplemented)
        }

        unsafe fn buffer_map(&self, _handle: Handle, _offset: usize, _len: usize) -> Result<core::ptr::NonNull<u8>, ErrorKind> {
            Err(ErrorKind::Unimplemented)
        }

        unsafe fn buffer_unmap(&self, _ptr: core::ptr::NonNull<u8>) {}

        fn wait_set_create(&self) -> Result<Handle, ErrorKind> {
            let handle = self.make_handle(Rights::FULL);
            self.wait_sets.borrow_mut().insert(handle.to_raw(), BTreeMap::new());
            Ok(handle)
        }

        fn wait_set_add(&self, set: Handle, handle: Handle, signals: Signals, cookie: u64) -> Result<(), ErrorKind> {
            let mut sets = self.wait_sets.borrow_mut();
            let entries = sets.get_mut(&set.to_raw()).ok_or(ErrorKind::InvalidArgument)?;
            if entries.contains_key(&cookie) {
                return Err(ErrorKind::AlreadyExists);
            }
            entries.insert(cookie, (handle, signals));
            Ok(())
        }

        fn wait_set_remove(&self, set: Handle, cookie: u64) -> Result<(), ErrorKind> {
            let mut sets = self.wait_sets.borrow_mut();
            let entries = sets.get_mut(&set.to_raw()).ok_or(ErrorKind::InvalidArgument)?;
            entries.remove(&cookie).map(|_| ()).ok_or(ErrorKind::NotFound)
        }

        fn wait_set_wait(&self, set: Handle, _deadline: Deadline, capacity: usize) -> Result<(Vec<WaitSetResult>, usize), ErrorKind> {
            let mut sets = self.wait_sets.borrow_mut();
            let entries = sets.get_mut(&set.to_raw()).ok_or(ErrorKind::InvalidArgument)?;
            let max_results = entries.len();
            let cookies: Vec<u64> = entries.keys().take(capacity).copied().collect();
            let mut results = Vec::with_capacity(cookies.len());
            for cookie in cookies {
                let (_, signals) = entries.remove(&cookie).expect("cookie just read from this map");
                results.push(WaitSetResult { cookie, outcome: WaitOutcome::Satisfied(signals) });
            }
            Ok((results, max_results))
        }
    }
}
