//! The single-threaded, cooperative run loop that dispatches wait-set
//! results and delayed work to application handlers.
//!
//! Every other crate in this workspace targets `no_std`, matching a
//! kernel-side or freestanding build. The reactor is different: it assumes a
//! hosted process driving a microkernel through its syscall surface, the
//! same environment a userspace service manager runs in, so it is allowed to
//! reach for `std` — a growable `HashMap`/`BinaryHeap`, and `log` for
//! iteration tracing.

use std::cell::Cell;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use ipc_handle::kernel::WaitSetResult;
use ipc_handle::signals::WaitOutcome;
use ipc_handle::time::{Deadline, Instant};
use ipc_handle::{ErrorKind, Handle, KernelOps, Signals};
use ipc_waitset::{WaitSet, WaitSetError};

/// The results-buffer size a reactor starts at, and the ceiling it grows to.
const INITIAL_RESULTS_CAPACITY: usize = 16;
const MAX_RESULTS_CAPACITY: usize = 256;

/// Everything that can go wrong constructing a [`Reactor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReactorError {
    /// Another reactor is already installed on this thread.
    #[error("a reactor is already current on this thread")]
    AlreadyCurrent,
    /// The underlying kernel call failed.
    #[error(transparent)]
    Kernel(#[from] ErrorKind),
}

fn map_waitset_err(err: WaitSetError) -> ErrorKind {
    match err {
        WaitSetError::AlreadyExists => ErrorKind::AlreadyExists,
        WaitSetError::NotFound => ErrorKind::NotFound,
        WaitSetError::Kernel(kind) => kind,
    }
}

/// An application-facing callback with exactly two observable events.
///
/// Before either method fires, the reactor has already removed the
/// handler's entry from its tables — the handler is free to re-register
/// itself, on a different handle or the same one, from inside either call.
/// Both callbacks are handed the reactor itself so they can add/remove
/// handlers, post delayed tasks, request a quit, or even drive a nested
/// [`Reactor::run`] — this is the same capability a literal thread-local
/// "current reactor" pointer would exist to provide, made explicit instead
/// of ambient.
pub trait Handler<'k> {
    /// The handle's requested signals are satisfied.
    fn on_ready(&mut self, id: u64, reactor: &mut Reactor<'k>);
    /// The wait for this entry ended some other way.
    fn on_error(&mut self, id: u64, kind: ErrorKind, reactor: &mut Reactor<'k>);
}

type Task<'k> = Box<dyn FnOnce(&mut Reactor<'k>) + 'k>;

struct HandlerEntry<'k> {
    handler: Box<dyn Handler<'k> + 'k>,
    // Kept alongside the handler purely to mirror the registered-state tuple
    // `(handler, handle, signals, absolute_deadline)`; the deadline that
    // actually drives dispatch lives in `handler_deadlines`.
    #[allow(dead_code)]
    handle: Handle,
    #[allow(dead_code)]
    signals: Signals,
    #[allow(dead_code)]
    deadline: Deadline,
}

struct DelayedTask<'k> {
    run_time: Instant,
    id: u64,
    task: Task<'k>,
}

impl PartialEq for DelayedTask<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.run_time == other.run_time && self.id == other.id
    }
}

impl Eq for DelayedTask<'_> {}

impl PartialOrd for DelayedTask<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.run_time, self.id).cmp(&(other.run_time, other.id))
    }
}

thread_local! {
    static REACTOR_PRESENT: Cell<bool> = const { Cell::new(false) };
}

/// A single-threaded run loop over a kernel wait set, handler deadlines, and
/// delayed tasks.
///
/// At most one `Reactor` may be current per thread at a time; [`Reactor::new`]
/// fails with [`ReactorError::AlreadyCurrent`] if one is already installed.
/// `run` is re-entrant: a handler callback may drive a nested `run` to
/// completion before returning, and each call gets its own `quit` flag.
pub struct Reactor<'k> {
    kernel: &'k dyn KernelOps,
    wait_set: WaitSet<'k>,
    handlers: HashMap<u64, HandlerEntry<'k>>,
    handler_deadlines: BinaryHeap<Reverse<(Deadline, u64)>>,
    delayed_tasks: BinaryHeap<Reverse<DelayedTask<'k>>>,
    next_id: u64,
    quit_stack: Vec<bool>,
    results_capacity: usize,
}

impl<'k> Reactor<'k> {
    /// Installs a new reactor as current on this thread.
    pub fn new(kernel: &'k dyn KernelOps) -> Result<Self, ReactorError> {
        if REACTOR_PRESENT.with(|present| present.replace(true)) {
            return Err(ReactorError::AlreadyCurrent);
        }
        match WaitSet::new(kernel) {
            Ok(wait_set) => Ok(Self {
                kernel,
                wait_set,
                handlers: HashMap::new(),
                handler_deadlines: BinaryHeap::new(),
                delayed_tasks: BinaryHeap::new(),
                next_id: 0,
                quit_stack: Vec::new(),
                results_capacity: INITIAL_RESULTS_CAPACITY,
            }),
            Err(kind) => {
                REACTOR_PRESENT.with(|present| present.set(false));
                Err(ReactorError::Kernel(kind))
            }
        }
    }

    fn now(&self) -> Instant {
        Instant::from_ticks(self.kernel.get_time_ticks())
    }

    fn alloc_id(&mut self) -> Result<u64, ErrorKind> {
        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1).ok_or(ErrorKind::ResourceExhausted)?;
        Ok(id)
    }

    /// Registers `handler` to be woken when `handle` satisfies `signals`, or
    /// when `relative_deadline` elapses first. Returns the fresh ID.
    pub fn add_handler(
        &mut self,
        handler: Box<dyn Handler<'k> + 'k>,
        handle: Handle,
        signals: Signals,
        relative_deadline: Duration,
    ) -> Result<u64, ErrorKind> {
        let id = self.alloc_id()?;
        let deadline = Deadline::after(self.now(), relative_deadline);
        self.wait_set.add(handle, signals, id).map_err(map_waitset_err)?;
        if !deadline.is_indefinite() {
            self.handler_deadlines.push(Reverse((deadline, id)));
        }
        self.handlers.insert(id, HandlerEntry { handler, handle, signals, deadline });
        log::trace!("reactor: registered handler {id} for {signals:?}");
        Ok(id)
    }

    /// Removes a still-registered handler. Any stale deadline entry is left
    /// for the priority queue to discard lazily.
    pub fn remove_handler(&mut self, id: u64) -> Result<(), ErrorKind> {
        self.handlers.remove(&id).ok_or(ErrorKind::NotFound)?;
        self.wait_set.remove(id).map_err(map_waitset_err)?;
        log::trace!("reactor: removed handler {id}");
        Ok(())
    }

    /// Schedules `task` to run once, no sooner than `delay` from now.
    /// Returns the fresh ID assigned to the task.
    pub fn post_delayed_task(&mut self, delay: Duration, task: Task<'k>) -> Result<u64, ErrorKind> {
        let id = self.alloc_id()?;
        let run_time = self.now().saturating_add(delay);
        self.delayed_tasks.push(Reverse(DelayedTask { run_time, id, task }));
        Ok(id)
    }

    /// Requests that the innermost active `run`/`run_until_idle` frame stop
    /// after the current iteration. A no-op if no frame is active.
    pub fn quit(&mut self) {
        if let Some(flag) = self.quit_stack.last_mut() {
            *flag = true;
        }
    }

    fn quit_requested(&self) -> bool {
        self.quit_stack.last().copied().unwrap_or(false)
    }

    fn grow_results_capacity(&mut self, max_results: usize) {
        if max_results > self.results_capacity && self.results_capacity < MAX_RESULTS_CAPACITY {
            self.results_capacity = (self.results_capacity * 2).min(MAX_RESULTS_CAPACITY);
        }
    }

    /// Drops the stale top of `handler_deadlines` (handler already removed)
    /// until the earliest still-live deadline is at the top, returning it.
    fn earliest_live_handler_deadline(&mut self) -> Option<Deadline> {
        loop {
            let Some(Reverse((deadline, id))) = self.handler_deadlines.peek().copied() else {
                return None;
            };
            if self.handlers.contains_key(&id) {
                return Some(deadline);
            }
            self.handler_deadlines.pop();
        }
    }

    fn drain_expired_handler_deadlines(&mut self, timeout_deadline: Deadline) -> bool {
        let mut did_work = false;
        loop {
            let should_pop = match self.handler_deadlines.peek() {
                Some(Reverse((deadline, _))) => *deadline <= timeout_deadline,
                None => false,
            };
            if !should_pop {
                break;
            }
            let Reverse((_, id)) = self.handler_deadlines.pop().expect("just peeked");
            if let Some(mut entry) = self.handlers.remove(&id) {
                let _ = self.wait_set.remove(id);
                log::trace!("reactor: handler {id} deadline expired");
                entry.handler.on_error(id, ErrorKind::DeadlineExceeded, self);
                did_work = true;
            }
        }
        did_work
    }

    /// One pass of the run-loop algorithm: drain due delayed tasks, dispatch
    /// any wait-set results, and fire expired handler deadlines. Returns
    /// whether any work occurred.
    fn iterate_once(&mut self) -> Result<bool, ErrorKind> {
        let mut did_work = false;
        let now = self.now();

        // Drain delayed tasks due at or before `now`, but never ones posted
        // during this very drain: a synthetic boundary pinned to the next
        // unassigned ID makes sure of that.
        let boundary_id = self.next_id;
        loop {
            let should_pop = match self.delayed_tasks.peek() {
                Some(Reverse(top)) => top.run_time <= now && top.id < boundary_id,
                None => false,
            };
            if !should_pop {
                break;
            }
            let Reverse(entry) = self.delayed_tasks.pop().expect("just peeked");
            did_work = true;
            (entry.task)(self);
            if self.quit_requested() {
                return Ok(did_work);
            }
        }

        if self.handlers.is_empty() {
            return Ok(did_work);
        }

        let earliest_handler_deadline = self.earliest_live_handler_deadline();
        let earliest_task_time = match self.delayed_tasks.peek() {
            Some(Reverse(top)) => Some(Deadline::at(top.run_time)),
            None => None,
        };
        let mut wait_deadline = Deadline::INDEFINITE;
        for candidate in [earliest_handler_deadline, earliest_task_time].into_iter().flatten() {
            if candidate < wait_deadline {
                wait_deadline = candidate;
            }
        }
        if let Some(instant) = wait_deadline.instant() {
            if instant < now {
                wait_deadline = Deadline::at(now);
            }
        }

        let capacity = self.results_capacity;
        match self.wait_set.wait(wait_deadline, capacity) {
            Ok((results, max_results)) => {
                if !results.is_empty() {
                    did_work = true;
                }
                self.grow_results_capacity(max_results);
                for WaitSetResult { cookie: id, outcome } in results {
                    let Some(mut entry) = self.handlers.remove(&id) else {
                        // Removed re-entrantly earlier in this same batch,
                        // or a late result for an already-departed cookie.
                        continue;
                    };
                    match outcome {
                        WaitOutcome::Satisfied(_) => entry.handler.on_ready(id, self),
                        WaitOutcome::FailedPrecondition => {
                            entry.handler.on_error(id, ErrorKind::FailedPrecondition, self)
                        }
                        WaitOutcome::Cancelled => entry.handler.on_error(id, ErrorKind::Cancelled, self),
                    }
                }
                Ok(did_work)
            }
            Err(ErrorKind::DeadlineExceeded) => {
                log::debug!("reactor: wait_set_wait hit its deadline, checking handler deadlines");
                if self.drain_expired_handler_deadlines(wait_deadline) {
                    did_work = true;
                }
                Ok(did_work)
            }
            Err(other) => Err(other),
        }
    }

    /// Runs until no handlers and no pending delayed tasks remain, or
    /// [`Reactor::quit`] is called on this frame.
    pub fn run(&mut self) -> Result<(), ErrorKind> {
        self.quit_stack.push(false);
        let result = loop {
            if self.handlers.is_empty() && self.delayed_tasks.is_empty() {
                break Ok(());
            }
            if self.quit_requested() {
                break Ok(());
            }
            match self.iterate_once() {
                Ok(_) => {}
                Err(err) => break Err(err),
            }
        };
        self.quit_stack.pop();
        result
    }

    /// Runs one pass at a time, without blocking past immediately
    /// executable work, stopping as soon as a pass does nothing.
    pub fn run_until_idle(&mut self) -> Result<(), ErrorKind> {
        self.quit_stack.push(false);
        let result = loop {
            if self.quit_requested() {
                break Ok(());
            }
            match self.iterate_once() {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        self.quit_stack.pop();
        result
    }
}

impl Drop for Reactor<'_> {
    fn drop(&mut self) {
        let mut pending: Vec<(u64, HandlerEntry<'_>)> = self.handlers.drain().collect();
        while !pending.is_empty() {
            log::debug!("reactor: aborting {} still-registered handler(s)", pending.len());
            for (id, mut entry) in pending.drain(..) {
                entry.handler.on_error(id, ErrorKind::Aborted, self);
            }
            pending = self.handlers.drain().collect();
        }
        REACTOR_PRESENT.with(|present| present.set(false));
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use ipc_handle::kernel::tests::FakeKernel;
    use ipc_handle::{ErrorKind as Kind, Rights};

    use super::*;

    /// Wraps a [`FakeKernel`] but always fails `wait_set_wait` with
    /// `deadline_exceeded`, for exercising handlers that never become ready.
    struct NeverReadyKernel {
        inner: FakeKernel,
    }

    impl KernelOps for NeverReadyKernel {
        fn handle_close(&self, handle: Handle) -> Result<(), ErrorKind> {
            self.inner.handle_close(handle)
        }
        fn handle_get_rights(&self, handle: Handle) -> Result<Rights, ErrorKind> {
            self.inner.handle_get_rights(handle)
        }
        fn handle_duplicate(&self, handle: Handle, reduce: Option<Rights>) -> Result<Handle, ErrorKind> {
            self.inner.handle_duplicate(handle, reduce)
        }
        fn handle_wait_one(&self, handle: Handle, signals: Signals, deadline: Deadline) -> Result<WaitOutcome, ErrorKind> {
            self.inner.handle_wait_one(handle, signals, deadline)
        }
        fn handle_wait_many(&self, handles: &[Handle], signals: &[Signals], deadline: Deadline) -> Result<(usize, Vec<WaitOutcome>), ErrorKind> {
            self.inner.handle_wait_many(handles, signals, deadline)
        }
        fn get_time_ticks(&self) -> u64 {
            self.inner.get_time_ticks()
        }
        fn message_pipe_create(&self) -> (Handle, Handle) {
            self.inner.message_pipe_create()
        }
        fn message_write(&self, handle: Handle, bytes: &[u8], handles: &[Handle], flags: ipc_handle::kernel::MessageFlags) -> Result<(), ErrorKind> {
            self.inner.message_write(handle, bytes, handles, flags)
        }
        fn message_read(&self, handle: Handle, bytes: &mut [u8], handles: &mut [Handle], flags: ipc_handle::kernel::MessageFlags) -> Result<(usize, usize), ErrorKind> {
            self.inner.message_read(handle, bytes, handles, flags)
        }
        fn data_pipe_create(&self, elem_size: usize, capacity: usize) -> (Handle, Handle) {
            self.inner.data_pipe_create(elem_size, capacity)
        }
        fn data_pipe_write(&self, handle: Handle, elements: &[u8]) -> Result<usize, ErrorKind> {
            self.inner.data_pipe_write(handle, elements)
        }
        fn data_pipe_read(&self, handle: Handle, out: &mut [u8]) -> Result<usize, ErrorKind> {
            self.inner.data_pipe_read(handle, out)
        }
        fn shared_buffer_create(&self, size: usize) -> Result<Handle, ErrorKind> {
            self.inner.shared_buffer_create(size)
        }
        unsafe fn buffer_map(&self, handle: Handle, offset: usize, len: usize) -> Result<core::ptr::NonNull<u8>, ErrorKind> {
            unsafe { self.inner.buffer_map(handle, offset, len) }
        }
        unsafe fn buffer_unmap(&self, ptr: core::ptr::NonNull<u8>) {
            unsafe { self.inner.buffer_unmap(ptr) }
        }
        fn wait_set_create(&self) -> Result<Handle, ErrorKind> {
            self.inner.wait_set_create()
        }
        fn wait_set_add(&self, set: Handle, handle: Handle, signals: Signals, cookie: u64) -> Result<(), ErrorKind> {
            self.inner.wait_set_add(set, handle, signals, cookie)
        }
        fn wait_set_remove(&self, set: Handle, cookie: u64) -> Result<(), ErrorKind> {
            self.inner.wait_set_remove(set, cookie)
        }
        fn wait_set_wait(&self, _set: Handle, _deadline: Deadline, _capacity: usize) -> Result<(Vec<WaitSetResult>, usize), ErrorKind> {
            Err(ErrorKind::DeadlineExceeded)
        }
    }

    struct RecordingHandler {
        ready: Rc<RefCell<Vec<u64>>>,
        errors: Rc<RefCell<Vec<(u64, Kind)>>>,
    }

    impl<'k> Handler<'k> for RecordingHandler {
        fn on_ready(&mut self, id: u64, _reactor: &mut Reactor<'k>) {
            self.ready.borrow_mut().push(id);
        }
        fn on_error(&mut self, id: u64, kind: ErrorKind, _reactor: &mut Reactor<'k>) {
            self.errors.borrow_mut().push((id, kind));
        }
    }

    #[test]
    fn deadline_fires_exactly_once_for_a_handler_with_no_writer() {
        let kernel = NeverReadyKernel { inner: FakeKernel::new() };
        let handle = kernel.inner.make_handle(Rights::FULL);
        let mut reactor = Reactor::new(&kernel).unwrap();

        let errors = Rc::new(RefCell::new(Vec::new()));
        let ready = Rc::new(RefCell::new(Vec::new()));
        let handler = RecordingHandler { ready: ready.clone(), errors: errors.clone() };
        reactor
            .add_handler(Box::new(handler), handle, Signals::READABLE, Duration::from_millis(10))
            .unwrap();

        reactor.run().unwrap();

        assert_eq!(ready.borrow().len(), 0);
        assert_eq!(errors.borrow().len(), 1);
        assert_eq!(errors.borrow()[0].1, Kind::DeadlineExceeded);
    }

    struct NestingHandler {
        handle: Handle,
        depth: u32,
        max_depth: u32,
        errors: Rc<RefCell<Vec<(u64, Kind)>>>,
    }

    impl<'k> Handler<'k> for NestingHandler {
        fn on_ready(&mut self, _id: u64, reactor: &mut Reactor<'k>) {
            if self.depth >= self.max_depth {
                reactor.quit();
                return;
            }
            reactor
                .add_handler(
                    Box::new(NestingHandler {
                        handle: self.handle,
                        depth: self.depth + 1,
                        max_depth: self.max_depth,
                        errors: self.errors.clone(),
                    }),
                    self.handle,
                    Signals::READABLE,
                    Duration::from_secs(3600),
                )
                .unwrap();
            reactor.run().unwrap();
        }
        fn on_error(&mut self, id: u64, kind: ErrorKind, _reactor: &mut Reactor<'k>) {
            self.errors.borrow_mut().push((id, kind));
        }
    }

    #[test]
    fn nested_run_to_depth_ten_with_innermost_quit_reports_no_errors() {
        let kernel = FakeKernel::new();
        let handle = kernel.make_handle(Rights::FULL);
        let mut reactor = Reactor::new(&kernel).unwrap();

        let errors = Rc::new(RefCell::new(Vec::new()));
        reactor
            .add_handler(
                Box::new(NestingHandler { handle, depth: 0, max_depth: 10, errors: errors.clone() }),
                handle,
                Signals::READABLE,
                Duration::from_secs(3600),
            )
            .unwrap();

        reactor.run().unwrap();

        assert!(errors.borrow().is_empty());
    }

    #[test]
    fn second_reactor_on_same_thread_is_rejected() {
        let kernel = FakeKernel::new();
        let _first = Reactor::new(&kernel).unwrap();
        let second = Reactor::new(&kernel);
        assert!(matches!(second, Err(ReactorError::AlreadyCurrent)));
    }

    #[test]
    fn run_until_idle_returns_once_no_immediate_work_remains() {
        let kernel = FakeKernel::new();
        let mut reactor = Reactor::new(&kernel).unwrap();
        reactor.run_until_idle().unwrap();
    }
}
