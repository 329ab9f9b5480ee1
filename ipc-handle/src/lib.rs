//! # ipc-handle
//!
//! Capability-handle primitives for the IPC runtime: an opaque kernel handle
//! identifier, a rights bitmask, a move-only scoped wrapper that guarantees
//! release, and the abstract kernel interface ([`KernelOps`]) the runtime is
//! built against.
//!
//! This crate never talks to a real kernel. A host embeds the runtime by
//! implementing [`KernelOps`] against whatever microkernel it actually runs
//! on; everything above this crate (wire codec, wait sets, the reactor)
//! is written purely in terms of the trait.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod error;
mod handle;
pub mod kernel;
mod rights;
pub mod signals;
pub mod time;

pub use error::ErrorKind;
pub use handle::{Handle, INVALID_HANDLE, ScopedHandle, Waitable, wait_many};
pub use kernel::KernelOps;
pub use rights::Rights;
pub use signals::Signals;
pub use time::{Deadline, Instant};
