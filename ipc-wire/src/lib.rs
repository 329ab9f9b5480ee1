//! # ipc-wire
//!
//! The self-describing, offset-encoded wire codec (spec §3, §4.2, §4.3):
//! compile-time type descriptors plus a serialization engine that computes
//! sizes, encodes/decodes in place, validates untrusted input exhaustively,
//! and deep-copies object graphs across buffers.
//!
//! # Model
//!
//! Every object on the wire lives inside one linear [`Buffer`](buffer::Buffer)
//! — there is no separate heap-allocated object tree. A pointer cell (§3
//! "Pointer") is an 8-byte value that is read one of two ways depending on
//! whether the buffer has been [`encode`](codec::encode)d yet:
//!
//! - **Unencoded** (just built, or just [`decode`](codec::decode)d): the
//!   cell holds the *absolute byte offset* of its target from the start of
//!   this same buffer — a stand-in for the real memory address the
//!   original C++ implementation would store, substituting "offset within
//!   this arena" for "address in this process" (design note §9).
//! - **Encoded** (ready for the wire): the cell holds the offset of the
//!   target *relative to the cell itself*, per spec.md §6.
//!
//! [`encode`](codec::encode) and [`decode`](codec::decode) are the two
//! directions of that state transition, performed in place over the same
//! bytes. This lets one `Buffer` type serve as both the in-memory object
//! tree and the wire image, with no separate pointer-graph machinery.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod buffer;
pub mod codec;
pub mod descriptor;
pub mod error;
pub mod handles;
pub mod header;
pub mod message;

pub use buffer::Buffer;
pub use descriptor::{ArrayDescriptor, Descriptor, FieldKind, StructDescriptor, StructEntry, UnionDescriptor, UnionEntry, is_pointer};
pub use error::ValidationError;
pub use handles::HandleTable;
