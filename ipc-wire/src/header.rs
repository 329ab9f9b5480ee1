//! Fixed-layout wire headers (spec §3 "Wire objects", §6 "Wire format").
//!
//! These are plain byte-offset constants, not `#[repr(C)]` structs — the
//! engine reads and writes them at computed offsets inside one shared
//! [`Buffer`](crate::Buffer) the way `nx_sf::hipc` hand-lays-out its request
//! buffer rather than overlaying a Rust struct on kernel-owned memory.

use static_assertions::const_assert_eq;

/// Every wire object's byte size is a multiple of this (invariant 1).
pub const ALIGNMENT: usize = 8;

/// `num_bytes: u32` at offset 0, `version: u32` at offset 4.
pub const STRUCT_HEADER_SIZE: usize = 8;
const_assert_eq!(STRUCT_HEADER_SIZE, 2 * size_of::<u32>());

/// `num_bytes: u32` at offset 0, `num_elements: u32` at offset 4.
pub const ARRAY_HEADER_SIZE: usize = 8;
const_assert_eq!(ARRAY_HEADER_SIZE, 2 * size_of::<u32>());

/// `size: u32`, `tag: u32`, 8 bytes of inline payload.
pub const UNION_LAYOUT_SIZE: usize = 16;
const_assert_eq!(UNION_LAYOUT_SIZE, 2 * size_of::<u32>() + 8);

/// An 8-byte pointer cell (§3 "Pointer").
pub const POINTER_SIZE: usize = 8;

/// A handle slot on the wire: a 32-bit index, `0xFFFF_FFFF` meaning invalid.
pub const HANDLE_SLOT_SIZE: usize = 4;

/// Sentinel handle-table index for an invalid/null handle (§4.3.6).
pub const INVALID_HANDLE_INDEX: u32 = u32::MAX;

/// Rounds `len` up to the next multiple of [`ALIGNMENT`], returning `None`
/// on overflow.
pub const fn round_up_to_alignment(len: usize) -> Option<usize> {
    match len.checked_add(ALIGNMENT - 1) {
        Some(sum) => Some(sum & !(ALIGNMENT - 1)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_8() {
        assert_eq!(round_up_to_alignment(0), Some(0));
        assert_eq!(round_up_to_alignment(1), Some(8));
        assert_eq!(round_up_to_alignment(8), Some(8));
        assert_eq!(round_up_to_alignment(9), Some(16));
    }

    #[test]
    fn overflow_returns_none() {
        assert_eq!(round_up_to_alignment(usize::MAX), None);
    }
}
