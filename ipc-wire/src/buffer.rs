//! The shared bump-allocated arena backing every wire object (spec §3, §9).
//!
//! A [`Buffer`] wraps a fixed-capacity byte store and hands out 8-byte
//! aligned regions from it with a simple bump pointer, the way
//! `nx_sf::hipc` carves a statically-sized TLS IPC buffer into a request
//! with `calc_request_layout` rather than growing on demand. Every struct,
//! array, and boxed union allocated while building or decoding a message
//! lives inside it at some absolute offset from byte 0; offset 0 is always
//! the root object (children are allocated strictly after it), so it
//! doubles as the "null" sentinel for pointer cells.

use alloc::vec;
use alloc::vec::Vec;

use crate::header::ALIGNMENT;

/// A fixed-capacity, 8-byte-aligned byte arena holding one message's full
/// object graph, in either its unencoded (absolute-offset) or encoded
/// (cell-relative-offset) form — see the crate-level docs for the duality.
#[derive(Debug)]
pub struct Buffer {
    bytes: Vec<u8>,
    used: usize,
}

impl Buffer {
    /// A buffer with room for exactly `capacity` bytes, all zeroed, ready
    /// for [`alloc`](Self::alloc) calls starting at offset 0. Callers
    /// typically size `capacity` from a prior
    /// [`compute_serialized_size`](crate::codec::compute_serialized_size)
    /// call.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity],
            used: 0,
        }
    }

    /// Wraps pre-existing, fully-populated bytes (e.g. just read off a
    /// message pipe) for decoding or validation. The whole slice counts as
    /// used; no further [`alloc`](Self::alloc) calls are expected.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let used = bytes.len();
        Self { bytes, used }
    }

    /// The number of bytes allocated so far (`num_bytes_used`, spec §3).
    pub fn num_bytes_used(&self) -> usize {
        self.used
    }

    /// The total capacity this buffer was created with.
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Reserves `len` bytes at the end of the used region, returning the
    /// absolute offset of the first byte, or `None` if `len` (after
    /// rounding to [`ALIGNMENT`]) would exceed the buffer's capacity (spec
    /// §3: "Allocation fails with null result when exhausted").
    pub fn alloc(&mut self, len: usize) -> Option<u32> {
        let len = crate::header::round_up_to_alignment(len)?;
        let offset = self.used;
        let new_used = offset.checked_add(len)?;
        if new_used > self.bytes.len() {
            return None;
        }
        self.used = new_used;
        Some(offset as u32)
    }

    /// The used portion of the backing storage.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.used]
    }

    /// The used portion of the backing storage, mutably.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.used]
    }

    /// Consumes the buffer, returning its used bytes.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.bytes.truncate(self.used);
        self.bytes
    }

    /// Reads a little-endian `u32` at `offset`, or `None` if out of range.
    pub fn read_u32(&self, offset: u32) -> Option<u32> {
        let offset = offset as usize;
        self.bytes
            .get(offset..offset + 4)
            .map(|s| u32::from_le_bytes(s.try_into().unwrap()))
    }

    /// Writes a little-endian `u32` at `offset`. Panics if out of range —
    /// callers only write into space they themselves allocated.
    pub fn write_u32(&mut self, offset: u32, value: u32) {
        let offset = offset as usize;
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Reads a little-endian `u64` at `offset`, or `None` if out of range.
    pub fn read_u64(&self, offset: u32) -> Option<u64> {
        let offset = offset as usize;
        self.bytes
            .get(offset..offset + 8)
            .map(|s| u64::from_le_bytes(s.try_into().unwrap()))
    }

    /// Writes a little-endian `u64` at `offset`. Panics if out of range.
    pub fn write_u64(&mut self, offset: u32, value: u64) {
        let offset = offset as usize;
        self.bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Reads the `len`-byte slice starting at `offset`, or `None` if out of
    /// range.
    pub fn read_slice(&self, offset: u32, len: usize) -> Option<&[u8]> {
        let offset = offset as usize;
        self.bytes.get(offset..offset + len)
    }

    /// Writes `data` starting at `offset`. Panics if out of range.
    pub fn write_slice(&mut self, offset: u32, data: &[u8]) {
        let offset = offset as usize;
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }
}

/// Computes `header_size + ceil(num_elements * elem_bits / 8)`, rounded up
/// to [`ALIGNMENT`], returning `None` if any step overflows a `u32` (spec
/// §4.3.2 array sizing; the six-elements-at-`u32::MAX` seed test in §8
/// exercises exactly this overflow path).
pub fn array_total_bytes(header_size: u32, elem_bits: u32, num_elements: u32) -> Option<u32> {
    let num_elements = num_elements as u64;
    let elem_bits = elem_bits as u64;
    let body_bits = num_elements.checked_mul(elem_bits)?;
    let body_bytes = body_bits.div_ceil(8);
    let total = (header_size as u64).checked_add(body_bytes)?;
    let total = u32::try_from(total).ok()?;
    crate::header::round_up_to_alignment(total as usize).map(|v| v as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_returns_sequential_offsets() {
        let mut buf = Buffer::with_capacity(24);
        assert_eq!(buf.alloc(8), Some(0));
        assert_eq!(buf.alloc(16), Some(8));
        assert_eq!(buf.num_bytes_used(), 24);
    }

    #[test]
    fn alloc_fails_with_none_when_exhausted() {
        let mut buf = Buffer::with_capacity(8);
        assert_eq!(buf.alloc(16), None);
        assert_eq!(buf.num_bytes_used(), 0);
    }

    #[test]
    fn alloc_rounds_requested_length_up() {
        let mut buf = Buffer::with_capacity(8);
        assert_eq!(buf.alloc(1), Some(0));
        assert_eq!(buf.num_bytes_used(), 8);
    }

    #[test]
    fn u32_round_trips() {
        let mut buf = Buffer::with_capacity(8);
        buf.alloc(8);
        buf.write_u32(4, 0xDEAD_BEEF);
        assert_eq!(buf.read_u32(4), Some(0xDEAD_BEEF));
    }

    #[test]
    fn u64_round_trips() {
        let mut buf = Buffer::with_capacity(8);
        buf.alloc(8);
        buf.write_u64(0, 0x1122_3344_5566_7788);
        assert_eq!(buf.read_u64(0), Some(0x1122_3344_5566_7788));
    }

    #[test]
    fn read_out_of_range_is_none() {
        let buf = Buffer::with_capacity(0);
        assert_eq!(buf.read_u32(0), None);
    }

    #[test]
    fn array_total_bytes_rounds_up_and_includes_header() {
        // 3 elements of 32 bits = 12 bytes body + 8 byte header = 20, rounds to 24.
        assert_eq!(array_total_bytes(8, 32, 3), Some(24));
    }

    #[test]
    fn array_total_bytes_overflows_at_u32_max_elements() {
        assert_eq!(array_total_bytes(8, 32, u32::MAX), None);
    }
}
