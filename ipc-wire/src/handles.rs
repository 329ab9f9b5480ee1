//! The out-of-band handle table accompanying an encoded message (spec
//! §4.3.6 "Handles").
//!
//! Handles never live inline in the byte buffer: a handle field on the wire
//! is a 32-bit index into this side table (or
//! [`header::INVALID_HANDLE_INDEX`](crate::header::INVALID_HANDLE_INDEX)
//! for an absent/null handle), mirroring how `nx_sf::hipc` ships its
//! "copy"/"move" handle descriptors alongside, rather than inside, the
//! message body.

use alloc::vec::Vec;

use ipc_handle::Handle;

use crate::header::INVALID_HANDLE_INDEX;

/// The ordered list of handles transferred alongside a message.
///
/// During [`encode`](crate::codec::encode), handle fields are visited in
/// struct/array declaration order and appended here as they're encountered,
/// each replaced on the wire by its resulting index. During
/// [`decode`](crate::codec::decode)/[`validate`](crate::codec::validate),
/// indices read off the wire are looked up here.
#[derive(Debug, Default)]
pub struct HandleTable {
    handles: Vec<Handle>,
}

impl HandleTable {
    /// An empty table.
    pub fn new() -> Self {
        Self { handles: Vec::new() }
    }

    /// Wraps a pre-existing handle list (e.g. just read off a message pipe).
    pub fn from_vec(handles: Vec<Handle>) -> Self {
        Self { handles }
    }

    /// The number of handles in the table.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// `true` if the table holds no handles.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Appends `handle`, returning its new index.
    pub fn push(&mut self, handle: Handle) -> u32 {
        let index = self.handles.len() as u32;
        self.handles.push(handle);
        index
    }

    /// Looks up `index`, returning `None` for
    /// [`INVALID_HANDLE_INDEX`] or an index past the end of the table.
    pub fn get(&self, index: u32) -> Option<Handle> {
        if index == INVALID_HANDLE_INDEX {
            return None;
        }
        self.handles.get(index as usize).copied()
    }

    /// Looks up `index` and resets that slot to [`Handle::INVALID`],
    /// matching decode's "consumed slots in the array are reset to invalid"
    /// rule (spec §3 "Handle-table").
    pub fn take(&mut self, index: u32) -> Option<Handle> {
        if index == INVALID_HANDLE_INDEX {
            return None;
        }
        let slot = self.handles.get_mut(index as usize)?;
        let handle = *slot;
        *slot = Handle::INVALID;
        Some(handle)
    }

    /// Consumes the table, returning its handles in order.
    pub fn into_vec(self) -> Vec<Handle> {
        self.handles
    }

    /// The handles in order, as a slice.
    pub fn as_slice(&self) -> &[Handle] {
        &self.handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_get_round_trips() {
        let mut table = HandleTable::new();
        let h = unsafe { Handle::from_raw(7) };
        let index = table.push(h);
        assert_eq!(table.get(index), Some(h));
    }

    #[test]
    fn invalid_index_is_none() {
        let table = HandleTable::new();
        assert_eq!(table.get(INVALID_HANDLE_INDEX), None);
    }

    #[test]
    fn out_of_range_index_is_none() {
        let table = HandleTable::new();
        assert_eq!(table.get(0), None);
    }

    #[test]
    fn take_resets_the_slot_to_invalid() {
        let mut table = HandleTable::new();
        let h = unsafe { Handle::from_raw(7) };
        let index = table.push(h);
        assert_eq!(table.take(index), Some(h));
        assert_eq!(table.get(index), Some(Handle::INVALID));
    }

    #[test]
    fn take_invalid_index_is_none() {
        let mut table = HandleTable::new();
        assert_eq!(table.take(INVALID_HANDLE_INDEX), None);
    }
}
