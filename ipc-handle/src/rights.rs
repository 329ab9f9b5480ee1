//! Handle rights bitmask (spec §3 "Handle").

use bitflags::bitflags;

bitflags! {
    /// The set of operations a handle's holder is permitted to perform.
    ///
    /// Rights may only be reduced, never added: [`Handle::duplicate`] yields
    /// a handle whose rights equal the source's, while
    /// [`Handle::duplicate_with_reduced_rights`] and
    /// [`Handle::replace_with_reduced_rights`] can only narrow them further.
    ///
    /// [`Handle::duplicate`]: crate::Handle::duplicate
    /// [`Handle::duplicate_with_reduced_rights`]: crate::Handle::duplicate_with_reduced_rights
    /// [`Handle::replace_with_reduced_rights`]: crate::Handle::replace_with_reduced_rights
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Rights: u32 {
        /// May read from the underlying object.
        const READ = 1 << 0;
        /// May write to the underlying object.
        const WRITE = 1 << 1;
        /// May produce an independent handle to the same object via `duplicate`.
        const DUPLICATE = 1 << 2;
        /// May be written into a message and moved to another process.
        const TRANSFER = 1 << 3;
        /// May query object options (e.g. buffer size).
        const GET_OPTIONS = 1 << 4;
        /// May mutate object options.
        const SET_OPTIONS = 1 << 5;
    }
}

impl Rights {
    /// All rights a freshly created object is typically granted.
    pub const FULL: Rights = Rights::all();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduction_is_a_subset() {
        let full = Rights::FULL;
        let reduced = full.difference(Rights::WRITE | Rights::TRANSFER);
        assert!(full.contains(reduced));
        assert!(!reduced.contains(Rights::WRITE));
        assert!(!reduced.contains(Rights::TRANSFER));
        assert!(reduced.contains(Rights::READ));
    }
}
