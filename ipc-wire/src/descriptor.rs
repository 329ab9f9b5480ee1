//! Compile-time wire type descriptors (spec §4.2).
//!
//! Descriptors are static, `'static`-reachable tables produced by a code
//! generator external to this crate (design note §9: "an implementation
//! SHOULD accept descriptors as static immutable data; no runtime type
//! construction is required"). They describe the layout of a generated
//! aggregate type the same way `nx_sf::hipc::Metadata` or
//! `nx_sf::cmif::RequestFormat` describe a message's shape: plain data, laid
//! out once at compile time, consumed by the engine at runtime.

/// The kind of a single field, array element, or union arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Plain scalar data (integers, floats, booleans): no recursion needed.
    PlainOldData,
    /// A transferable kernel handle.
    Handle,
    /// A reference to a remote interface (modeled identically to a handle
    /// at the wire level: a 32-bit index into the handle table).
    Interface,
    /// An out-of-line pointer to a struct.
    StructPtr,
    /// An out-of-line pointer to a map (a struct with two array fields).
    MapPtr,
    /// An out-of-line pointer to an array.
    ArrayPtr,
    /// An out-of-line pointer to a union (a boxed nested union).
    UnionPtr,
    /// A union stored inline (16 bytes, no pointer indirection).
    UnionInline,
}

/// `true` for the four kinds that occupy a pointer cell and therefore
/// contribute to [`next_pointer`](crate::codec::ValidateCtx) bookkeeping.
pub const fn is_pointer(kind: FieldKind) -> bool {
    matches!(
        kind,
        FieldKind::StructPtr | FieldKind::MapPtr | FieldKind::ArrayPtr | FieldKind::UnionPtr
    )
}

/// A descriptor for one of the three aggregate shapes a pointer or union
/// arm can recurse into.
#[derive(Debug, Clone, Copy)]
pub enum Descriptor {
    /// Describes a struct (including the two-array-field shape used for maps).
    Struct(&'static StructDescriptor),
    /// Describes an array.
    Array(&'static ArrayDescriptor),
    /// Describes a union.
    Union(&'static UnionDescriptor),
}

/// One field of a struct.
#[derive(Debug, Clone, Copy)]
pub struct StructEntry {
    /// The field's kind.
    pub kind: FieldKind,
    /// The child descriptor for pointer/union-inline kinds; `None` for
    /// `PlainOldData`, `Handle`, and `Interface`.
    pub child: Option<&'static Descriptor>,
    /// Byte offset of this field within the struct's body (i.e. relative to
    /// the first byte *after* the 8-byte struct header).
    pub offset: u16,
    /// The lowest struct version in which this field exists.
    pub min_version: u32,
    /// `true` if a null/zero value is legal for this field.
    pub nullable: bool,
}

/// A `(version, body_size)` pair: the body size (bytes after the 8-byte
/// header, a multiple of 8) a reader who only knows up to `version` expects.
#[derive(Debug, Clone, Copy)]
pub struct VersionInfo {
    /// The struct version this entry describes.
    pub version: u32,
    /// The struct's body size at that version, in bytes.
    pub body_size: u32,
}

/// Compile-time metadata describing a generated struct type (spec §4.2,
/// §3 "Type descriptor").
#[derive(Debug, Clone, Copy)]
pub struct StructDescriptor {
    /// Every field this descriptor knows about, across all versions.
    pub entries: &'static [StructEntry],
    /// Known `(version, body_size)` pairs, sorted ascending by version.
    pub versions: &'static [VersionInfo],
}

impl StructDescriptor {
    /// The body size of the highest version this descriptor knows about.
    pub fn highest_known_body_size(&self) -> u32 {
        self.versions.last().map(|v| v.body_size).unwrap_or(0)
    }

    /// The body size a known `version` requires, or `None` if `version`
    /// isn't one of [`versions`](Self::versions) (it may still be legal if
    /// it's *newer* than every known version — spec.md §4.3.4 rule (i)).
    pub fn body_size_for_version(&self, version: u32) -> Option<u32> {
        self.versions
            .iter()
            .find(|v| v.version == version)
            .map(|v| v.body_size)
    }

    /// The highest version number this descriptor recognizes.
    pub fn highest_known_version(&self) -> u32 {
        self.versions.last().map(|v| v.version).unwrap_or(0)
    }
}

/// One arm of a union.
#[derive(Debug, Clone, Copy)]
pub struct UnionEntry {
    /// The tag value identifying this arm.
    pub tag: u32,
    /// The arm's kind.
    pub kind: FieldKind,
    /// The child descriptor for pointer/union-inline kinds.
    pub child: Option<&'static Descriptor>,
    /// `true` if this arm may legally be null (only meaningful for pointer
    /// kinds nested inside the union's 8-byte payload, which cannot happen
    /// for `PlainOldData`/`Handle`/`Interface` arms).
    pub nullable: bool,
}

/// Compile-time metadata describing a generated union type.
#[derive(Debug, Clone, Copy)]
pub struct UnionDescriptor {
    /// Every arm this descriptor knows about, keyed by tag.
    pub entries: &'static [UnionEntry],
    /// The total number of fields the producer that emitted this descriptor
    /// knew about — used by [`deep_copy`](crate::codec::deep_copy) to tell
    /// "a newer arm we don't recognize" from "a genuinely invalid tag".
    pub num_fields_known: u32,
}

impl UnionDescriptor {
    /// Looks up the arm for `tag`, if known.
    pub fn entry(&self, tag: u32) -> Option<&'static UnionEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }
}

/// Compile-time metadata describing a generated array type.
#[derive(Debug, Clone, Copy)]
pub struct ArrayDescriptor {
    /// The kind of each element.
    pub elem_kind: FieldKind,
    /// The child descriptor for pointer/union-inline element kinds.
    pub elem_child: Option<&'static Descriptor>,
    /// A fixed length the array must have, if any.
    pub fixed_len: Option<u32>,
    /// The width of one element in bits (e.g. 1 for a packed bool array, 32
    /// for a `uint32` array, 64 for a pointer/union-inline element).
    pub elem_bits: u32,
    /// `true` if a null array reference is legal wherever this descriptor
    /// is reached via a pointer.
    pub nullable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_pointer_identifies_the_four_out_of_line_kinds() {
        assert!(is_pointer(FieldKind::StructPtr));
        assert!(is_pointer(FieldKind::MapPtr));
        assert!(is_pointer(FieldKind::ArrayPtr));
        assert!(is_pointer(FieldKind::UnionPtr));
        assert!(!is_pointer(FieldKind::UnionInline));
        assert!(!is_pointer(FieldKind::Handle));
        assert!(!is_pointer(FieldKind::Interface));
        assert!(!is_pointer(FieldKind::PlainOldData));
    }
}
