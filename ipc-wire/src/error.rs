//! The closed set of ways an untrusted byte buffer can fail validation
//! (spec §4.3.4 "Validation", §7).

/// Every distinct reason [`validate`](crate::codec::validate) can reject a
/// buffer. Closed on purpose: callers match exhaustively rather than
/// stringly-inspect a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// An object's offset is not a multiple of the wire alignment.
    #[error("object is not 8-byte aligned")]
    MisalignedObject,

    /// An object's declared size or offset places it partly or fully
    /// outside the buffer.
    #[error("object extends past the end of the buffer")]
    IllegalMemoryRange,

    /// A struct header's `num_bytes` disagrees with what the descriptor
    /// expects for the header's declared version.
    #[error("struct header size does not match its declared version")]
    UnexpectedStructHeader,

    /// An array header's `num_bytes` disagrees with its `num_elements` and
    /// element width.
    #[error("array header size does not match its element count")]
    UnexpectedArrayHeader,

    /// A handle index is out of range for the accompanying handle table.
    #[error("handle index is out of range")]
    IllegalHandle,

    /// A non-nullable handle field decoded to the invalid-handle sentinel.
    #[error("handle field is unexpectedly absent")]
    UnexpectedInvalidHandle,

    /// A pointer cell's offset does not land on a previously-validated,
    /// correctly-typed object.
    #[error("pointer does not reference a valid object")]
    IllegalPointer,

    /// A non-nullable pointer field decoded to null.
    #[error("pointer field is unexpectedly null")]
    UnexpectedNullPointer,

    /// A message header carried flag bits this implementation does not
    /// recognize.
    #[error("message header has invalid flags")]
    MessageHeaderInvalidFlags,

    /// A message header that is required to carry a request id (a
    /// two-way call) does not have one.
    #[error("message header is missing a request id")]
    MessageHeaderMissingRequestId,

    /// A message header names a method this interface does not define.
    #[error("message header names an unknown method")]
    MessageHeaderUnknownMethod,

    /// The two arrays backing a map have different lengths.
    #[error("map's key and value arrays have different lengths")]
    DifferentSizedArraysInMap,

    /// A non-nullable union field decoded to the null tag.
    #[error("union field is unexpectedly null")]
    UnexpectedNullUnion,

    /// A union tag unrecognized by this descriptor, and neither within the
    /// producer's known field count nor the reserved "unknown" tag.
    #[error("union tag is not recognized by this descriptor")]
    UnknownUnionTag,
}
