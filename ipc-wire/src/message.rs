//! Message envelope validation (spec §4.3.4's `message-header-*` failure
//! kinds).
//!
//! Every wire message carries a small fixed header in front of its
//! descriptor-driven body: a flags word, an optional request id (set on
//! two-way calls expecting a reply), and a method selector. This mirrors
//! `nx_sf::cmif`'s `SFCI`/`SFCO` in/out headers, generalized away from that
//! protocol's specific magic numbers since the wire format here is defined
//! by descriptors rather than a fixed C struct.

use crate::error::ValidationError;

/// Set when the sender expects a reply and has stamped a request id into
/// the header; cleared for one-way (fire-and-forget) messages.
pub const FLAG_EXPECTS_REPLY: u32 = 1 << 0;

/// The union of every flag bit this implementation understands. Any other
/// bit set in a header is rejected as forward-incompatible, matching the
/// "no undocumented flags" discipline `nx_sf::cmif::make_request` applies
/// to its own flag word.
pub const KNOWN_FLAGS: u32 = FLAG_EXPECTS_REPLY;

/// A decoded message header, prior to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Protocol flag bits.
    pub flags: u32,
    /// Present iff [`FLAG_EXPECTS_REPLY`] is set.
    pub request_id: Option<u64>,
    /// Selects which method on the target interface this message invokes.
    pub method: u32,
}

impl MessageHeader {
    /// Checks this header against the three message-header validation
    /// rules (spec §4.3.4): unknown flag bits, a two-way call missing its
    /// request id, and a method not present in `known_methods`.
    pub fn validate(&self, known_methods: &[u32]) -> Result<(), ValidationError> {
        if self.flags & !KNOWN_FLAGS != 0 {
            return Err(ValidationError::MessageHeaderInvalidFlags);
        }
        let expects_reply = self.flags & FLAG_EXPECTS_REPLY != 0;
        if expects_reply != self.request_id.is_some() {
            return Err(ValidationError::MessageHeaderMissingRequestId);
        }
        if !known_methods.contains(&self.method) {
            return Err(ValidationError::MessageHeaderUnknownMethod);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const METHODS: &[u32] = &[1, 2, 3];

    #[test]
    fn well_formed_two_way_header_validates() {
        let header = MessageHeader {
            flags: FLAG_EXPECTS_REPLY,
            request_id: Some(42),
            method: 2,
        };
        assert_eq!(header.validate(METHODS), Ok(()));
    }

    #[test]
    fn well_formed_one_way_header_validates() {
        let header = MessageHeader {
            flags: 0,
            request_id: None,
            method: 1,
        };
        assert_eq!(header.validate(METHODS), Ok(()));
    }

    #[test]
    fn unknown_flag_bit_is_rejected() {
        let header = MessageHeader {
            flags: 0x8000_0000,
            request_id: None,
            method: 1,
        };
        assert_eq!(header.validate(METHODS), Err(ValidationError::MessageHeaderInvalidFlags));
    }

    #[test]
    fn two_way_flag_without_request_id_is_rejected() {
        let header = MessageHeader {
            flags: FLAG_EXPECTS_REPLY,
            request_id: None,
            method: 1,
        };
        assert_eq!(header.validate(METHODS), Err(ValidationError::MessageHeaderMissingRequestId));
    }

    #[test]
    fn request_id_without_the_flag_is_rejected() {
        let header = MessageHeader {
            flags: 0,
            request_id: Some(1),
            method: 1,
        };
        assert_eq!(header.validate(METHODS), Err(ValidationError::MessageHeaderMissingRequestId));
    }

    #[test]
    fn unknown_method_is_rejected() {
        let header = MessageHeader {
            flags: 0,
            request_id: None,
            method: 99,
        };
        assert_eq!(header.validate(METHODS), Err(ValidationError::MessageHeaderUnknownMethod));
    }
}
