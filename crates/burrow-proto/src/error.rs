//! DNS wire format error types.

use thiserror::Error;

/// Result type alias for wire format operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing or building DNS messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Ran past the end of the buffer while parsing.
    #[error("unexpected end of message at offset {offset}")]
    UnexpectedEof {
        /// Byte offset where data ran out.
        offset: usize,
    },

    /// A value in the message violates the wire format.
    #[error("malformed message at offset {offset}: {reason}")]
    Malformed {
        /// Byte offset of the offending data.
        offset: usize,
        /// Short description of the violation.
        reason: &'static str,
    },

    /// A label exceeds the 63 byte limit.
    #[error("label of {length} bytes exceeds the 63 byte limit")]
    LabelTooLong {
        /// Offending label length.
        length: usize,
    },

    /// A name exceeds the 255 byte wire limit.
    #[error("name of {length} bytes exceeds the 255 byte limit")]
    NameTooLong {
        /// Offending wire length.
        length: usize,
    },

    /// A character not allowed in a presentation-format name.
    #[error("invalid character {character:?} in name")]
    InvalidNameChar {
        /// The offending character.
        character: char,
    },

    /// Compression pointer chain did not terminate.
    #[error("compression pointer loop at offset {offset}")]
    PointerLoop {
        /// Offset of the pointer that closed the loop.
        offset: usize,
    },

    /// Compression pointer aimed forward or out of bounds.
    #[error("bad compression pointer at offset {offset} targeting {target}")]
    BadPointer {
        /// Offset of the pointer.
        offset: usize,
        /// Target offset it referenced.
        target: usize,
    },

    /// Serialization would exceed the output limit.
    #[error("message would exceed {limit} bytes")]
    Oversize {
        /// The size limit that was hit.
        limit: usize,
    },

    /// More than one OPT record in the additional section.
    #[error("duplicate OPT record")]
    DuplicateOpt,

    /// The message is shorter than a DNS header.
    #[error("message of {length} bytes is shorter than a DNS header")]
    ShortMessage {
        /// Actual message length.
        length: usize,
    },
}

impl Error {
    /// True for errors that mean the packet should be silently dropped
    /// rather than answered with FORMERR.
    pub fn is_garbage(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedEof { .. }
                | Self::ShortMessage { .. }
                | Self::PointerLoop { .. }
                | Self::BadPointer { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let err = Error::UnexpectedEof { offset: 12 };
        assert_eq!(err.to_string(), "unexpected end of message at offset 12");

        let err = Error::LabelTooLong { length: 70 };
        assert_eq!(err.to_string(), "label of 70 bytes exceeds the 63 byte limit");
    }

    #[test]
    fn garbage_classification() {
        assert!(Error::ShortMessage { length: 3 }.is_garbage());
        assert!(Error::PointerLoop { offset: 20 }.is_garbage());
        assert!(!Error::DuplicateOpt.is_garbage());
    }
}
