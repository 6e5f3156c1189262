//! # burrow-proto
//!
//! DNS wire format types for the burrow resolver: domain names, the
//! message header, questions, resource records, EDNS(0), and full message
//! parse/serialize with compression-pointer expansion.
//!
//! The codec is deliberately narrower than a general-purpose DNS library:
//! rdata is opaque bytes with typed accessors for the handful of types the
//! iterative resolver routes on. Everything else flows through unchanged.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod class;
pub mod edns;
pub mod error;
pub mod header;
pub mod message;
pub mod name;
pub mod question;
pub mod rcode;
pub mod record;
pub mod rtype;
pub mod wire;

pub use class::RClass;
pub use edns::Edns;
pub use error::{Error, Result};
pub use header::Header;
pub use message::Message;
pub use name::Name;
pub use question::Question;
pub use rcode::Rcode;
pub use record::{Record, RrItem, RrSet};
pub use rtype::RType;

/// Maximum length of one label (RFC 1035).
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum wire length of a name, root byte included (RFC 1035).
pub const MAX_NAME_LEN: usize = 255;

/// Plain UDP payload ceiling without EDNS (RFC 1035).
pub const MIN_UDP_PAYLOAD: usize = 512;

/// Default EDNS(0) payload advertised on outgoing queries.
pub const DEFAULT_EDNS_PAYLOAD: u16 = 4096;

/// Hard ceiling of any DNS message (TCP length prefix is 16 bits).
pub const MAX_MESSAGE_LEN: usize = 65535;

/// Standard DNS port.
pub const DNS_PORT: u16 = 53;

/// Draws a random message id.
pub fn random_msgid() -> u16 {
    rand::random()
}

/// Mints a fresh 0x20 case secret, truncated to its low 96 bits.
/// Never returns zero: a zero secret marks "case check not applicable".
pub fn random_secret() -> u128 {
    (rand::random::<u128>() & ((1u128 << 96) - 1)).max(1)
}
