//! Trust ranks for cached entries.

use std::fmt;
use std::ops::BitOr;

/// Trust score of a cached entry.
///
/// The nominal values are chosen so that ordering works out by plain byte
/// comparison:
///
/// - authoritative data beats non-authoritative data,
/// - authoritative data that went through (failed) validation beats plain
///   authoritative data,
/// - validated non-authoritative data beats unvalidated authority.
///
/// An insert may never lower the rank of a live entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rank(pub u8);

impl Rank {
    /// Poisoned or otherwise unusable data.
    pub const BAD: Rank = Rank(0);
    /// DNSSEC insecure (validation attempted, no chain).
    pub const INSECURE: Rank = Rank(1);
    /// Learned from an authority section (parent side).
    pub const NONAUTH: Rank = Rank(8);
    /// Learned from an authoritative answer.
    pub const AUTH: Rank = Rank(16);
    /// DNSSEC validated.
    pub const SECURE: Rank = Rank(64);

    /// Raw byte value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// True when the secure bit is set.
    #[inline]
    pub const fn is_secure(self) -> bool {
        self.0 & Rank::SECURE.0 != 0
    }

    /// True when the entry came from authoritative data.
    #[inline]
    pub const fn is_auth(self) -> bool {
        self.0 & Rank::AUTH.0 != 0
    }
}

impl BitOr for Rank {
    type Output = Rank;

    fn bitor(self, rhs: Rank) -> Rank {
        Rank(self.0 | rhs.0)
    }
}

impl From<u8> for Rank {
    fn from(v: u8) -> Self {
        Rank(v)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Rank::BAD => f.write_str("bad"),
            Rank::INSECURE => f.write_str("insecure"),
            Rank::NONAUTH => f.write_str("nonauth"),
            Rank::AUTH => f.write_str("auth"),
            Rank::SECURE => f.write_str("secure"),
            Rank(v) => write!(f, "rank({})", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_axioms() {
        assert!(Rank::SECURE > Rank::AUTH);
        assert!(Rank::AUTH > Rank::NONAUTH);
        assert!(Rank::NONAUTH > Rank::INSECURE);
        assert!(Rank::INSECURE > Rank::BAD);
    }

    #[test]
    fn composite_ranks() {
        // Attempted validation outranks plain authority.
        assert!(Rank::AUTH | Rank::INSECURE > Rank::AUTH);
        // Validated non-authoritative data outranks unvalidated authority.
        assert!(Rank::NONAUTH | Rank::SECURE > Rank::AUTH);
    }

    #[test]
    fn flags() {
        assert!((Rank::NONAUTH | Rank::SECURE).is_secure());
        assert!(!(Rank::AUTH).is_secure());
        assert!((Rank::AUTH | Rank::INSECURE).is_auth());
    }
}
