//! Record classes.

use std::fmt;

/// A DNS record class. Internet class is the only one the resolver
/// iterates for; the rest are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RClass {
    /// Internet.
    #[default]
    In,
    /// Chaos.
    Ch,
    /// Hesiod.
    Hs,
    /// Query for any class.
    Any,
    /// Anything else, by number.
    Other(u16),
}

impl RClass {
    /// Decodes from the wire value.
    pub fn from_u16(v: u16) -> Self {
        match v {
            1 => Self::In,
            3 => Self::Ch,
            4 => Self::Hs,
            255 => Self::Any,
            other => Self::Other(other),
        }
    }

    /// Encodes to the wire value.
    pub fn to_u16(self) -> u16 {
        match self {
            Self::In => 1,
            Self::Ch => 3,
            Self::Hs => 4,
            Self::Any => 255,
            Self::Other(v) => v,
        }
    }
}

impl fmt::Display for RClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => f.write_str("IN"),
            Self::Ch => f.write_str("CH"),
            Self::Hs => f.write_str("HS"),
            Self::Any => f.write_str("ANY"),
            Self::Other(v) => write!(f, "CLASS{}", v),
        }
    }
}
