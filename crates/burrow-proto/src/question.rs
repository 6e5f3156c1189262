//! The question section entry.

use crate::class::RClass;
use crate::error::Result;
use crate::name::Name;
use crate::rtype::RType;
use crate::wire::{Cursor, Emitter};
use std::fmt;

/// A single DNS question.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Question {
    /// Queried name.
    pub qname: Name,
    /// Queried type.
    pub qtype: RType,
    /// Queried class.
    pub qclass: RClass,
}

impl Question {
    /// Creates a question.
    pub fn new(qname: Name, qtype: RType, qclass: RClass) -> Self {
        Self { qname, qtype, qclass }
    }

    /// Shorthand for an `IN A` question.
    pub fn a(qname: Name) -> Self {
        Self::new(qname, RType::A, RClass::In)
    }

    /// Shorthand for an `IN AAAA` question.
    pub fn aaaa(qname: Name) -> Self {
        Self::new(qname, RType::Aaaa, RClass::In)
    }

    /// Parses a question entry.
    pub fn parse(cur: &mut Cursor<'_>) -> Result<Self> {
        let qname = Name::parse(cur)?;
        let qtype = RType::from_u16(cur.u16()?);
        let qclass = RClass::from_u16(cur.u16()?);
        Ok(Self { qname, qtype, qclass })
    }

    /// Writes the question entry.
    pub fn emit(&self, out: &mut Emitter) -> Result<()> {
        self.qname.emit(out)?;
        out.u16(self.qtype.to_u16())?;
        out.u16(self.qclass.to_u16())
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.qname, self.qclass, self.qtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_emit_round_trip() {
        let q = Question::a("example.com".parse().unwrap());
        let mut out = Emitter::new(64);
        q.emit(&mut out).unwrap();
        let wire = out.finish();

        let mut cur = Cursor::new(&wire);
        let parsed = Question::parse(&mut cur).unwrap();
        assert_eq!(parsed, q);
        assert!(cur.is_exhausted());
    }

    #[test]
    fn display() {
        let q = Question::aaaa("example.com".parse().unwrap());
        assert_eq!(q.to_string(), "example.com. IN AAAA");
    }
}
