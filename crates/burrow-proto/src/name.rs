//! DNS domain names.
//!
//! Names are held in uncompressed wire form, always terminated by the root
//! label, so they can be written into a packet or a cache key without
//! re-encoding. Comparison and hashing are case-insensitive per RFC 1035;
//! ordering is the canonical form of RFC 4034 (right-most label first).

use crate::error::{Error, Result};
use crate::wire::{Cursor, Emitter};
use crate::{MAX_LABEL_LEN, MAX_NAME_LEN};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Maximum number of compression pointer hops tolerated in one name.
const MAX_POINTER_HOPS: usize = 16;

/// A fully-qualified DNS name in wire form.
#[derive(Clone)]
pub struct Name {
    /// Length-prefixed labels, ending with the zero root label.
    wire: SmallVec<[u8; 32]>,
}

impl Name {
    /// The root name `.`.
    pub fn root() -> Self {
        Self {
            wire: SmallVec::from_slice(&[0]),
        }
    }

    /// Builds a name from uncompressed wire bytes.
    ///
    /// A missing root terminator is rejected, as are compression pointers.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_NAME_LEN {
            return Err(Error::NameTooLong { length: bytes.len() });
        }
        let mut pos = 0;
        loop {
            let len = *bytes.get(pos).ok_or(Error::UnexpectedEof { offset: pos })? as usize;
            if len == 0 {
                break;
            }
            if len > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong { length: len });
            }
            pos += 1 + len;
        }
        if pos + 1 != bytes.len() {
            return Err(Error::Malformed {
                offset: pos,
                reason: "trailing bytes after root label",
            });
        }
        Ok(Self {
            wire: SmallVec::from_slice(bytes),
        })
    }

    /// Parses a possibly-compressed name out of a message cursor.
    ///
    /// The cursor advances past the name's in-place encoding; pointer
    /// targets are chased through the full message buffer.
    pub fn parse(cur: &mut Cursor<'_>) -> Result<Self> {
        let msg = cur.message();
        let mut wire: SmallVec<[u8; 32]> = SmallVec::new();
        let mut pos = cur.position();
        let mut end_of_inline: Option<usize> = None;
        let mut hops = 0usize;

        loop {
            let len = *msg.get(pos).ok_or(Error::UnexpectedEof { offset: pos })? as usize;
            match len {
                0 => {
                    wire.push(0);
                    if end_of_inline.is_none() {
                        end_of_inline = Some(pos + 1);
                    }
                    break;
                }
                l if l & 0xC0 == 0xC0 => {
                    let lo = *msg.get(pos + 1).ok_or(Error::UnexpectedEof { offset: pos + 1 })?;
                    let target = ((len & 0x3F) << 8) | lo as usize;
                    if end_of_inline.is_none() {
                        end_of_inline = Some(pos + 2);
                    }
                    // Pointers must aim strictly backwards.
                    if target >= pos {
                        return Err(Error::BadPointer { offset: pos, target });
                    }
                    hops += 1;
                    if hops > MAX_POINTER_HOPS {
                        return Err(Error::PointerLoop { offset: pos });
                    }
                    pos = target;
                }
                l if l > MAX_LABEL_LEN => {
                    return Err(Error::Malformed {
                        offset: pos,
                        reason: "reserved label type",
                    });
                }
                l => {
                    let label_end = pos + 1 + l;
                    if label_end > msg.len() {
                        return Err(Error::UnexpectedEof { offset: label_end });
                    }
                    wire.extend_from_slice(&msg[pos..label_end]);
                    if wire.len() > MAX_NAME_LEN {
                        return Err(Error::NameTooLong { length: wire.len() });
                    }
                    pos = label_end;
                }
            }
        }

        cur.seek(end_of_inline.expect("inline end recorded before loop exit"));
        Ok(Self { wire })
    }

    /// The wire form, including the terminating root label.
    #[inline]
    pub fn as_wire(&self) -> &[u8] {
        &self.wire
    }

    /// Wire length in bytes.
    #[inline]
    pub fn wire_len(&self) -> usize {
        self.wire.len()
    }

    /// True for the root name.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.wire.len() == 1
    }

    /// Iterates labels left to right, excluding the root label.
    pub fn labels(&self) -> Labels<'_> {
        Labels {
            wire: &self.wire,
            pos: 0,
        }
    }

    /// Number of labels excluding the root.
    pub fn label_count(&self) -> usize {
        self.labels().count()
    }

    /// The name with its leftmost label removed; `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let skip = 1 + self.wire[0] as usize;
        Some(Self {
            wire: SmallVec::from_slice(&self.wire[skip..]),
        })
    }

    /// True when `self` equals `zone` or sits below it.
    ///
    /// This is the bailiwick test used on referrals and glue.
    pub fn is_subdomain_of(&self, zone: &Name) -> bool {
        let mine = self.label_count();
        let theirs = zone.label_count();
        if mine < theirs {
            return false;
        }
        let mut candidate = self.clone();
        for _ in 0..mine - theirs {
            candidate = match candidate.parent() {
                Some(p) => p,
                None => return false,
            };
        }
        candidate == *zone
    }

    /// Lowercases the name in place.
    pub fn make_lowercase(&mut self) {
        for b in self.wire.iter_mut() {
            b.make_ascii_lowercase();
        }
    }

    /// Returns a lowercased copy.
    #[must_use]
    pub fn to_lowercase(&self) -> Self {
        let mut copy = self.clone();
        copy.make_lowercase();
        copy
    }

    /// Randomizes letter case from `secret`, one bit per ASCII letter.
    ///
    /// A zero secret leaves the name lowercased, which doubles as the
    /// "already decoded" marker when a coalesced follower replays a
    /// leader's response.
    #[must_use]
    pub fn with_0x20(&self, secret: u128) -> Self {
        let mut out = self.to_lowercase();
        if secret == 0 {
            return out;
        }
        let mut bit = 0u32;
        for b in out.wire.iter_mut() {
            if b.is_ascii_alphabetic() {
                if (secret >> (bit % 96)) & 1 == 1 {
                    b.make_ascii_uppercase();
                }
                bit += 1;
            }
        }
        out
    }

    /// Verifies a response name echoes the exact case produced by
    /// [`with_0x20`](Self::with_0x20) for `secret`. With a zero secret the
    /// check degrades to the usual case-insensitive equality.
    pub fn check_0x20(&self, echoed: &Name, secret: u128) -> bool {
        if secret == 0 {
            return self == echoed;
        }
        self.with_0x20(secret).as_wire() == echoed.as_wire()
    }

    /// Appends the uncompressed name to an emitter.
    pub fn emit(&self, out: &mut Emitter) -> Result<()> {
        out.bytes(&self.wire)
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || s == "." {
            return Ok(Self::root());
        }
        let trimmed = s.strip_suffix('.').unwrap_or(s);
        let mut wire: SmallVec<[u8; 32]> = SmallVec::new();
        for label in trimmed.split('.') {
            if label.is_empty() {
                return Err(Error::Malformed {
                    offset: 0,
                    reason: "empty label",
                });
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong { length: label.len() });
            }
            for c in label.chars() {
                if !c.is_ascii_alphanumeric() && !matches!(c, '-' | '_' | '*') {
                    return Err(Error::InvalidNameChar { character: c });
                }
            }
            wire.push(label.len() as u8);
            wire.extend_from_slice(label.as_bytes());
        }
        wire.push(0);
        if wire.len() > MAX_NAME_LEN {
            return Err(Error::NameTooLong { length: wire.len() });
        }
        Ok(Self { wire })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for label in self.labels() {
            for &b in label {
                if b.is_ascii_graphic() && b != b'.' && b != b'\\' {
                    write!(f, "{}", b as char)?;
                } else {
                    write!(f, "\\{:03}", b)?;
                }
            }
            f.write_str(".")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.wire.len() == other.wire.len()
            && self
                .wire
                .iter()
                .zip(other.wire.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.wire.iter() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        let mine: Vec<&[u8]> = self.labels().collect();
        let theirs: Vec<&[u8]> = other.labels().collect();
        for (a, b) in mine.iter().rev().zip(theirs.iter().rev()) {
            let ord = a
                .iter()
                .map(u8::to_ascii_lowercase)
                .cmp(b.iter().map(u8::to_ascii_lowercase));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        mine.len().cmp(&theirs.len())
    }
}

impl Default for Name {
    fn default() -> Self {
        Self::root()
    }
}

impl Serialize for Name {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Iterator over a name's labels, root excluded.
pub struct Labels<'a> {
    wire: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Labels<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let len = *self.wire.get(self.pos)? as usize;
        if len == 0 {
            return None;
        }
        let start = self.pos + 1;
        self.pos = start + len;
        Some(&self.wire[start..start + len])
    }
}
