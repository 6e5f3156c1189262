//! Cache key encoding.
//!
//! Keys are `tag || label-reverse(name) || rrtype`. The name is lowercased
//! and written label by label from the root outwards, so that the ordered
//! backing store clusters a zone's subtree under a common prefix:
//!
//! ```text
//! example.com.      ->  [3]com [7]example
//! www.example.com.  ->  [3]com [7]example [3]www
//! ```

use burrow_proto::{Name, RType};
use smallvec::SmallVec;

/// Asset tag discriminating what kind of value a key points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// A resource record set.
    Record,
    /// A whole cached packet.
    Packet,
    /// An RRSIG set, keyed by the covered type.
    Signature,
    /// Extension tag for user layers; values below 0x80 are reserved.
    User(u8),
}

impl Tag {
    /// The key byte for this tag.
    pub fn as_u8(self) -> u8 {
        match self {
            Tag::Record => b'R',
            Tag::Packet => b'P',
            Tag::Signature => b'G',
            Tag::User(v) => v | 0x80,
        }
    }
}

/// Key buffer: tag byte, up to 255 name bytes, two type bytes.
pub type KeyBuf = SmallVec<[u8; 64]>;

/// Encodes the full cache key for `(tag, name, rtype)`.
pub fn entry_key(tag: Tag, name: &Name, rtype: RType) -> KeyBuf {
    let mut key = KeyBuf::new();
    key.push(tag.as_u8());
    reverse_labels_into(name, &mut key);
    key.extend_from_slice(&rtype.to_u16().to_le_bytes());
    key
}

/// Writes the lowercased labels of `name` in root-first order.
fn reverse_labels_into(name: &Name, out: &mut KeyBuf) {
    let labels: Vec<&[u8]> = name.labels().collect();
    for label in labels.into_iter().rev() {
        out.push(label.len() as u8);
        out.extend(label.iter().map(u8::to_ascii_lowercase));
    }
}

/// Label-reversed form of a name, without tag or type bytes.
pub fn reverse_labels(name: &Name) -> KeyBuf {
    let mut out = KeyBuf::new();
    reverse_labels_into(name, &mut out);
    out
}

/// Reconstructs a name from its label-reversed form.
///
/// `reverse_labels` is an involution up to case: applying it twice gives
/// back the lowercased input.
pub fn unreverse_labels(bytes: &[u8]) -> Option<Name> {
    let mut labels: Vec<&[u8]> = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let len = bytes[pos] as usize;
        if len == 0 || pos + 1 + len > bytes.len() {
            return None;
        }
        labels.push(&bytes[pos + 1..pos + 1 + len]);
        pos += 1 + len;
    }
    let mut wire: Vec<u8> = Vec::with_capacity(bytes.len() + 1);
    for label in labels.into_iter().rev() {
        wire.push(label.len() as u8);
        wire.extend_from_slice(label);
    }
    wire.push(0);
    Name::from_wire(&wire).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_bytes() {
        assert_eq!(Tag::Record.as_u8(), b'R');
        assert_eq!(Tag::Packet.as_u8(), b'P');
        assert_eq!(Tag::Signature.as_u8(), b'G');
        assert!(Tag::User(3).as_u8() >= 0x80);
    }

    #[test]
    fn zone_locality() {
        let apex: Name = "example.com".parse().unwrap();
        let www: Name = "www.example.com".parse().unwrap();
        let apex_rev = reverse_labels(&apex);
        let www_rev = reverse_labels(&www);
        assert!(www_rev.starts_with(&apex_rev));
    }

    #[test]
    fn reverse_is_involutive() {
        for s in [".", "com.", "example.com.", "a.b.c.d.example.org."] {
            let name: Name = s.parse().unwrap();
            let rev = reverse_labels(&name);
            let back = unreverse_labels(&rev).unwrap();
            assert_eq!(back, name, "round trip failed for {s}");
            // And reversing the round-tripped name gives the same bytes.
            assert_eq!(reverse_labels(&back), rev);
        }
    }

    #[test]
    fn key_is_case_insensitive() {
        let a = entry_key(Tag::Record, &"WWW.Example.COM".parse().unwrap(), RType::A);
        let b = entry_key(Tag::Record, &"www.example.com".parse().unwrap(), RType::A);
        assert_eq!(a, b);
    }

    #[test]
    fn key_differs_by_type_and_tag() {
        let name: Name = "example.com".parse().unwrap();
        let a = entry_key(Tag::Record, &name, RType::A);
        let aaaa = entry_key(Tag::Record, &name, RType::Aaaa);
        let sig = entry_key(Tag::Signature, &name, RType::A);
        assert_ne!(a, aaaa);
        assert_ne!(a, sig);
        assert_eq!(a[0], b'R');
        assert_eq!(sig[0], b'G');
    }
}
