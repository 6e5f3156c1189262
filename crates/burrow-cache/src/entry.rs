//! Cache entry layout.
//!
//! A stored value is a fixed 12-byte header followed by the packed rdatas:
//!
//! ```text
//! timestamp(4) ttl(4) count(2) rank(1) flags(1)
//! then per record: ttl(4) len(2) data(len)
//! ```
//!
//! All integers are little-endian. TTLs inside the packed data are the
//! original record TTLs; freshness is judged against the header timestamp.

use crate::error::{CacheError, Result};
use crate::rank::Rank;
use burrow_proto::{Name, RClass, RType, RrSet};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the fixed entry header.
pub const HEADER_LEN: usize = 12;

/// Entry flag: the data needs a wildcard expansion proof.
pub const FLAG_WCARD_PROOF: u8 = 1;

/// Decoded entry header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    /// Absolute creation time, seconds since the epoch.
    pub timestamp: u32,
    /// Maximum TTL across the stored records.
    pub ttl: u32,
    /// Number of packed records.
    pub count: u16,
    /// Trust rank.
    pub rank: Rank,
    /// Entry flags.
    pub flags: u8,
}

impl EntryHeader {
    /// Serializes the header into `out`.
    pub fn encode_into(&self, out: &mut BytesMut) {
        out.put_u32_le(self.timestamp);
        out.put_u32_le(self.ttl);
        out.put_u16_le(self.count);
        out.put_u8(self.rank.as_u8());
        out.put_u8(self.flags);
    }

    /// Decodes a header from the front of a stored value.
    pub fn decode(value: &[u8]) -> Result<Self> {
        if value.len() < HEADER_LEN {
            return Err(CacheError::Corrupt {
                reason: "value shorter than entry header",
            });
        }
        Ok(Self {
            timestamp: u32::from_le_bytes(value[0..4].try_into().unwrap()),
            ttl: u32::from_le_bytes(value[4..8].try_into().unwrap()),
            count: u16::from_le_bytes(value[8..10].try_into().unwrap()),
            rank: Rank(value[10]),
            flags: value[11],
        })
    }
}

/// Packs an RRSet's rdatas into the stored representation.
pub fn pack_rdata(set: &RrSet) -> Bytes {
    let mut out = BytesMut::new();
    for item in &set.items {
        out.put_u32_le(item.ttl);
        out.put_u16_le(item.data.len() as u16);
        out.extend_from_slice(&item.data);
    }
    out.freeze()
}

/// Unpacks `count` records into an RRSet with the given identity.
pub fn unpack_rdata(
    owner: Name,
    rtype: RType,
    rclass: RClass,
    count: u16,
    data: &[u8],
) -> Result<RrSet> {
    let mut set = RrSet::new(owner, rtype, rclass);
    let mut pos = 0usize;
    for _ in 0..count {
        if pos + 6 > data.len() {
            return Err(CacheError::Corrupt {
                reason: "packed rdata shorter than its count",
            });
        }
        let ttl = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
        let len = u16::from_le_bytes(data[pos + 4..pos + 6].try_into().unwrap()) as usize;
        pos += 6;
        if pos + len > data.len() {
            return Err(CacheError::Corrupt {
                reason: "packed rdata overruns the value",
            });
        }
        set.push(ttl, Bytes::copy_from_slice(&data[pos..pos + len]));
        pos += len;
    }
    Ok(set)
}

/// Clones an RRSet for use at `drift` seconds after it was cached.
///
/// Records whose TTL has already drained are dropped; the rest get the
/// drift subtracted. An empty result is a legitimate empty RRSet.
pub fn materialize(src: &RrSet, drift: u32) -> RrSet {
    let mut dst = RrSet::new(src.owner.clone(), src.rtype, src.rclass);
    for item in &src.items {
        if item.ttl > drift {
            dst.push(item.ttl - drift, item.data.clone());
        }
    }
    dst
}
